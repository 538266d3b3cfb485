// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Rule definitions.

use serde::{Deserialize, Serialize};
use stagehand_core::{ResourceGraph, Severity};

use crate::result::ValidationResult;

/// What a [`ValidationRule`] checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleKind {
    /// The resource is listed in the host catalog.
    Exists,
    /// Some object carries a component whose type name is `expected`.
    RequiredComponent,
    /// Some object carries the tag `expected`.
    RequiredTag,
    /// The resource has at least `expected` root objects.
    MinCount,
    /// The resource has at most `expected` root objects.
    MaxCount,
    /// Some object sits on the layer `expected`.
    RequiredLayer,
    /// Delegates to the custom rule object registered under the name `expected`.
    Custom,
}

/// One configurable check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Unique name of the rule.
    pub name: String,
    /// What the rule checks.
    pub kind: RuleKind,
    /// Disabled rules are skipped.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// The rule's argument: tag, component, layer, threshold or custom rule name.
    #[serde(default)]
    pub expected: String,
    /// Message reported for a failure without an error message.
    #[serde(default)]
    pub warning_message: Option<String>,
    /// Message reported for a failure. Setting it raises the failure to `Error`.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Raises an `Error` failure to `Critical`.
    #[serde(default)]
    pub critical: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl ValidationRule {
    /// Creates an enabled rule that fails with a warning.
    pub fn new(name: impl Into<String>, kind: RuleKind, expected: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
            expected: expected.into(),
            warning_message: None,
            error_message: None,
            critical: false,
        }
    }

    /// Sets the message reported for a warning-level failure.
    pub fn with_warning(mut self, message: impl Into<String>) -> Self {
        self.warning_message = Some(message.into());
        self
    }

    /// Makes failures `Error`-level and reports `message`.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Makes failures `Critical`-level and reports `message`.
    pub fn critical(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self.critical = true;
        self
    }

    /// The severity of a failure of this rule.
    ///
    /// Without an error message a failure is only a warning; `critical` has
    /// no effect in that case.
    pub fn failure_severity(&self) -> Severity {
        match (&self.error_message, self.critical) {
            (None, _) => Severity::Warning,
            (Some(_), false) => Severity::Error,
            (Some(_), true) => Severity::Critical,
        }
    }

    /// The message reported for a failure of this rule.
    pub fn failure_message(&self) -> String {
        self.error_message
            .as_ref()
            .or(self.warning_message.as_ref())
            .cloned()
            .unwrap_or_else(|| format!("Rule '{}' failed", self.name))
    }
}

/// A check supplied by the host application.
///
/// Registered with [`Validator::register_custom`](crate::Validator::register_custom)
/// and referenced from a [`RuleKind::Custom`] rule by name. Errors and panics
/// are reported as `Error` results.
pub trait CustomRule: Send {
    /// The name [`RuleKind::Custom`] rules refer to.
    fn name(&self) -> &str;

    /// Checks `resource`.
    ///
    /// The validator fills in the resource, rule name and timestamp of the
    /// returned result.
    fn validate(&self, resource: &str, graph: &dyn ResourceGraph) -> anyhow::Result<ValidationResult>;
}
