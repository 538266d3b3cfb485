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

//! Validation outcomes.

use stagehand_core::{Severity, StagehandError, Timestamp};

/// The outcome of one rule against one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// The validated resource.
    pub resource: String,
    /// The rule that produced this result.
    pub rule: String,
    /// Whether the check passed.
    pub passed: bool,
    /// `Info` for passes; the rule's failure severity otherwise.
    pub severity: Severity,
    /// Human-readable outcome.
    pub message: String,
    /// Extra context, e.g. the counts compared or the error raised.
    pub details: String,
    /// When the rule ran.
    pub timestamp: Timestamp,
}

impl ValidationResult {
    /// A passing result with `Info` severity.
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            resource: String::new(),
            rule: String::new(),
            passed: true,
            severity: Severity::Info,
            message: message.into(),
            details: String::new(),
            timestamp: Timestamp::ZERO,
        }
    }

    /// A failing result.
    pub fn fail(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            severity,
            ..Self::pass(message)
        }
    }

    /// Attaches details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    /// Whether this is a failure at `Critical` severity.
    pub fn is_critical_failure(&self) -> bool {
        !self.passed && self.severity == Severity::Critical
    }

    /// The failure as an error, or `None` for passes.
    pub fn to_error(&self) -> Option<StagehandError> {
        (!self.passed).then(|| StagehandError::ValidationFailure {
            severity: self.severity,
            message: self.message.clone(),
        })
    }
}

/// Counts over one validation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    /// Number of results.
    pub total: usize,
    /// Number of passed results.
    pub passed: usize,
    /// Failures at `Warning` severity.
    pub warnings: usize,
    /// Failures at `Error` severity.
    pub errors: usize,
    /// Failures at `Critical` severity.
    pub critical: usize,
}

impl ValidationSummary {
    /// Summarizes `results`.
    pub fn from_results(results: &[ValidationResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            if result.passed {
                summary.passed += 1;
                continue;
            }
            match result.severity {
                // A failure reported at info level still counts as a failure.
                Severity::Info | Severity::Warning => summary.warnings += 1,
                Severity::Error => summary.errors += 1,
                Severity::Critical => summary.critical += 1,
            }
        }
        summary
    }

    /// Number of failed results.
    pub fn failures(&self) -> usize {
        self.total - self.passed
    }

    /// `true` when nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failures() == 0
    }
}
