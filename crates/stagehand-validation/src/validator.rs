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

//! The rule engine.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use stagehand_core::{
    Catalog, EventBus, EventKind, EventPayload, LoadedResources, ResourceGraph, Severity,
    StagehandResult, Timestamp,
};

use crate::result::{ValidationResult, ValidationSummary};
use crate::rule::{CustomRule, RuleKind, ValidationRule};

/// Name of the rule installed by [`Validator::with_default_rules`].
const DEFAULT_EXISTS_RULE: &str = "exists";

/// Validation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Publish `ValidationBlocked` when a pass produces a critical failure.
    pub block_on_critical: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            block_on_critical: true,
        }
    }
}

/// Evaluates rules against loaded resources and keeps the latest results.
pub struct Validator {
    config: ValidatorConfig,
    graph: Box<dyn ResourceGraph>,
    catalog: Box<dyn Catalog>,
    rules: Vec<ValidationRule>,
    custom: HashMap<String, Box<dyn CustomRule>>,
    history: HashMap<String, Vec<ValidationResult>>,
}

impl Validator {
    /// Creates a validator with no rules.
    pub fn new(
        config: ValidatorConfig,
        graph: Box<dyn ResourceGraph>,
        catalog: Box<dyn Catalog>,
    ) -> Self {
        Self {
            config,
            graph,
            catalog,
            rules: Vec::new(),
            custom: HashMap::new(),
            history: HashMap::new(),
        }
    }

    /// Installs the built-in rule set: a critical catalog membership check.
    pub fn with_default_rules(mut self) -> Self {
        self.add_rule(
            ValidationRule::new(DEFAULT_EXISTS_RULE, RuleKind::Exists, "")
                .critical("Resource is not part of the catalog"),
        );
        self
    }

    /// The active policy.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Appends `rule`, replacing any rule with the same name in place.
    pub fn add_rule(&mut self, rule: ValidationRule) {
        match self.rules.iter_mut().find(|existing| existing.name == rule.name) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    /// Removes the rule called `name`.
    pub fn remove_rule(&mut self, name: &str) -> Option<ValidationRule> {
        let index = self.rules.iter().position(|rule| rule.name == name)?;
        Some(self.rules.remove(index))
    }

    /// Enables or disables the rule called `name`. Returns `false` if there is none.
    pub fn set_rule_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.rules.iter_mut().find(|rule| rule.name == name) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// The configured rules, in evaluation order.
    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }

    /// Registers a custom rule object under its own name.
    pub fn register_custom(&mut self, rule: Box<dyn CustomRule>) {
        self.custom.insert(rule.name().to_string(), rule);
    }

    /// Registers `rule` and appends a [`RuleKind::Custom`] entry that runs it.
    pub fn add_custom_rule(&mut self, rule: Box<dyn CustomRule>) {
        let name = rule.name().to_string();
        self.register_custom(rule);
        self.add_rule(ValidationRule::new(name.clone(), RuleKind::Custom, name));
    }

    /// Runs every enabled rule against `name` and publishes the outcome.
    ///
    /// # Arguments
    ///
    /// * `name` - The resource to validate.
    /// * `loaded` - Which resources are accessible. A resource held at the
    ///   activation gate counts when the view says so.
    /// * `bus` - Receives `ValidationCompleted`, then `ValidationBlocked` when a
    ///   stored pass has a critical failure and blocking is enabled.
    ///
    /// # Returns
    ///
    /// The counts of this pass. A resource that is not accessible yields a
    /// single critical result without running any rule; that result is neither
    /// stored nor turned into a block, so it cannot outlive the call. Otherwise
    /// the results replace the previous history of `name`.
    pub fn validate_resource(
        &mut self,
        name: &str,
        loaded: &dyn LoadedResources,
        bus: &mut EventBus,
    ) -> ValidationSummary {
        let now = bus.clock().now();

        if !loaded.is_accessible(name) {
            let result = stamp(
                ValidationResult::fail(Severity::Critical, format!("Resource '{name}' is not loaded")),
                name,
                "loaded",
                now,
            );
            log::warn!("Skipping validation of '{name}': {}", result.message);
            let summary = ValidationSummary::from_results(std::slice::from_ref(&result));
            publish_completed(bus, name, &summary);
            return summary;
        }

        let results: Vec<ValidationResult> = self
            .rules
            .iter()
            .filter(|rule| rule.enabled)
            .map(|rule| self.run_rule(rule, name, now))
            .collect();

        for result in results.iter().filter(|result| !result.passed) {
            let level = match result.severity {
                Severity::Info => log::Level::Info,
                Severity::Warning => log::Level::Warn,
                Severity::Error | Severity::Critical => log::Level::Error,
            };
            log::log!(level, "Validation of '{name}' [{}]: {}", result.rule, result.message);
        }

        let summary = ValidationSummary::from_results(&results);
        let first_critical = results
            .iter()
            .find(|result| result.is_critical_failure())
            .map(|result| result.message.clone());
        self.history.insert(name.to_string(), results);

        log::info!(
            "Validated '{name}': {}/{} passed.",
            summary.passed,
            summary.total
        );
        publish_completed(bus, name, &summary);

        if self.config.block_on_critical {
            if let Some(message) = first_critical {
                log::warn!("Blocking '{name}': {message}");
                bus.trigger(EventKind::ValidationBlocked, name, EventPayload::Blocked { message });
            }
        }

        summary
    }

    /// The results of the latest pass over `name`.
    pub fn history(&self, name: &str) -> &[ValidationResult] {
        self.history.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Counts over the latest pass over `name`.
    pub fn summary(&self, name: &str) -> ValidationSummary {
        ValidationSummary::from_results(self.history(name))
    }

    /// Whether the latest pass over `name` produced a critical failure.
    pub fn has_critical_errors(&self, name: &str) -> bool {
        self.history(name)
            .iter()
            .any(ValidationResult::is_critical_failure)
    }

    /// The message of the first critical failure of the latest pass over `name`.
    pub fn first_critical(&self, name: &str) -> Option<&str> {
        self.history(name)
            .iter()
            .find(|result| result.is_critical_failure())
            .map(|result| result.message.as_str())
    }

    /// Fails with the most severe failure at or above `threshold` from the latest pass.
    pub fn check(&self, name: &str, threshold: Severity) -> StagehandResult<()> {
        let worst = self
            .history(name)
            .iter()
            .filter(|result| !result.passed && result.severity >= threshold)
            .max_by_key(|result| result.severity);
        match worst.and_then(ValidationResult::to_error) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Forgets the results for `name`.
    pub fn clear_history(&mut self, name: &str) {
        self.history.remove(name);
    }

    fn run_rule(&self, rule: &ValidationRule, resource: &str, now: Timestamp) -> ValidationResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.evaluate(rule, resource)))
            .unwrap_or_else(|payload| Err(anyhow!("rule panicked: {}", panic_message(payload.as_ref()))));

        let result = match outcome {
            Ok(result) => result,
            Err(error) => {
                log::debug!("Rule '{}' raised on '{resource}': {error:#}", rule.name);
                ValidationResult::fail(Severity::Error, format!("{error:#}"))
            }
        };
        stamp(result, resource, &rule.name, now)
    }

    fn evaluate(&self, rule: &ValidationRule, resource: &str) -> anyhow::Result<ValidationResult> {
        let graph = self.graph.as_ref();
        let (passed, details) = match rule.kind {
            RuleKind::Exists => {
                let target = if rule.expected.is_empty() {
                    resource
                } else {
                    rule.expected.as_str()
                };
                (self.catalog.contains(target), format!("catalog lookup of '{target}'"))
            }
            RuleKind::RequiredComponent => (
                graph.find_component(resource, &rule.expected)?,
                format!("component '{}'", rule.expected),
            ),
            RuleKind::RequiredTag => (
                graph.find_tagged(resource, &rule.expected)?,
                format!("tag '{}'", rule.expected),
            ),
            RuleKind::RequiredLayer => (
                graph.find_on_layer(resource, &rule.expected)?,
                format!("layer '{}'", rule.expected),
            ),
            RuleKind::MinCount | RuleKind::MaxCount => {
                let threshold: usize = rule
                    .expected
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid count threshold '{}'", rule.expected))?;
                let count = graph.count_all(resource)?;
                let passed = if rule.kind == RuleKind::MinCount {
                    count >= threshold
                } else {
                    count <= threshold
                };
                (passed, format!("{count} root object(s), threshold {threshold}"))
            }
            RuleKind::Custom => {
                let custom = self
                    .custom
                    .get(&rule.expected)
                    .ok_or_else(|| anyhow!("no custom rule registered as '{}'", rule.expected))?;
                return custom.validate(resource, graph);
            }
        };

        Ok(if passed {
            ValidationResult::pass(format!("Rule '{}' passed", rule.name)).with_details(details)
        } else {
            ValidationResult::fail(rule.failure_severity(), rule.failure_message()).with_details(details)
        })
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("config", &self.config)
            .field("rules", &self.rules)
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .field("history", &self.history.len())
            .finish()
    }
}

fn publish_completed(bus: &mut EventBus, name: &str, summary: &ValidationSummary) {
    bus.trigger(
        EventKind::ValidationCompleted,
        name,
        EventPayload::Validation {
            passed: summary.is_clean(),
            failures: summary.failures(),
            critical: summary.critical,
        },
    );
}

fn stamp(mut result: ValidationResult, resource: &str, rule: &str, now: Timestamp) -> ValidationResult {
    result.resource = resource.to_string();
    result.rule = rule.to_string();
    result.timestamp = now;
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::{
        Event, EventBusConfig, ManualClock, MemoryCatalog, ResourceTree, StagehandError,
        StaticResourceGraph,
    };
    use std::collections::HashSet;
    use std::sync::Arc;

    struct Loaded(HashSet<&'static str>);

    impl LoadedResources for Loaded {
        fn is_loaded(&self, name: &str) -> bool {
            self.0.contains(name)
        }
    }

    struct NeedsSpawnPoint;

    impl CustomRule for NeedsSpawnPoint {
        fn name(&self) -> &str {
            "spawn_point"
        }

        fn validate(&self, resource: &str, graph: &dyn ResourceGraph) -> anyhow::Result<ValidationResult> {
            if graph.find_tagged(resource, "Respawn")? {
                Ok(ValidationResult::pass("spawn point found"))
            } else {
                Ok(ValidationResult::fail(Severity::Error, "no spawn point"))
            }
        }
    }

    struct Exploding;

    impl CustomRule for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn validate(&self, _: &str, _: &dyn ResourceGraph) -> anyhow::Result<ValidationResult> {
            panic!("boom")
        }
    }

    fn fixture(config: ValidatorConfig) -> (Validator, Loaded, EventBus) {
        let mut graph = StaticResourceGraph::new();
        graph.insert(
            "Town",
            ResourceTree::default()
                .with_tag("Respawn")
                .with_component("Light")
                .with_layer("Water")
                .with_root_count(4),
        );
        graph.insert("Void", ResourceTree::default());
        let catalog = MemoryCatalog::new(["Town", "Void"]);

        let mut bus = EventBus::with_clock(
            EventBusConfig {
                async_processing: false,
                ..Default::default()
            },
            Arc::new(ManualClock::new(Timestamp::from_millis(5_000))),
        );
        bus.enable_journal();

        let validator = Validator::new(config, Box::new(graph), Box::new(catalog));
        (validator, Loaded(HashSet::from(["Town", "Void", "Ghost"])), bus)
    }

    fn kinds(events: &[Event]) -> Vec<EventKind> {
        events.iter().map(|event| event.kind).collect()
    }

    #[test]
    fn min_count_failure_is_a_warning_without_error_message() {
        let (mut validator, loaded, mut bus) = fixture(ValidatorConfig::default());
        validator.add_rule(ValidationRule::new("roots", RuleKind::MinCount, "1"));

        let summary = validator.validate_resource("Void", &loaded, &mut bus);
        assert_eq!(summary.warnings, 1);
        let result = &validator.history("Void")[0];
        assert!(!result.passed);
        assert_eq!(result.severity, Severity::Warning);
        assert_eq!(result.resource, "Void");
        assert_eq!(result.rule, "roots");
        assert_eq!(result.timestamp, Timestamp::from_millis(5_000));

        validator.add_rule(ValidationRule::new("roots", RuleKind::MinCount, "1").with_error("empty"));
        validator.validate_resource("Void", &loaded, &mut bus);
        assert_eq!(validator.history("Void")[0].severity, Severity::Error);
    }

    #[test]
    fn built_in_rules_query_the_graph() {
        let (mut validator, loaded, mut bus) = fixture(ValidatorConfig::default());
        validator.add_rule(ValidationRule::new("light", RuleKind::RequiredComponent, "Light"));
        validator.add_rule(ValidationRule::new("respawn", RuleKind::RequiredTag, "Respawn"));
        validator.add_rule(ValidationRule::new("water", RuleKind::RequiredLayer, "Water"));
        validator.add_rule(ValidationRule::new("max", RuleKind::MaxCount, "3"));
        validator.add_rule(ValidationRule::new("min", RuleKind::MinCount, " 4 "));

        let summary = validator.validate_resource("Town", &loaded, &mut bus);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.passed, 4);
        let max = &validator.history("Town")[3];
        assert_eq!(max.rule, "max");
        assert!(!max.passed);
        assert_eq!(max.details, "4 root object(s), threshold 3");
    }

    #[test]
    fn unparsable_threshold_is_an_error_result() {
        let (mut validator, loaded, mut bus) = fixture(ValidatorConfig::default());
        validator.add_rule(ValidationRule::new("min", RuleKind::MinCount, "many"));
        validator.add_rule(ValidationRule::new("respawn", RuleKind::RequiredTag, "Respawn"));

        let summary = validator.validate_resource("Town", &loaded, &mut bus);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.passed, 1);
        assert!(validator.history("Town")[0].message.contains("many"));
    }

    #[test]
    fn graph_errors_and_panics_are_isolated() {
        let (mut validator, loaded, mut bus) = fixture(ValidatorConfig::default());
        validator.add_rule(ValidationRule::new("respawn", RuleKind::RequiredTag, "Respawn"));
        validator.add_custom_rule(Box::new(Exploding));
        validator.add_rule(ValidationRule::new("light", RuleKind::RequiredComponent, "Light"));

        // "Ghost" is loaded but has no tree registered, so graph queries fail.
        let summary = validator.validate_resource("Ghost", &loaded, &mut bus);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.errors, 3);

        let summary = validator.validate_resource("Town", &loaded, &mut bus);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.errors, 1);
        assert!(validator.history("Town")[1].message.contains("boom"));
    }

    #[test]
    fn custom_rules_run_by_name() {
        let (mut validator, loaded, mut bus) = fixture(ValidatorConfig::default());
        validator.add_custom_rule(Box::new(NeedsSpawnPoint));

        validator.validate_resource("Town", &loaded, &mut bus);
        assert!(validator.history("Town")[0].passed);
        assert_eq!(validator.history("Town")[0].rule, "spawn_point");

        validator.validate_resource("Void", &loaded, &mut bus);
        assert_eq!(validator.history("Void")[0].message, "no spawn point");

        validator.add_rule(ValidationRule::new("missing", RuleKind::Custom, "unknown"));
        let summary = validator.validate_resource("Town", &loaded, &mut bus);
        assert_eq!(summary.errors, 1);
    }

    #[test]
    fn unloaded_resource_yields_single_critical_result_that_is_not_kept() {
        let (validator, loaded, mut bus) = fixture(ValidatorConfig::default());
        let mut validator = validator.with_default_rules();

        let summary = validator.validate_resource("Castle", &loaded, &mut bus);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.critical, 1);
        assert!(!summary.is_clean());
        assert!(!validator.has_critical_errors("Castle"));
        assert!(validator.history("Castle").is_empty());
        assert_eq!(kinds(&bus.take_journal()), vec![EventKind::ValidationCompleted]);
    }

    #[test]
    fn unloaded_pass_leaves_earlier_history_alone() {
        let (validator, loaded, mut bus) = fixture(ValidatorConfig::default());
        let mut validator = validator.with_default_rules();
        assert!(validator.validate_resource("Town", &loaded, &mut bus).is_clean());

        let nothing = Loaded(HashSet::new());
        let summary = validator.validate_resource("Town", &nothing, &mut bus);
        assert_eq!(summary.critical, 1);
        assert_eq!(validator.history("Town").len(), 1);
        assert!(validator.history("Town")[0].passed);
    }

    #[test]
    fn resource_held_at_the_gate_is_validated() {
        struct Gated;

        impl LoadedResources for Gated {
            fn is_loaded(&self, _: &str) -> bool {
                false
            }

            fn is_accessible(&self, name: &str) -> bool {
                name == "Town"
            }
        }

        let (validator, _, mut bus) = fixture(ValidatorConfig::default());
        let mut validator = validator.with_default_rules();
        validator.add_rule(ValidationRule::new("respawn", RuleKind::RequiredTag, "Respawn"));

        let summary = validator.validate_resource("Town", &Gated, &mut bus);
        assert_eq!(summary.total, 2);
        assert!(summary.is_clean());
        assert_eq!(validator.history("Town").len(), 2);
    }

    #[test]
    fn critical_failure_publishes_block_signal() {
        let (validator, _, mut bus) = fixture(ValidatorConfig::default());
        let mut validator = validator.with_default_rules();
        validator.add_rule(
            ValidationRule::new("camera", RuleKind::RequiredTag, "MainCamera").critical("no camera"),
        );
        let loaded = Loaded(HashSet::from(["Town"]));

        validator.validate_resource("Town", &loaded, &mut bus);
        let events = bus.take_journal();
        assert_eq!(
            kinds(&events),
            vec![EventKind::ValidationCompleted, EventKind::ValidationBlocked]
        );
        assert_eq!(
            events[0].payload,
            EventPayload::Validation {
                passed: false,
                failures: 1,
                critical: 1,
            }
        );
        assert_eq!(
            events[1].payload,
            EventPayload::Blocked {
                message: "no camera".to_string()
            }
        );
        assert_eq!(validator.first_critical("Town"), Some("no camera"));
        assert_eq!(
            validator.check("Town", Severity::Error),
            Err(StagehandError::ValidationFailure {
                severity: Severity::Critical,
                message: "no camera".to_string(),
            })
        );
    }

    #[test]
    fn blocking_policy_can_be_disabled() {
        let (mut validator, loaded, mut bus) = fixture(ValidatorConfig {
            block_on_critical: false,
        });
        validator.add_rule(
            ValidationRule::new("camera", RuleKind::RequiredTag, "MainCamera").critical("no camera"),
        );

        validator.validate_resource("Town", &loaded, &mut bus);
        assert_eq!(kinds(&bus.take_journal()), vec![EventKind::ValidationCompleted]);
        assert!(validator.has_critical_errors("Town"));
    }

    #[test]
    fn new_pass_replaces_history_and_disabled_rules_are_skipped() {
        let (mut validator, loaded, mut bus) = fixture(ValidatorConfig::default());
        validator.add_rule(
            ValidationRule::new("camera", RuleKind::RequiredTag, "MainCamera").critical("no camera"),
        );
        validator.validate_resource("Town", &loaded, &mut bus);
        assert!(validator.has_critical_errors("Town"));

        assert!(validator.set_rule_enabled("camera", false));
        let summary = validator.validate_resource("Town", &loaded, &mut bus);
        assert_eq!(summary.total, 0);
        assert!(!validator.has_critical_errors("Town"));
        assert_eq!(validator.check("Town", Severity::Warning), Ok(()));

        assert!(validator.remove_rule("camera").is_some());
        assert!(!validator.set_rule_enabled("camera", true));
        assert!(validator.rules().is_empty());
    }

    #[test]
    fn exists_rule_consults_the_catalog() {
        let (validator, _, mut bus) = fixture(ValidatorConfig::default());
        let mut validator = validator.with_default_rules();
        let loaded = Loaded(HashSet::from(["Town", "Rogue"]));

        assert!(validator.validate_resource("Town", &loaded, &mut bus).is_clean());
        let summary = validator.validate_resource("Rogue", &loaded, &mut bus);
        assert_eq!(summary.critical, 1);
        assert_eq!(
            validator.first_critical("Rogue"),
            Some("Resource is not part of the catalog")
        );
    }
}
