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

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stagehand_core::{EventBusConfig, StagehandError, StagehandResult};
use stagehand_lifecycle::SchedulerConfig;
use stagehand_validation::{ValidationRule, ValidatorConfig};

/// Every option recognized at composition time.
///
/// Missing fields take their defaults, so a RON file only needs to list what
/// it changes:
///
/// ```
/// # use stagehand_sdk::StagehandConfig;
/// let config = StagehandConfig::from_ron_str("(max_concurrent_preloads: 1)").unwrap();
/// assert_eq!(config.max_concurrent_preloads, 1);
/// assert!(config.enable_smart_preloading);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagehandConfig {
    /// Maximum number of preloads in flight at once. Must be at least 1.
    pub max_concurrent_preloads: usize,
    /// Enqueue usage-based recommendations whenever a load completes.
    pub enable_smart_preloading: bool,
    /// Number of recommendations enqueued per completed load.
    pub recommendation_count: usize,
    /// Time budget of a priority-0 preload.
    pub preload_timeout_base: Duration,
    /// Extra time budget per priority point.
    pub preload_timeout_per_priority: Duration,
    /// Queue events and dispatch them from `tick` instead of immediately.
    pub async_event_processing: bool,
    /// Maximum number of events dispatched per tick. Must be at least 1.
    pub max_events_per_frame: usize,
    /// Log every dispatched event at debug level.
    pub logging_enabled: bool,
    /// Publish a blocking signal and refuse activation after a critical failure.
    pub block_on_critical_errors: bool,
    /// Have the director validate every resource as soon as its load completes.
    pub validate_on_load: bool,
    /// Install the built-in catalog membership rule.
    pub default_rules: bool,
    /// Additional rules, evaluated after the built-in ones.
    pub rules: Vec<ValidationRule>,
    /// Count dispatched events in a metrics registry.
    pub metrics_enabled: bool,
}

impl Default for StagehandConfig {
    fn default() -> Self {
        let bus = EventBusConfig::default();
        let scheduler = SchedulerConfig::default();
        let validator = ValidatorConfig::default();
        Self {
            max_concurrent_preloads: scheduler.max_concurrent_preloads,
            enable_smart_preloading: scheduler.smart_preloading,
            recommendation_count: scheduler.recommendation_count,
            preload_timeout_base: scheduler.preload_timeout_base,
            preload_timeout_per_priority: scheduler.preload_timeout_per_priority,
            async_event_processing: bus.async_processing,
            max_events_per_frame: bus.max_events_per_frame,
            logging_enabled: bus.logging,
            block_on_critical_errors: validator.block_on_critical,
            validate_on_load: true,
            default_rules: true,
            rules: Vec::new(),
            metrics_enabled: false,
        }
    }
}

impl StagehandConfig {
    /// Parses and validates a RON document.
    pub fn from_ron_str(text: &str) -> StagehandResult<Self> {
        let config: Self =
            ron::from_str(text).map_err(|e| StagehandError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as pretty-printed RON.
    pub fn to_ron_string(&self) -> StagehandResult<String> {
        let pretty = ron::ser::PrettyConfig::default().indentor("  ".to_string());
        ron::ser::to_string_pretty(self, pretty)
            .map_err(|e| StagehandError::InvalidConfig(e.to_string()))
    }

    /// Rejects values no component can work with.
    pub fn validate(&self) -> StagehandResult<()> {
        if self.max_concurrent_preloads == 0 {
            return Err(StagehandError::InvalidConfig(
                "max_concurrent_preloads must be at least 1".to_string(),
            ));
        }
        if self.max_events_per_frame == 0 {
            return Err(StagehandError::InvalidConfig(
                "max_events_per_frame must be at least 1".to_string(),
            ));
        }
        if let Some(rule) = self.rules.iter().find(|rule| rule.name.is_empty()) {
            return Err(StagehandError::InvalidConfig(format!(
                "validation rule of kind {:?} has no name",
                rule.kind
            )));
        }
        Ok(())
    }

    /// The event bus part of the configuration.
    pub fn event_bus(&self) -> EventBusConfig {
        EventBusConfig {
            async_processing: self.async_event_processing,
            max_events_per_frame: self.max_events_per_frame,
            logging: self.logging_enabled,
        }
    }

    /// The scheduler part of the configuration.
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_preloads: self.max_concurrent_preloads,
            smart_preloading: self.enable_smart_preloading,
            recommendation_count: self.recommendation_count,
            preload_timeout_base: self.preload_timeout_base,
            preload_timeout_per_priority: self.preload_timeout_per_priority,
        }
    }

    /// The validator part of the configuration.
    pub fn validator(&self) -> ValidatorConfig {
        ValidatorConfig {
            block_on_critical: self.block_on_critical_errors,
        }
    }
}
