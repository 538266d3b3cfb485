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

//! The public-facing API of Stagehand.
//!
//! [`Director`] owns one instance of every component, advances them from a
//! single [`Director::tick`] call and wires the reactions between them: usage
//! is recorded when loads start and complete, completed loads trigger smart
//! preloading and, if configured, validation.

mod config;
mod director;

pub use config::StagehandConfig;
pub use director::{Director, DirectorBuilder};

/// Everything needed to drive a [`Director`] and subscribe to its events.
pub mod prelude {
    pub use crate::{Director, DirectorBuilder, StagehandConfig};
    pub use stagehand_core::{
        Catalog, Clock, Event, EventBus, EventBusConfig, EventKind, EventMask, EventPayload,
        LoadMode, LoadOperation, ManualClock, MemoryCatalog, ResourceGraph, ResourceLoader,
        ResourceState, ResourceTree, Severity, SimulatedLoader, StagehandError, StagehandResult,
        StaticResourceGraph, SystemClock, Timestamp,
    };
    pub use stagehand_lifecycle::{SchedulerConfig, UsageSnapshot};
    pub use stagehand_telemetry::{init_logging, MetricsRegistry};
    pub use stagehand_validation::{
        CustomRule, RuleKind, ValidationResult, ValidationRule, ValidationSummary, ValidatorConfig,
    };
}
