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

//! Resource lifecycle management.
//!
//! - [`UsageTracker`] keeps per-resource access frequency and recency.
//! - [`LifecycleRegistry`] owns every [`ResourceHandle`](stagehand_core::ResourceHandle)
//!   and drives load, unload and preload operations through the external loader.
//! - [`PreloadScheduler`] runs preloads under a concurrency limit and derives
//!   recommendations from usage scores.
//!
//! All three advance through explicit `tick` calls; nothing here spawns a thread.

#![warn(missing_docs)]

pub mod registry;
pub mod scheduler;
pub mod usage;

pub use registry::LifecycleRegistry;
pub use stagehand_core::ACTIVATION_THRESHOLD;
pub use scheduler::{PreloadRequest, PreloadScheduler, SchedulerConfig};
pub use usage::{usage_score, UsageRecord, UsageSnapshot, UsageStat, UsageTracker};
