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

//! # Stagehand Core
//!
//! Foundational crate containing the resource contracts, the event model and
//! the event bus shared by every Stagehand subsystem.
//!
//! Nothing in this crate knows how resources are scheduled or validated; it only
//! defines the "common language" (names, states, events, collaborator traits)
//! that the lifecycle, validation and SDK crates speak.

#![warn(missing_docs)]

pub mod clock;
pub mod error;
pub mod event;
pub mod graph;
pub mod loader;
pub mod resource;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use error::{Severity, StagehandError, StagehandResult};
pub use event::{
    CallbackId, Event, EventBus, EventBusConfig, EventKind, EventListener, EventMask,
    EventPayload, EventSender, ListenerId,
};
pub use graph::{Catalog, MemoryCatalog, ResourceGraph, ResourceTree, StaticResourceGraph};
pub use loader::{
    LoadMode, LoadOperation, ResourceLoader, SimulatedLoader, ACTIVATION_THRESHOLD,
};
pub use resource::{LoadedResources, ResourceHandle, ResourceState};
