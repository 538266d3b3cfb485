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

//! Per-resource bookkeeping types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a tracked resource.
///
/// Resources that are not tracked at all are implicitly `Unloaded`; the
/// registry drops the handle once an unload completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceState {
    /// Not in memory.
    Unloaded,
    /// A load (or preload) operation is in flight.
    Loading,
    /// Fully loaded and activated.
    Loaded,
    /// An unload operation is in flight.
    Unloading,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The registry's record for a single named resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    name: String,
    state: ResourceState,
    preloaded: bool,
}

impl ResourceHandle {
    /// Creates a handle in the `Unloaded` state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ResourceState::Unloaded,
            preloaded: false,
        }
    }

    /// The resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Whether the resource is held at the activation gate.
    pub fn is_preloaded(&self) -> bool {
        self.preloaded
    }

    /// Moves the handle to `state`.
    ///
    /// Leaving `Loading` always clears the preloaded flag.
    pub fn set_state(&mut self, state: ResourceState) {
        self.state = state;
        if state != ResourceState::Loading {
            self.preloaded = false;
        }
    }

    /// Marks the handle as held at the activation gate, which puts it in `Loading`.
    pub fn mark_preloaded(&mut self, preloaded: bool) {
        if preloaded {
            self.state = ResourceState::Loading;
        }
        self.preloaded = preloaded;
    }
}

/// Read-only view of which resources are currently loaded and usable.
///
/// Implemented by the lifecycle registry and consumed by the validator, which
/// must not depend on the registry itself.
pub trait LoadedResources {
    /// Returns `true` if `name` is fully loaded.
    fn is_loaded(&self, name: &str) -> bool;

    /// Returns `true` if the content of `name` is in memory and can be
    /// inspected, even if it has not been activated yet.
    fn is_accessible(&self, name: &str) -> bool {
        self.is_loaded(name)
    }
}
