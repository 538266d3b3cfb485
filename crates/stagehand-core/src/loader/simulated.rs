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

//! An in-memory [`ResourceLoader`] that advances a fixed step per poll.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{LoadMode, LoadOperation, ResourceLoader, ACTIVATION_THRESHOLD};

/// A record of every operation a [`SimulatedLoader`] was asked to start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoaderLog {
    /// Every successfully started load, in order.
    pub loads: Vec<(String, LoadMode)>,
    /// Every successfully started unload, in order.
    pub unloads: Vec<String>,
    /// Every start request that was refused.
    pub refused: Vec<String>,
}

impl LoaderLog {
    /// Number of loads started for `name`.
    pub fn load_count(&self, name: &str) -> usize {
        self.loads.iter().filter(|(n, _)| n == name).count()
    }
}

#[derive(Debug, Default)]
struct LoaderState {
    log: LoaderLog,
    failing: HashSet<String>,
}

/// A loader with no backing storage.
///
/// Each [`LoadOperation::poll`] advances an operation by `step`. Clones share
/// the operation log and the set of names configured to fail, so a handle kept
/// outside the registry can inspect what happened.
#[derive(Debug, Clone)]
pub struct SimulatedLoader {
    step: f32,
    state: Arc<Mutex<LoaderState>>,
}

impl SimulatedLoader {
    /// Creates a loader advancing operations by `step` per poll (clamped to `(0, 1]`).
    pub fn new(step: f32) -> Self {
        Self {
            step: step.clamp(f32::EPSILON, 1.0),
            state: Arc::new(Mutex::new(LoaderState::default())),
        }
    }

    /// Makes every future start request for `name` return `None`.
    pub fn fail_on(&self, name: impl Into<String>) {
        self.lock().failing.insert(name.into());
    }

    /// Returns a copy of the operation log.
    pub fn log(&self) -> LoaderLog {
        self.lock().log.clone()
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SimulatedLoader {
    fn default() -> Self {
        Self::new(0.25)
    }
}

impl ResourceLoader for SimulatedLoader {
    fn start_load(&mut self, name: &str, mode: LoadMode) -> Option<Box<dyn LoadOperation>> {
        let mut state = self.lock();
        if state.failing.contains(name) {
            state.log.refused.push(name.to_string());
            return None;
        }
        state.log.loads.push((name.to_string(), mode));
        Some(Box::new(SimulatedOperation::new(self.step, true)))
    }

    fn start_unload(&mut self, name: &str) -> Option<Box<dyn LoadOperation>> {
        let mut state = self.lock();
        if state.failing.contains(name) {
            state.log.refused.push(name.to_string());
            return None;
        }
        state.log.unloads.push(name.to_string());
        Some(Box::new(SimulatedOperation::new(self.step, false)))
    }
}

#[derive(Debug)]
struct SimulatedOperation {
    step: f32,
    progress: f32,
    gated: bool,
    activation_allowed: bool,
    done: bool,
}

impl SimulatedOperation {
    fn new(step: f32, gated: bool) -> Self {
        Self {
            step,
            progress: 0.0,
            gated,
            activation_allowed: true,
            done: false,
        }
    }
}

impl LoadOperation for SimulatedOperation {
    fn poll(&mut self) {
        if self.done {
            return;
        }
        let ceiling = if self.gated && !self.activation_allowed {
            ACTIVATION_THRESHOLD
        } else {
            1.0
        };
        self.progress = (self.progress + self.step).min(ceiling);
        if self.progress >= 1.0 {
            self.done = true;
        }
    }

    fn progress(&self) -> f32 {
        self.progress
    }

    fn set_activation_allowed(&mut self, allowed: bool) {
        self.activation_allowed = allowed;
    }

    fn activation_allowed(&self) -> bool {
        self.activation_allowed
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
