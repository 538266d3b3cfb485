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

//! Abstract interface to the primitive that streams resource bytes into memory.
//!
//! The loader itself is an external collaborator: an engine backend, a file
//! streamer, or the in-memory [`SimulatedLoader`]. The lifecycle registry only
//! ever talks to it through these traits.

mod simulated;

pub use simulated::{LoaderLog, SimulatedLoader};

use serde::{Deserialize, Serialize};

/// Progress at which a load operation waits for activation.
pub const ACTIVATION_THRESHOLD: f32 = 0.9;

/// How a resource should be combined with what is already loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoadMode {
    /// Replace the active content.
    #[default]
    Single,
    /// Add to the active content.
    Additive,
}

/// A handle to an asynchronous load or unload started by a [`ResourceLoader`].
///
/// Load operations honour an activation gate: while activation is withheld
/// they stop at [`ACTIVATION_THRESHOLD`] and never report completion.
pub trait LoadOperation: Send {
    /// Advances the operation by one scheduling step.
    ///
    /// Loaders that make progress on their own (a streaming thread, an engine
    /// backend) can leave this as a no-op.
    fn poll(&mut self) {}

    /// Progress in `[0, 1]`.
    fn progress(&self) -> f32;

    /// Opens or closes the activation gate.
    fn set_activation_allowed(&mut self, allowed: bool);

    /// Whether the activation gate is open.
    fn activation_allowed(&self) -> bool;

    /// Whether the operation has finished.
    fn is_done(&self) -> bool;
}

/// Starts load and unload operations for named resources.
pub trait ResourceLoader: Send {
    /// Starts loading `name`. Returns `None` if the operation could not be started.
    fn start_load(&mut self, name: &str, mode: LoadMode) -> Option<Box<dyn LoadOperation>>;

    /// Starts unloading `name`. Returns `None` if the operation could not be started.
    fn start_unload(&mut self, name: &str) -> Option<Box<dyn LoadOperation>>;
}
