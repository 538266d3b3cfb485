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

//! Defines the error taxonomy shared by every Stagehand subsystem.
//!
//! Most of these errors are not only returned to the caller but also published
//! on the [`EventBus`](crate::event::EventBus) as failure events, so that
//! observers that never see the `Result` still learn about the outcome.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The tier assigned to a validation outcome.
///
/// Tiers are ordered: `Info < Warning < Error < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Informational; attached to passing results.
    Info,
    /// Something is off but the resource is usable.
    Warning,
    /// The resource violates a configured expectation.
    Error,
    /// The resource must not progress further while the blocking policy is on.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// A failure produced by the lifecycle, scheduling, dispatch or validation layers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StagehandError {
    /// The resource name was empty.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// A load or unload for this resource is already in flight.
    #[error("Resource '{0}' is already transitioning")]
    AlreadyTransitioning(String),
    /// The resource is already loaded.
    #[error("Resource '{0}' is already loaded")]
    AlreadyLoaded(String),
    /// The resource loader refused to start the operation.
    #[error("Resource loader could not start an operation for '{0}'")]
    OperationStartFailed(String),
    /// A preload exceeded its time budget.
    #[error("Preload of '{name}' timed out after {budget:?}")]
    Timeout {
        /// The resource that was being preloaded.
        name: String,
        /// The budget that was exceeded.
        budget: Duration,
    },
    /// A validation rule failed.
    #[error("Validation failed ({severity}): {message}")]
    ValidationFailure {
        /// The severity of the failing result.
        severity: Severity,
        /// The human-readable message of the failing result.
        message: String,
    },
    /// A subscriber faulted while handling an event.
    #[error("Callback failed: {0}")]
    CallbackException(String),
    /// The blocking policy refused to let the resource progress.
    #[error("Resource '{name}' is blocked by a critical validation failure: {message}")]
    Blocked {
        /// The blocked resource.
        name: String,
        /// The message of the first critical failure.
        message: String,
    },
    /// A configuration value is out of range or could not be parsed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// A persisted snapshot does not match its checksum.
    #[error("Checksum mismatch: expected {expected:#018x}, computed {actual:#018x}")]
    ChecksumMismatch {
        /// The checksum stored with the snapshot.
        expected: u64,
        /// The checksum computed from the snapshot contents.
        actual: u64,
    },
}

/// A specialized `Result` type for Stagehand operations.
pub type StagehandResult<T> = Result<T, StagehandError>;
