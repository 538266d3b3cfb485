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

//! Event kinds, masks and payloads.

use std::fmt;
use std::ops::BitOr;

use crate::clock::Timestamp;
use crate::error::StagehandError;

/// Every kind of event the system publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// A load operation was started (or took over a preload).
    LoadStarted,
    /// A load operation reported progress.
    LoadProgress,
    /// A load operation finished and the resource is active.
    LoadCompleted,
    /// A load request was rejected or could not be started.
    LoadFailed,
    /// An unload operation was started.
    UnloadStarted,
    /// An unload operation finished and the resource is no longer tracked.
    UnloadCompleted,
    /// An unload operation could not be started.
    UnloadFailed,
    /// A preload operation was started.
    PreloadStarted,
    /// A preload reached the activation gate.
    PreloadCompleted,
    /// A preload could not be started or exceeded its time budget.
    PreloadFailed,
    /// A validation pass finished.
    ValidationCompleted,
    /// A validation pass found a critical failure while the blocking policy is on.
    ValidationBlocked,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [EventKind; 12] = [
        EventKind::LoadStarted,
        EventKind::LoadProgress,
        EventKind::LoadCompleted,
        EventKind::LoadFailed,
        EventKind::UnloadStarted,
        EventKind::UnloadCompleted,
        EventKind::UnloadFailed,
        EventKind::PreloadStarted,
        EventKind::PreloadCompleted,
        EventKind::PreloadFailed,
        EventKind::ValidationCompleted,
        EventKind::ValidationBlocked,
    ];

    /// The number of kinds.
    pub const COUNT: usize = Self::ALL.len();

    /// A dense index in `0..COUNT`.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The single-kind mask for this kind.
    pub const fn mask(self) -> EventMask {
        EventMask::EMPTY.with(self)
    }

    /// A stable, human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            EventKind::LoadStarted => "load_started",
            EventKind::LoadProgress => "load_progress",
            EventKind::LoadCompleted => "load_completed",
            EventKind::LoadFailed => "load_failed",
            EventKind::UnloadStarted => "unload_started",
            EventKind::UnloadCompleted => "unload_completed",
            EventKind::UnloadFailed => "unload_failed",
            EventKind::PreloadStarted => "preload_started",
            EventKind::PreloadCompleted => "preload_completed",
            EventKind::PreloadFailed => "preload_failed",
            EventKind::ValidationCompleted => "validation_completed",
            EventKind::ValidationBlocked => "validation_blocked",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of [`EventKind`]s a listener record subscribes to.
///
/// Bit `i` stands for the kind whose [`EventKind::index`] is `i`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u32);

impl EventMask {
    /// No kind at all.
    pub const EMPTY: EventMask = EventMask(0);

    /// Every kind.
    pub const ALL: EventMask = EventMask((1 << EventKind::COUNT) - 1);

    /// Every load-related kind.
    pub const LOADING: EventMask = EventMask::of(&[
        EventKind::LoadStarted,
        EventKind::LoadProgress,
        EventKind::LoadCompleted,
        EventKind::LoadFailed,
    ]);

    /// Every failure or blocking kind.
    pub const FAILURES: EventMask = EventMask::of(&[
        EventKind::LoadFailed,
        EventKind::UnloadFailed,
        EventKind::PreloadFailed,
        EventKind::ValidationBlocked,
    ]);

    /// The mask holding exactly `kinds`.
    pub const fn of(kinds: &[EventKind]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < kinds.len() {
            bits |= 1 << kinds[i].index();
            i += 1;
        }
        EventMask(bits)
    }

    /// The raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether `kind` is part of the mask.
    pub const fn matches(self, kind: EventKind) -> bool {
        self.0 & (1 << kind.index()) != 0
    }

    /// The mask with `kind` added.
    #[must_use]
    pub const fn with(self, kind: EventKind) -> Self {
        EventMask(self.0 | 1 << kind.index())
    }

    /// The kinds in the mask, in declaration order.
    pub fn kinds(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(move |kind| self.matches(*kind))
    }
}

impl From<EventKind> for EventMask {
    fn from(kind: EventKind) -> Self {
        kind.mask()
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, other: Self) -> Self {
        EventMask(self.0 | other.0)
    }
}

impl BitOr<EventKind> for EventMask {
    type Output = Self;

    fn bitor(self, kind: EventKind) -> Self {
        self.with(kind)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventMask(")?;
        if *self == EventMask::ALL {
            f.write_str("ALL")?;
        } else {
            for (i, kind) in self.kinds().enumerate() {
                if i > 0 {
                    f.write_str(" | ")?;
                }
                f.write_str(kind.name())?;
            }
        }
        f.write_str(")")
    }
}

/// Data attached to an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// No data.
    None,
    /// Load progress in `[0, 1]`.
    Progress(f32),
    /// The error behind a failure event.
    Failure {
        /// What went wrong.
        error: StagehandError,
    },
    /// The outcome of a validation pass.
    Validation {
        /// `true` if no rule failed.
        passed: bool,
        /// Number of failed results.
        failures: usize,
        /// Number of failed results with `Critical` severity.
        critical: usize,
    },
    /// The message of the critical failure that triggered a block.
    Blocked {
        /// The first critical failure's message.
        message: String,
    },
    /// Free-form data posted by an application through an [`EventSender`](super::EventSender).
    Custom(String),
}

/// An immutable record of something that happened to a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// The resource it happened to.
    pub resource: String,
    /// Attached data.
    pub payload: EventPayload,
    /// When it happened.
    pub timestamp: Timestamp,
}

impl Event {
    /// Creates an event.
    pub fn new(
        kind: EventKind,
        resource: impl Into<String>,
        payload: EventPayload,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            kind,
            resource: resource.into(),
            payload,
            timestamp,
        }
    }

    /// The progress value, if this is a progress event.
    pub fn progress(&self) -> Option<f32> {
        match self.payload {
            EventPayload::Progress(value) => Some(value),
            _ => None,
        }
    }

    /// The error, if this is a failure event.
    pub fn error(&self) -> Option<&StagehandError> {
        match &self.payload {
            EventPayload::Failure { error } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_masks_are_single_bits() {
        for (i, kind) in EventKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(kind.mask().bits(), 1 << i);
            assert!(EventMask::ALL.matches(*kind));
        }
        assert_eq!(EventMask::ALL.kinds().count(), EventKind::COUNT);
    }

    #[test]
    fn loading_mask_excludes_other_kinds() {
        assert!(EventMask::LOADING.matches(EventKind::LoadProgress));
        assert!(!EventMask::LOADING.matches(EventKind::UnloadStarted));
        assert!(!EventMask::EMPTY.matches(EventKind::LoadStarted));
    }

    #[test]
    fn masks_combine_kinds() {
        let mask = EventKind::LoadCompleted.mask() | EventKind::PreloadFailed;
        assert!(mask.matches(EventKind::LoadCompleted));
        assert!(mask.matches(EventKind::PreloadFailed));
        assert!(!mask.matches(EventKind::LoadFailed));
        assert_eq!(mask | EventMask::FAILURES, EventMask::FAILURES.with(EventKind::LoadCompleted));
        assert_eq!(
            format!("{mask:?}"),
            "EventMask(load_completed | preload_failed)"
        );
        assert_eq!(format!("{:?}", EventMask::ALL), "EventMask(ALL)");
        assert_eq!(format!("{:?}", EventMask::EMPTY), "EventMask()");
    }

    #[test]
    fn payload_accessors() {
        let event = Event::new(
            EventKind::LoadProgress,
            "Harbor",
            EventPayload::Progress(0.5),
            Timestamp::ZERO,
        );
        assert_eq!(event.progress(), Some(0.5));
        assert!(event.error().is_none());

        let failed = Event::new(
            EventKind::LoadFailed,
            "",
            EventPayload::Failure {
                error: StagehandError::InvalidArgument("empty resource name".into()),
            },
            Timestamp::ZERO,
        );
        assert!(matches!(
            failed.error(),
            Some(StagehandError::InvalidArgument(_))
        ));
    }
}
