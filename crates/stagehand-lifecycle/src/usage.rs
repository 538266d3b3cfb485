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

//! Per-resource access statistics and the usage score used to rank preload candidates.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stagehand_core::{StagehandError, StagehandResult, Timestamp};

const FREQUENCY_WEIGHT: f32 = 0.7;
const RECENCY_WEIGHT: f32 = 0.3;
const RECENCY_WINDOW_HOURS: f32 = 24.0;

/// Blends access frequency with recency.
///
/// `0.7 * frequency + 0.3 * max(0, 1 - hours_since_last_access / 24)`
pub fn usage_score(frequency: f32, since_last_access: Duration) -> f32 {
    let hours = since_last_access.as_secs_f32() / 3600.0;
    let recency = (1.0 - hours / RECENCY_WINDOW_HOURS).max(0.0);
    FREQUENCY_WEIGHT * frequency + RECENCY_WEIGHT * recency
}

/// Access statistics for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStat {
    /// The resource name.
    pub name: String,
    /// How many times the resource was used. Never decreases.
    pub frequency: f32,
    /// When the resource was last touched.
    pub last_access: Timestamp,
}

impl UsageStat {
    /// The usage score of this resource at `now`.
    pub fn score(&self, now: Timestamp) -> f32 {
        usage_score(self.frequency, now.saturating_duration_since(self.last_access))
    }
}

/// One persisted entry of a [`UsageSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Accumulated frequency.
    pub frequency: f32,
    /// Last access, in milliseconds since the clock epoch.
    pub last_access_ms: u64,
}

/// The usage map as handed to the persistence layer.
///
/// The checksum is the leading eight bytes of a BLAKE3 digest over the
/// entries, so a snapshot written by one build verifies on any other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Usage per resource name.
    pub entries: BTreeMap<String, UsageRecord>,
    /// Checksum over `entries`.
    pub checksum: u64,
}

impl UsageSnapshot {
    /// Builds a snapshot and stamps it with its checksum.
    pub fn new(entries: BTreeMap<String, UsageRecord>) -> Self {
        let checksum = Self::compute_checksum(&entries);
        Self { entries, checksum }
    }

    /// Computes the checksum of `entries`.
    ///
    /// Each entry is fed in name order as: name length (`u64` LE), name
    /// bytes, frequency bits (`u32` LE), last access (`u64` LE).
    pub fn compute_checksum(entries: &BTreeMap<String, UsageRecord>) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for (name, record) in entries {
            hasher.update(&(name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            hasher.update(&record.frequency.to_bits().to_le_bytes());
            hasher.update(&record.last_access_ms.to_le_bytes());
        }
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(head)
    }

    /// Checks the stored checksum against the contents.
    pub fn verify(&self) -> StagehandResult<()> {
        let actual = Self::compute_checksum(&self.entries);
        if actual == self.checksum {
            Ok(())
        } else {
            Err(StagehandError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            })
        }
    }
}

/// Tracks how often and how recently each resource is used.
///
/// Entries are created on first touch and never removed during a session.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    stats: BTreeMap<String, UsageStat>,
}

impl UsageTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refreshes the last-access time of `name` without counting a use.
    pub fn touch(&mut self, name: &str, now: Timestamp) {
        self.entry(name, now).last_access = now;
    }

    /// Counts one use of `name` at `now`.
    pub fn record_access(&mut self, name: &str, now: Timestamp) {
        let stat = self.entry(name, now);
        stat.frequency += 1.0;
        stat.last_access = now;
        log::trace!("Usage of '{name}' is now {:.1}.", stat.frequency);
    }

    /// Statistics for `name`, if it was ever touched.
    pub fn stat(&self, name: &str) -> Option<&UsageStat> {
        self.stats.get(name)
    }

    /// Frequency of `name`, zero if unknown.
    pub fn frequency(&self, name: &str) -> f32 {
        self.stats.get(name).map_or(0.0, |stat| stat.frequency)
    }

    /// Usage score of `name` at `now`, if it was ever touched.
    pub fn score(&self, name: &str, now: Timestamp) -> Option<f32> {
        self.stats.get(name).map(|stat| stat.score(now))
    }

    /// Every known resource with its score, best first.
    ///
    /// Equal scores are ordered by name.
    pub fn ranked(&self, now: Timestamp) -> Vec<(String, f32)> {
        let mut ranked: Vec<(String, f32)> = self
            .stats
            .values()
            .map(|stat| (stat.name.clone(), stat.score(now)))
            .collect();
        // `stats` iterates in name order and the sort is stable.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    /// Iterates over all statistics in name order.
    pub fn iter(&self) -> impl Iterator<Item = &UsageStat> {
        self.stats.values()
    }

    /// Number of known resources.
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    /// Whether no resource was ever touched.
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Exports the usage map for persistence.
    pub fn snapshot(&self) -> UsageSnapshot {
        let entries = self
            .stats
            .values()
            .map(|stat| {
                (
                    stat.name.clone(),
                    UsageRecord {
                        frequency: stat.frequency,
                        last_access_ms: stat.last_access.as_millis(),
                    },
                )
            })
            .collect();
        UsageSnapshot::new(entries)
    }

    /// Merges a persisted snapshot into the tracker.
    ///
    /// Merged frequencies never go down.
    ///
    /// ## Returns
    /// * The number of entries merged.
    /// ## Errors
    /// * `ChecksumMismatch` if the snapshot was altered. It is discarded as a
    ///   whole and the tracker is left untouched.
    pub fn restore(&mut self, snapshot: &UsageSnapshot) -> StagehandResult<usize> {
        snapshot.verify()?;
        for (name, record) in &snapshot.entries {
            let last_access = Timestamp::from_millis(record.last_access_ms);
            let stat = self.stats.entry(name.clone()).or_insert_with(|| UsageStat {
                name: name.clone(),
                frequency: 0.0,
                last_access,
            });
            stat.frequency = stat.frequency.max(record.frequency);
            stat.last_access = stat.last_access.max(last_access);
        }
        log::info!("Restored usage for {} resource(s).", snapshot.entries.len());
        Ok(snapshot.entries.len())
    }

    fn entry(&mut self, name: &str, now: Timestamp) -> &mut UsageStat {
        self.stats
            .entry(name.to_string())
            .or_insert_with(|| UsageStat {
                name: name.to_string(),
                frequency: 0.0,
                last_access: now,
            })
    }
}
