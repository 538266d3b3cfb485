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

//! Counters fed by the event bus.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use stagehand_core::{Event, EventBus, EventKind, EventListener, EventMask, ListenerId};

/// Namespace of the counters maintained by [`EventMetrics`].
pub const EVENTS_NAMESPACE: &str = "stagehand.events";

/// Identifies a counter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MetricId {
    /// Groups related counters, e.g. `stagehand.events`.
    pub namespace: String,
    /// The counter name within its namespace.
    pub name: String,
}

impl MetricId {
    /// Creates an identifier.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// Thread-safe store of monotonically increasing counters.
///
/// Share it through an `Arc`; every clone of a [`CounterHandle`] writes to
/// the same registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<MetricId, u64>>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a counter at zero (or keeps its value) and returns a handle to it.
    pub fn register_counter(
        self: &Arc<Self>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> CounterHandle {
        let id = MetricId::new(namespace, name);
        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_insert(0);
        CounterHandle {
            id,
            registry: Arc::clone(self),
        }
    }

    /// The value of the counter `id`, if registered.
    pub fn counter(&self, id: &MetricId) -> Option<u64> {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }

    /// All counters in `namespace`, by name.
    pub fn namespace(&self, namespace: &str) -> BTreeMap<String, u64> {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(id, _)| id.namespace == namespace)
            .map(|(id, value)| (id.name.clone(), *value))
            .collect()
    }

    /// A copy of every counter.
    pub fn snapshot(&self) -> BTreeMap<MetricId, u64> {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of registered counters.
    pub fn len(&self) -> usize {
        self.counters.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no counter is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add(&self, id: &MetricId, delta: u64) {
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        let value = counters.entry(id.clone()).or_insert(0);
        *value = value.saturating_add(delta);
    }
}

/// A cheap handle to one counter.
#[derive(Debug, Clone)]
pub struct CounterHandle {
    id: MetricId,
    registry: Arc<MetricsRegistry>,
}

impl CounterHandle {
    /// The counter's identifier.
    pub fn id(&self) -> &MetricId {
        &self.id
    }

    /// Adds one.
    pub fn increment(&self) {
        self.registry.add(&self.id, 1);
    }

    /// The current value.
    pub fn get(&self) -> u64 {
        self.registry.counter(&self.id).unwrap_or(0)
    }
}

/// An [`EventListener`] that counts dispatched events per kind.
///
/// Counters live in [`EVENTS_NAMESPACE`] under the snake_case kind name,
/// plus `total` and `failures` (every `*_failed` kind and `validation_blocked`).
#[derive(Debug)]
pub struct EventMetrics {
    per_kind: Vec<CounterHandle>,
    total: CounterHandle,
    failures: CounterHandle,
}

impl EventMetrics {
    /// Registers the event counters in `registry`.
    pub fn new(registry: &Arc<MetricsRegistry>) -> Self {
        Self {
            per_kind: EventKind::ALL
                .iter()
                .map(|kind| registry.register_counter(EVENTS_NAMESPACE, kind.name()))
                .collect(),
            total: registry.register_counter(EVENTS_NAMESPACE, "total"),
            failures: registry.register_counter(EVENTS_NAMESPACE, "failures"),
        }
    }

    /// Attaches a counting listener for every event kind to `bus`.
    pub fn attach(registry: &Arc<MetricsRegistry>, bus: &mut EventBus) -> ListenerId {
        bus.add_listener(EventMask::ALL, None, Self::new(registry))
    }
}

impl EventListener for EventMetrics {
    fn on_event(&mut self, event: &Event) -> anyhow::Result<()> {
        self.per_kind[event.kind.index()].increment();
        self.total.increment();
        if matches!(
            event.kind,
            EventKind::LoadFailed
                | EventKind::UnloadFailed
                | EventKind::PreloadFailed
                | EventKind::ValidationBlocked
        ) {
            self.failures.increment();
        }
        Ok(())
    }
}
