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

//! The composition root.

use std::sync::Arc;
use std::time::Duration;

use stagehand_core::{
    Catalog, Clock, Event, EventBus, EventKind, EventPayload, LoadMode, MemoryCatalog,
    ResourceGraph, ResourceLoader, StagehandError, StagehandResult, StaticResourceGraph,
    SystemClock, Timestamp,
};
use stagehand_lifecycle::{LifecycleRegistry, PreloadScheduler, UsageSnapshot, UsageTracker};
use stagehand_telemetry::{EventMetrics, MetricsRegistry};
use stagehand_validation::{ValidationSummary, Validator};

use crate::config::StagehandConfig;

/// Assembles a [`Director`] from a configuration and its collaborators.
pub struct DirectorBuilder {
    config: StagehandConfig,
    loader: Box<dyn ResourceLoader>,
    graph: Box<dyn ResourceGraph>,
    catalog: Box<dyn Catalog>,
    clock: Arc<dyn Clock>,
    usage: Option<UsageSnapshot>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl DirectorBuilder {
    /// Sets the object-tree collaborator used by validation rules.
    pub fn with_graph(mut self, graph: impl ResourceGraph + 'static) -> Self {
        self.graph = Box::new(graph);
        self
    }

    /// Sets the catalog consulted by `Exists` rules.
    pub fn with_catalog(mut self, catalog: impl Catalog + 'static) -> Self {
        self.catalog = Box::new(catalog);
        self
    }

    /// Sets the time source for events, usage and preload timeouts.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seeds the usage tracker from a snapshot saved by [`Director::shutdown`].
    pub fn with_usage(mut self, snapshot: UsageSnapshot) -> Self {
        self.usage = Some(snapshot);
        self
    }

    /// Counts dispatched events in `registry`, regardless of `metrics_enabled`.
    pub fn with_metrics(mut self, registry: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Validates the configuration and builds the director.
    ///
    /// Fails with `ChecksumMismatch` if the usage snapshot was altered.
    pub fn build(self) -> StagehandResult<Director> {
        self.config.validate()?;

        let mut tracker = UsageTracker::new();
        if let Some(snapshot) = &self.usage {
            tracker.restore(snapshot)?;
        }

        let mut bus = EventBus::with_clock(self.config.event_bus(), Arc::clone(&self.clock));
        bus.enable_journal();

        let metrics = self
            .metrics
            .or_else(|| self.config.metrics_enabled.then(|| Arc::new(MetricsRegistry::new())));
        if let Some(registry) = &metrics {
            EventMetrics::attach(registry, &mut bus);
        }

        let mut validator = Validator::new(self.config.validator(), self.graph, self.catalog);
        if self.config.default_rules {
            validator = validator.with_default_rules();
        }
        for rule in &self.config.rules {
            validator.add_rule(rule.clone());
        }

        log::info!(
            "Director ready ({} preload slot(s), {} event(s) per frame, {} rule(s)).",
            self.config.max_concurrent_preloads,
            self.config.max_events_per_frame,
            validator.rules().len()
        );

        Ok(Director {
            registry: LifecycleRegistry::with_boxed_loader(self.loader),
            scheduler: PreloadScheduler::new(self.config.scheduler()),
            clock: self.clock,
            config: self.config,
            bus,
            tracker,
            validator,
            metrics,
        })
    }
}

/// Owns every component and advances them together.
///
/// Every operation returns its outcome and also publishes it on the bus.
/// Call [`tick`](Self::tick) once per frame.
pub struct Director {
    config: StagehandConfig,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    registry: LifecycleRegistry,
    scheduler: PreloadScheduler,
    tracker: UsageTracker,
    validator: Validator,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Director {
    /// Starts building a director that loads through `loader`.
    pub fn builder(config: StagehandConfig, loader: impl ResourceLoader + 'static) -> DirectorBuilder {
        DirectorBuilder {
            config,
            loader: Box::new(loader),
            graph: Box::new(StaticResourceGraph::new()),
            catalog: Box::new(MemoryCatalog::default()),
            clock: Arc::new(SystemClock),
            usage: None,
            metrics: None,
        }
    }

    /// Loads `name`. See [`LifecycleRegistry::load`].
    ///
    /// Taking over a pending preload counts as activating it, so it is refused
    /// the same way [`activate`](Self::activate) is.
    pub fn load(&mut self, name: &str, mode: LoadMode) -> StagehandResult<()> {
        if self.registry.is_preloaded(name) {
            self.ensure_not_blocked(name)?;
        }
        let result = self.registry.load(name, mode, &mut self.bus);
        self.react();
        result
    }

    /// Unloads `name`. Returns `false` if there was nothing to do.
    pub fn unload(&mut self, name: &str) -> StagehandResult<bool> {
        let result = self.registry.unload(name, &mut self.bus);
        self.react();
        result
    }

    /// Starts preloading `name` now if a scheduler slot is free, otherwise
    /// queues it at priority 0. See [`PreloadScheduler::preload_now`].
    pub fn preload(&mut self, name: &str) -> StagehandResult<bool> {
        let now = self.now();
        let result = self
            .scheduler
            .preload_now(name, 0, now, &mut self.registry, &mut self.bus);
        self.react();
        result
    }

    /// Queues a preload of `name`. Returns `false` if it is already scheduled.
    pub fn enqueue_preload(&mut self, name: &str, priority: i32, delay: Duration) -> bool {
        self.scheduler.enqueue(name, priority, delay)
    }

    /// Lets the preloaded `name` finish loading.
    ///
    /// Validate the preload with [`validate`](Self::validate) once it reaches
    /// the gate; the results are kept until the resource is unloaded.
    ///
    /// ## Arguments
    /// * `name` - A resource held at the activation gate by a preload.
    /// ## Returns
    /// * `Ok(true)` if activation was granted, `Ok(false)` if `name` is not preloaded.
    /// ## Errors
    /// * `Blocked` while the latest validation of `name` has a critical failure
    ///   and `block_on_critical_errors` is set. A `LoadFailed` event carries it too.
    pub fn activate(&mut self, name: &str) -> StagehandResult<bool> {
        if !self.registry.is_preloaded(name) {
            return Ok(false);
        }
        self.ensure_not_blocked(name)?;
        Ok(self.registry.activate(name))
    }

    /// Runs every enabled rule against `name` now.
    ///
    /// Works on loaded resources and on preloads held at the activation gate.
    pub fn validate(&mut self, name: &str) -> ValidationSummary {
        let summary = self
            .validator
            .validate_resource(name, &self.registry, &mut self.bus);
        self.react();
        summary
    }

    /// The best preload candidates other than `exclude`, best first.
    pub fn recommendations(&self, exclude: &str) -> Vec<(String, f32)> {
        self.scheduler.recommend(&self.tracker, exclude, self.now())
    }

    /// Advances loader operations and the scheduler, then dispatches one batch
    /// of queued events. Returns the number of events dispatched.
    pub fn tick(&mut self) -> usize {
        let now = self.now();
        self.registry.tick(&mut self.bus);
        self.scheduler.tick(now, &mut self.registry, &mut self.bus);
        let drained = self.bus.drain();
        self.react();
        drained
    }

    /// Dispatches every queued event and returns the usage statistics to persist.
    pub fn shutdown(mut self) -> UsageSnapshot {
        self.scheduler.clear_queue();
        let flushed = self.bus.flush();
        self.react();
        log::info!(
            "Director shut down ({flushed} event(s) flushed, {} in flight, {} resource(s) tracked).",
            self.registry.in_flight_count(),
            self.tracker.len()
        );
        self.tracker.snapshot()
    }

    /// The event bus, for publishing.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The event bus, for subscribing.
    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    /// Resource states and in-flight operations.
    pub fn registry(&self) -> &LifecycleRegistry {
        &self.registry
    }

    /// The preload queue and slots.
    pub fn scheduler(&self) -> &PreloadScheduler {
        &self.scheduler
    }

    /// Usage statistics.
    pub fn tracker(&self) -> &UsageTracker {
        &self.tracker
    }

    /// Rules and validation history.
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Rules and validation history, for adding rules at runtime.
    pub fn validator_mut(&mut self) -> &mut Validator {
        &mut self.validator
    }

    /// The event counters, if metrics are enabled.
    pub fn metrics(&self) -> Option<&Arc<MetricsRegistry>> {
        self.metrics.as_ref()
    }

    /// The active configuration.
    pub fn config(&self) -> &StagehandConfig {
        &self.config
    }

    /// The current time of the director's clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn ensure_not_blocked(&mut self, name: &str) -> StagehandResult<()> {
        if !self.config.block_on_critical_errors {
            return Ok(());
        }
        let Some(message) = self.validator.first_critical(name) else {
            return Ok(());
        };
        let error = StagehandError::Blocked {
            name: name.to_string(),
            message: message.to_string(),
        };
        log::warn!("{error}");
        self.bus.trigger(
            EventKind::LoadFailed,
            name,
            EventPayload::Failure {
                error: error.clone(),
            },
        );
        self.react();
        Err(error)
    }

    // Reactions may publish further events; in synchronous mode those are
    // journaled immediately, so keep going until the journal stays empty.
    fn react(&mut self) {
        loop {
            let events = self.bus.take_journal();
            if events.is_empty() {
                break;
            }
            for event in &events {
                self.react_to(event);
            }
        }
    }

    fn react_to(&mut self, event: &Event) {
        let name = event.resource.as_str();
        match event.kind {
            EventKind::LoadStarted | EventKind::PreloadCompleted => {
                self.tracker.touch(name, event.timestamp);
            }
            EventKind::LoadCompleted => {
                self.tracker.record_access(name, event.timestamp);
                let now = self.now();
                let queued = self.scheduler.smart_preload(name, &self.tracker, now);
                if queued > 0 {
                    log::debug!("Queued {queued} smart preload(s) after loading '{name}'.");
                }
                if self.config.validate_on_load {
                    self.validator
                        .validate_resource(name, &self.registry, &mut self.bus);
                }
            }
            EventKind::UnloadCompleted => self.validator.clear_history(name),
            _ => {}
        }
    }
}
