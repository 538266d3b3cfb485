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

//! Priority-ordered preloading under a concurrency limit.
//!
//! The scheduler never loads anything itself: it hands queued requests to
//! [`LifecycleRegistry::preload`] while fewer than `max_concurrent_preloads`
//! slots are taken, then watches each preload until it reaches the activation
//! gate or runs out of time. A slot is taken from the moment a request is
//! dequeued, so a request waiting out its start delay counts as in flight.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stagehand_core::{EventBus, EventKind, EventPayload, StagehandError, StagehandResult, Timestamp};

use crate::registry::LifecycleRegistry;
use crate::usage::UsageTracker;

/// Configuration for the [`PreloadScheduler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of preloads in flight at once.
    pub max_concurrent_preloads: usize,
    /// Enqueue recommendations whenever a load completes.
    pub smart_preloading: bool,
    /// Number of recommendations enqueued per completed load.
    pub recommendation_count: usize,
    /// Time budget of a priority-0 preload.
    pub preload_timeout_base: Duration,
    /// Extra time budget per priority point.
    pub preload_timeout_per_priority: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_preloads: 3,
            smart_preloading: true,
            recommendation_count: 3,
            preload_timeout_base: Duration::from_secs(30),
            preload_timeout_per_priority: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    /// The time budget of a preload with `priority`.
    ///
    /// Negative priorities get the base budget.
    pub fn timeout_for(&self, priority: i32) -> Duration {
        let extra = u32::try_from(priority.max(0)).unwrap_or(0);
        self.preload_timeout_base + self.preload_timeout_per_priority * extra
    }
}

/// A queued request to preload a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadRequest {
    /// The resource to preload.
    pub name: String,
    /// Higher runs first.
    pub priority: i32,
    /// How long to wait after dequeuing before starting.
    pub delay: Duration,
    /// Whether the request came from the smart preloader.
    pub auto: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotPhase {
    Delayed { until: Timestamp },
    Running { deadline: Timestamp, budget: Duration },
}

#[derive(Debug)]
struct Slot {
    request: PreloadRequest,
    phase: SlotPhase,
}

/// Runs preload requests in priority order under a concurrency limit.
#[derive(Debug)]
pub struct PreloadScheduler {
    config: SchedulerConfig,
    queue: Vec<PreloadRequest>,
    slots: Vec<Slot>,
    completed: u64,
    timed_out: u64,
}

impl PreloadScheduler {
    /// Creates an idle scheduler. `max_concurrent_preloads` is raised to at least 1.
    pub fn new(mut config: SchedulerConfig) -> Self {
        config.max_concurrent_preloads = config.max_concurrent_preloads.max(1);
        Self {
            config,
            queue: Vec::new(),
            slots: Vec::new(),
            completed: 0,
            timed_out: 0,
        }
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Queues a manual preload request.
    ///
    /// # Arguments
    ///
    /// * `name` - The resource to preload. Empty names are ignored.
    /// * `priority` - Higher runs first; also extends the time budget.
    /// * `delay` - How long the request holds its slot before starting.
    ///
    /// # Returns
    ///
    /// `false` if `name` is empty or already queued or in flight.
    pub fn enqueue(&mut self, name: &str, priority: i32, delay: Duration) -> bool {
        self.enqueue_request(PreloadRequest {
            name: name.to_string(),
            priority,
            delay,
            auto: false,
        })
    }

    /// Queues `request`, keeping the queue sorted by descending priority.
    ///
    /// Requests of equal priority keep their insertion order. A request for a
    /// name that is already queued or in flight is dropped.
    pub fn enqueue_request(&mut self, request: PreloadRequest) -> bool {
        if request.name.is_empty() {
            log::warn!("Ignoring preload request with an empty resource name.");
            return false;
        }
        if self.is_scheduled(&request.name) {
            log::debug!("Preload of '{}' is already scheduled.", request.name);
            return false;
        }
        log::debug!(
            "Queued preload of '{}' (priority {}, auto={}).",
            request.name,
            request.priority,
            request.auto
        );
        self.queue.push(request);
        self.queue.sort_by(|a, b| b.priority.cmp(&a.priority));
        true
    }

    /// Preloads `name` without waiting for the next tick when a slot is free.
    ///
    /// # Arguments
    ///
    /// * `name` - The resource to preload.
    /// * `priority` - Sets the time budget, and the queue position if every
    ///   slot is taken.
    /// * `now` - Start of the time budget.
    /// * `registry` - Receives the preload.
    /// * `bus` - Receives `PreloadStarted`, or `PreloadFailed` on rejection.
    ///
    /// # Returns
    ///
    /// `Ok(true)` if the preload started or was queued behind the concurrency
    /// limit, `Ok(false)` if `name` is already scheduled or needs no preload.
    /// Registry rejections are passed through.
    pub fn preload_now(
        &mut self,
        name: &str,
        priority: i32,
        now: Timestamp,
        registry: &mut LifecycleRegistry,
        bus: &mut EventBus,
    ) -> StagehandResult<bool> {
        if name.is_empty() {
            return registry.preload(name, bus);
        }
        if self.is_scheduled(name) {
            return Ok(false);
        }
        let request = PreloadRequest {
            name: name.to_string(),
            priority,
            delay: Duration::ZERO,
            auto: false,
        };
        if self.slots.len() >= self.config.max_concurrent_preloads {
            log::debug!("Every preload slot is taken; queueing '{name}'.");
            return Ok(self.enqueue_request(request));
        }

        if !registry.preload(name, bus)? {
            return Ok(false);
        }
        let budget = self.config.timeout_for(priority);
        self.slots.push(Slot {
            phase: SlotPhase::Running {
                deadline: now + budget,
                budget,
            },
            request,
        });
        Ok(true)
    }

    /// Advances every slot and fills free slots from the queue.
    pub fn tick(&mut self, now: Timestamp, registry: &mut LifecycleRegistry, bus: &mut EventBus) {
        let slots = std::mem::take(&mut self.slots);
        for slot in slots {
            if let Some(slot) = self.advance(slot, now, registry, bus) {
                self.slots.push(slot);
            }
        }

        while self.slots.len() < self.config.max_concurrent_preloads && !self.queue.is_empty() {
            let request = self.queue.remove(0);
            let slot = if request.delay.is_zero() {
                self.start(request, now, registry, bus)
            } else {
                Some(Slot {
                    phase: SlotPhase::Delayed {
                        until: now + request.delay,
                    },
                    request,
                })
            };
            if let Some(slot) = slot {
                self.slots.push(slot);
            }
        }
    }

    /// Ranks every known resource except `exclude` by usage score.
    ///
    /// ## Arguments
    /// * `tracker` - The usage statistics to rank.
    /// * `exclude` - Usually the resource that just finished loading.
    /// * `now` - The time recency is measured against.
    /// ## Returns
    /// * At most `recommendation_count` `(name, score)` pairs, best first. Equal
    ///   scores are ordered by name.
    pub fn recommend(
        &self,
        tracker: &UsageTracker,
        exclude: &str,
        now: Timestamp,
    ) -> Vec<(String, f32)> {
        tracker
            .ranked(now)
            .into_iter()
            .filter(|(name, _)| name != exclude)
            .take(self.config.recommendation_count)
            .collect()
    }

    /// Enqueues the recommendations that follow the completed load of `completed`.
    ///
    /// Each recommendation gets priority `round(score * 100)`. Returns the
    /// number of requests actually queued.
    pub fn smart_preload(&mut self, completed: &str, tracker: &UsageTracker, now: Timestamp) -> usize {
        if !self.config.smart_preloading {
            return 0;
        }
        let mut queued = 0;
        for (name, score) in self.recommend(tracker, completed, now) {
            let request = PreloadRequest {
                name,
                priority: (score * 100.0).round() as i32,
                delay: Duration::ZERO,
                auto: true,
            };
            if self.enqueue_request(request) {
                queued += 1;
            }
        }
        queued
    }

    /// Requests waiting for a slot, in the order they will run.
    pub fn queued(&self) -> impl Iterator<Item = &PreloadRequest> {
        self.queue.iter()
    }

    /// Number of requests waiting for a slot.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of slots taken (delayed or running).
    pub fn in_flight_count(&self) -> usize {
        self.slots.len()
    }

    /// Whether `name` is queued or in flight.
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.queue.iter().any(|request| request.name == name)
            || self.slots.iter().any(|slot| slot.request.name == name)
    }

    /// Drops every request that has not been dequeued yet.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    /// Number of preloads that reached the activation gate.
    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    /// Number of preloads that exceeded their time budget.
    pub fn timed_out_count(&self) -> u64 {
        self.timed_out
    }

    fn advance(
        &mut self,
        slot: Slot,
        now: Timestamp,
        registry: &mut LifecycleRegistry,
        bus: &mut EventBus,
    ) -> Option<Slot> {
        match slot.phase {
            SlotPhase::Delayed { until } if now < until => Some(slot),
            SlotPhase::Delayed { .. } => self.start(slot.request, now, registry, bus),
            SlotPhase::Running { deadline, budget } => {
                let name = &slot.request.name;
                // A preload that is no longer pending was activated or taken over by a load.
                if registry.is_preload_ready(name) || !registry.is_preloaded(name) {
                    self.completed += 1;
                    log::info!("Preload of '{name}' completed.");
                    bus.trigger(EventKind::PreloadCompleted, name.as_str(), EventPayload::None);
                    None
                } else if now >= deadline {
                    self.timed_out += 1;
                    log::warn!("Preload of '{name}' timed out after {budget:?}.");
                    bus.trigger(
                        EventKind::PreloadFailed,
                        name.as_str(),
                        EventPayload::Failure {
                            error: StagehandError::Timeout {
                                name: name.clone(),
                                budget,
                            },
                        },
                    );
                    None
                } else {
                    Some(slot)
                }
            }
        }
    }

    fn start(
        &mut self,
        request: PreloadRequest,
        now: Timestamp,
        registry: &mut LifecycleRegistry,
        bus: &mut EventBus,
    ) -> Option<Slot> {
        match registry.preload(&request.name, bus) {
            Ok(true) => {
                let budget = self.config.timeout_for(request.priority);
                Some(Slot {
                    phase: SlotPhase::Running {
                        deadline: now + budget,
                        budget,
                    },
                    request,
                })
            }
            Ok(false) => {
                log::debug!("Skipping preload of '{}': nothing to do.", request.name);
                None
            }
            // The registry already published the failure.
            Err(_) => None,
        }
    }
}

impl Default for PreloadScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::{Clock, Event, EventBusConfig, LoadMode, ManualClock, SimulatedLoader};
    use std::sync::Arc;

    struct Harness {
        scheduler: PreloadScheduler,
        registry: LifecycleRegistry,
        loader: SimulatedLoader,
        bus: EventBus,
        clock: ManualClock,
    }

    impl Harness {
        fn new(config: SchedulerConfig, step: f32) -> Self {
            let loader = SimulatedLoader::new(step);
            let clock = ManualClock::default();
            let mut bus = EventBus::with_clock(
                EventBusConfig {
                    async_processing: false,
                    ..Default::default()
                },
                Arc::new(clock.clone()),
            );
            bus.enable_journal();
            Self {
                scheduler: PreloadScheduler::new(config),
                registry: LifecycleRegistry::new(loader.clone()),
                loader,
                bus,
                clock,
            }
        }

        fn tick(&mut self) {
            self.registry.tick(&mut self.bus);
            let now = self.clock.now();
            self.scheduler.tick(now, &mut self.registry, &mut self.bus);
        }

        fn events(&mut self, kind: EventKind) -> Vec<Event> {
            self.bus
                .take_journal()
                .into_iter()
                .filter(|event| event.kind == kind)
                .collect()
        }
    }

    fn config(max_concurrent_preloads: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_preloads,
            ..Default::default()
        }
    }

    #[test]
    fn queue_is_sorted_by_priority_and_stable() {
        let mut scheduler = PreloadScheduler::default();
        scheduler.enqueue("low", 0, Duration::ZERO);
        scheduler.enqueue("first-high", 10, Duration::ZERO);
        scheduler.enqueue("mid", 5, Duration::ZERO);
        scheduler.enqueue("second-high", 10, Duration::ZERO);

        let order: Vec<&str> = scheduler.queued().map(|r| r.name.as_str()).collect();
        assert_eq!(order, vec!["first-high", "second-high", "mid", "low"]);
    }

    #[test]
    fn duplicate_and_empty_requests_are_dropped() {
        let mut scheduler = PreloadScheduler::default();
        assert!(scheduler.enqueue("Cave", 1, Duration::ZERO));
        assert!(!scheduler.enqueue("Cave", 9, Duration::ZERO));
        assert!(!scheduler.enqueue("", 9, Duration::ZERO));
        assert_eq!(scheduler.queue_len(), 1);
    }

    #[test]
    fn higher_priority_is_dequeued_first() {
        let mut h = Harness::new(config(1), 0.25);
        h.scheduler.enqueue("Y", 0, Duration::ZERO);
        h.scheduler.enqueue("X", 10, Duration::ZERO);

        h.tick();
        assert!(h.registry.is_preloaded("X"));
        assert!(!h.registry.is_preloaded("Y"));
        assert_eq!(h.loader.log().loads[0].0, "X");
    }

    #[test]
    fn in_flight_never_exceeds_the_limit() {
        let mut h = Harness::new(config(2), 0.1);
        for name in ["A", "B", "C", "D", "E"] {
            h.scheduler.enqueue(name, 0, Duration::ZERO);
        }

        let mut max_seen = 0;
        for _ in 0..60 {
            h.tick();
            max_seen = max_seen.max(h.scheduler.in_flight_count());
            assert!(h.scheduler.in_flight_count() <= 2);
        }
        assert_eq!(max_seen, 2);
        assert_eq!(h.scheduler.completed_count(), 5);
        assert_eq!(h.events(EventKind::PreloadCompleted).len(), 5);
        assert_eq!(h.registry.preloaded_resources().len(), 5);
    }

    #[test]
    fn immediate_preload_shares_the_concurrency_limit() {
        let mut h = Harness::new(config(1), 0.25);
        let now = h.clock.now();

        assert_eq!(
            h.scheduler.preload_now("X", 0, now, &mut h.registry, &mut h.bus),
            Ok(true)
        );
        assert!(h.registry.is_preloaded("X"));
        assert_eq!(
            h.scheduler.preload_now("Y", 0, now, &mut h.registry, &mut h.bus),
            Ok(true)
        );
        assert_eq!(
            h.scheduler.preload_now("X", 0, now, &mut h.registry, &mut h.bus),
            Ok(false)
        );
        assert!(matches!(
            h.scheduler.preload_now("", 0, now, &mut h.registry, &mut h.bus),
            Err(StagehandError::InvalidArgument(_))
        ));
        assert_eq!(h.scheduler.in_flight_count(), 1);
        assert_eq!(h.scheduler.queue_len(), 1);
        assert_eq!(h.loader.log().load_count("Y"), 0);

        for _ in 0..10 {
            h.tick();
            assert!(h.scheduler.in_flight_count() <= 1);
        }
        assert!(h.registry.is_preloaded("Y"));
        assert_eq!(h.scheduler.completed_count(), 2);
    }

    #[test]
    fn delay_holds_a_slot_before_starting() {
        let mut h = Harness::new(config(1), 0.5);
        h.scheduler.enqueue("Late", 0, Duration::from_secs(2));
        h.scheduler.enqueue("Next", 0, Duration::ZERO);

        h.tick();
        assert_eq!(h.scheduler.in_flight_count(), 1);
        assert!(!h.registry.is_preloaded("Late"));
        assert!(!h.registry.is_preloaded("Next"));

        h.clock.advance(Duration::from_secs(2));
        h.tick();
        assert!(h.registry.is_preloaded("Late"));
        assert!(!h.registry.is_preloaded("Next"));
    }

    #[test]
    fn stalled_preload_times_out() {
        // A step this small never reaches the gate within the budget.
        let mut h = Harness::new(config(1), 0.0001);
        h.scheduler.enqueue("Slow", 2, Duration::ZERO);
        h.tick();

        h.clock.advance(Duration::from_secs(39));
        h.tick();
        assert!(h.events(EventKind::PreloadFailed).is_empty());

        h.clock.advance(Duration::from_secs(1));
        h.tick();
        let failures = h.events(EventKind::PreloadFailed);
        assert_eq!(failures.len(), 1);
        assert_eq!(
            failures[0].error(),
            Some(&StagehandError::Timeout {
                name: "Slow".to_string(),
                budget: Duration::from_secs(40),
            })
        );
        assert_eq!(h.scheduler.in_flight_count(), 0);
        assert_eq!(h.scheduler.timed_out_count(), 1);
        assert!(h.registry.is_preloaded("Slow"));
    }

    #[test]
    fn requests_for_loaded_resources_are_skipped() {
        let mut h = Harness::new(config(1), 1.0);
        h.registry.load("Harbor", LoadMode::Single, &mut h.bus).unwrap();
        h.tick();
        h.tick();
        assert!(h.registry.is_loaded("Harbor"));

        h.scheduler.enqueue("Harbor", 0, Duration::ZERO);
        h.tick();
        assert_eq!(h.scheduler.in_flight_count(), 0);
        assert!(h.events(EventKind::PreloadStarted).is_empty());
    }

    #[test]
    fn activated_preload_counts_as_completed() {
        let mut h = Harness::new(config(1), 0.1);
        h.scheduler.enqueue("Cave", 0, Duration::ZERO);
        h.tick();
        assert!(h.registry.activate("Cave"));
        h.tick();
        assert_eq!(h.scheduler.completed_count(), 1);
        assert_eq!(h.scheduler.in_flight_count(), 0);
    }

    #[test]
    fn timeout_budget_grows_with_priority() {
        let config = SchedulerConfig::default();
        assert_eq!(config.timeout_for(0), Duration::from_secs(30));
        assert_eq!(config.timeout_for(10), Duration::from_secs(80));
        assert_eq!(config.timeout_for(-4), Duration::from_secs(30));
    }

    #[test]
    fn smart_preload_enqueues_top_three_other_resources() {
        let hour = Duration::from_secs(3600);
        let now = Timestamp::ZERO + 48 * hour;
        let mut tracker = UsageTracker::new();
        tracker.record_access("Current", now);
        tracker.record_access("Fresh", now);
        tracker.record_access("Stale", now);
        tracker.record_access("Old", Timestamp::ZERO);
        tracker.touch("Unused", Timestamp::ZERO);

        let mut scheduler = PreloadScheduler::default();
        assert_eq!(scheduler.smart_preload("Current", &tracker, now), 3);

        let queued: Vec<(&str, i32, bool)> = scheduler
            .queued()
            .map(|r| (r.name.as_str(), r.priority, r.auto))
            .collect();
        assert_eq!(
            queued,
            vec![("Fresh", 100, true), ("Stale", 100, true), ("Old", 70, true)]
        );
    }

    #[test]
    fn smart_preload_can_be_disabled() {
        let mut tracker = UsageTracker::new();
        tracker.record_access("Other", Timestamp::ZERO);
        let mut scheduler = PreloadScheduler::new(SchedulerConfig {
            smart_preloading: false,
            ..Default::default()
        });
        assert_eq!(scheduler.smart_preload("Current", &tracker, Timestamp::ZERO), 0);
        assert_eq!(scheduler.queue_len(), 0);
    }
}
