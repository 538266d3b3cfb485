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

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::types::{Event, EventKind, EventMask, EventPayload};
use crate::clock::{Clock, SystemClock};
use crate::error::StagehandError;

/// Configuration for the [`EventBus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Queue events and dispatch them from [`EventBus::drain`] instead of immediately.
    pub async_processing: bool,
    /// Maximum number of queued events dispatched per drain.
    pub max_events_per_frame: usize,
    /// Log every dispatched event and every subscriber fault.
    pub logging: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            async_processing: true,
            max_events_per_frame: 10,
            logging: true,
        }
    }
}

/// A freestanding callback invoked with each matching event.
///
/// Returning an error (or panicking) counts as a subscriber fault.
pub type EventCallback = Box<dyn FnMut(&Event) -> Result<()> + Send>;

/// A stateful subscriber attached to the bus through a listener record.
pub trait EventListener: Send {
    /// Handles one event. Errors are logged and the listener stays subscribed.
    fn on_event(&mut self, event: &Event) -> Result<()>;
}

impl<F> EventListener for F
where
    F: FnMut(&Event) -> Result<()> + Send,
{
    fn on_event(&mut self, event: &Event) -> Result<()> {
        self(event)
    }
}

/// Identifies a listener record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Identifies a signal binding or a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

struct ListenerRecord {
    id: ListenerId,
    enabled: bool,
    mask: EventMask,
    target: Option<String>,
    listener: Box<dyn EventListener>,
}

impl ListenerRecord {
    fn accepts(&self, event: &Event) -> bool {
        self.enabled
            && self.mask.matches(event.kind)
            && self
                .target
                .as_deref()
                .map_or(true, |target| target == event.resource)
    }
}

struct CallbackEntry {
    id: CallbackId,
    callback: EventCallback,
}

/// A cloneable handle that posts events into the bus queue.
///
/// Events sent through a handle are always queued, whatever the bus's
/// processing mode, and are dispatched on the next [`EventBus::drain`].
#[derive(Clone)]
pub struct EventSender {
    sender: flume::Sender<Event>,
    clock: Arc<dyn Clock>,
}

impl EventSender {
    /// Stamps and queues a new event. Returns `false` if the bus is gone.
    pub fn trigger(&self, kind: EventKind, resource: impl Into<String>, payload: EventPayload) -> bool {
        self.send(Event::new(kind, resource, payload, self.clock.now()))
    }

    /// Queues an existing event. Returns `false` if the bus is gone.
    pub fn send(&self, event: Event) -> bool {
        if let Err(e) = self.sender.send(event) {
            log::error!("Failed to send event: {e}. Event bus likely dropped.");
            return false;
        }
        true
    }
}

/// Queues events and fans them out to subscribers in bounded batches.
///
/// Each dispatched event goes through four isolated stages, in order:
///
/// 1. global signals bound to the event's kind, in binding order;
/// 2. enabled listener records whose mask (and optional target resource) match,
///    in registration order;
/// 3. freestanding callbacks registered for the kind, newest first; a callback
///    that faults is removed;
/// 4. callbacks registered for the event's resource, whatever the kind; these
///    stay registered when they fault.
///
/// A fault in one subscriber never prevents the others from running. Draining
/// needs `&mut self`, so a subscriber can never start a nested drain; events a
/// subscriber posts through an [`EventSender`] wait in the queue instead.
pub struct EventBus {
    config: EventBusConfig,
    clock: Arc<dyn Clock>,
    sender: flume::Sender<Event>,
    receiver: flume::Receiver<Event>,
    signals: Vec<Vec<CallbackEntry>>,
    listeners: Vec<ListenerRecord>,
    callbacks: Vec<Vec<CallbackEntry>>,
    resource_callbacks: HashMap<String, Vec<CallbackEntry>>,
    journal: Option<Vec<Event>>,
    next_id: u64,
    dispatched: u64,
    faults: u64,
}

impl EventBus {
    /// Creates a bus stamping events with the system clock.
    pub fn new(config: EventBusConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a bus stamping events with `clock`.
    pub fn with_clock(config: EventBusConfig, clock: Arc<dyn Clock>) -> Self {
        let (sender, receiver) = flume::unbounded();
        log::info!(
            "EventBus initialized (async={}, max_events_per_frame={}).",
            config.async_processing,
            config.max_events_per_frame
        );
        Self {
            config,
            clock,
            sender,
            receiver,
            signals: (0..EventKind::COUNT).map(|_| Vec::new()).collect(),
            listeners: Vec::new(),
            callbacks: (0..EventKind::COUNT).map(|_| Vec::new()).collect(),
            resource_callbacks: HashMap::new(),
            journal: None,
            next_id: 0,
            dispatched: 0,
            faults: 0,
        }
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Returns the clock used to stamp events.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns a handle other threads can use to queue events.
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Binds `callback` to the global signal for `kind`.
    pub fn connect<F>(&mut self, kind: EventKind, callback: F) -> CallbackId
    where
        F: FnMut(&Event) -> Result<()> + Send + 'static,
    {
        let id = self.next_callback_id();
        self.signals[kind.index()].push(CallbackEntry {
            id,
            callback: Box::new(callback),
        });
        id
    }

    /// Attaches a listener record.
    ///
    /// # Arguments
    ///
    /// * `mask` - The event kinds to deliver.
    /// * `target` - If set, only events about this resource are delivered.
    /// * `listener` - Receives each matching event. An error or panic is logged
    ///   and does not stop dispatch to the other subscribers.
    ///
    /// # Returns
    ///
    /// The id to pass to [`EventBus::set_listener_enabled`] or
    /// [`EventBus::remove_listener`].
    pub fn add_listener(
        &mut self,
        mask: EventMask,
        target: Option<&str>,
        listener: impl EventListener + 'static,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.push(ListenerRecord {
            id,
            enabled: true,
            mask,
            target: target.map(str::to_string),
            listener: Box::new(listener),
        });
        id
    }

    /// Enables or disables a listener record. Returns `false` if it does not exist.
    pub fn set_listener_enabled(&mut self, id: ListenerId, enabled: bool) -> bool {
        match self.listeners.iter_mut().find(|record| record.id == id) {
            Some(record) => {
                record.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Detaches a listener record. Returns `false` if it does not exist.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|record| record.id != id);
        self.listeners.len() != before
    }

    /// Registers a freestanding callback for `kind`.
    pub fn register_callback<F>(&mut self, kind: EventKind, callback: F) -> CallbackId
    where
        F: FnMut(&Event) -> Result<()> + Send + 'static,
    {
        let id = self.next_callback_id();
        self.callbacks[kind.index()].push(CallbackEntry {
            id,
            callback: Box::new(callback),
        });
        id
    }

    /// Registers a callback for every event about `resource`.
    pub fn register_resource_callback<F>(&mut self, resource: &str, callback: F) -> CallbackId
    where
        F: FnMut(&Event) -> Result<()> + Send + 'static,
    {
        let id = self.next_callback_id();
        self.resource_callbacks
            .entry(resource.to_string())
            .or_default()
            .push(CallbackEntry {
                id,
                callback: Box::new(callback),
            });
        id
    }

    /// Removes a signal binding or callback. Returns `false` if it does not exist.
    pub fn remove_callback(&mut self, id: CallbackId) -> bool {
        let registries = self
            .signals
            .iter_mut()
            .chain(self.callbacks.iter_mut())
            .chain(self.resource_callbacks.values_mut());
        for entries in registries {
            if let Some(position) = entries.iter().position(|entry| entry.id == id) {
                entries.remove(position);
                return true;
            }
        }
        false
    }

    /// Drops every callback registered for `resource`.
    pub fn clear_resource_callbacks(&mut self, resource: &str) {
        self.resource_callbacks.remove(resource);
    }

    /// Number of freestanding callbacks registered for `kind`.
    pub fn callback_count(&self, kind: EventKind) -> usize {
        self.callbacks[kind.index()].len()
    }

    /// Number of callbacks registered for `resource`.
    pub fn resource_callback_count(&self, resource: &str) -> usize {
        self.resource_callbacks.get(resource).map_or(0, Vec::len)
    }

    /// Number of attached listener records.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Stamps a new event and publishes it.
    ///
    /// In asynchronous mode the event waits for [`EventBus::drain`]; otherwise
    /// it is dispatched before this returns.
    pub fn trigger(&mut self, kind: EventKind, resource: impl Into<String>, payload: EventPayload) {
        let event = Event::new(kind, resource, payload, self.clock.now());
        self.publish(event);
    }

    /// Queues `event`, or dispatches it right away when async processing is off.
    pub fn publish(&mut self, event: Event) {
        if self.config.async_processing {
            if let Err(e) = self.sender.send(event) {
                log::error!("Failed to queue event: {e}.");
            }
        } else {
            self.dispatch(&event);
        }
    }

    /// Dispatches up to `max_events_per_frame` queued events in FIFO order.
    ///
    /// Returns the number of events dispatched; the rest stay queued.
    pub fn drain(&mut self) -> usize {
        self.drain_up_to(self.config.max_events_per_frame)
    }

    /// Dispatches every queued event, ignoring the per-frame limit.
    pub fn flush(&mut self) -> usize {
        self.drain_up_to(usize::MAX)
    }

    /// Number of events waiting in the queue.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Starts recording every dispatched event for the bus owner.
    pub fn enable_journal(&mut self) {
        self.journal.get_or_insert_with(Vec::new);
    }

    /// Takes the events dispatched since the last call.
    pub fn take_journal(&mut self) -> Vec<Event> {
        self.journal.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Total number of events dispatched so far.
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched
    }

    /// Total number of subscriber faults caught so far.
    pub fn fault_count(&self) -> u64 {
        self.faults
    }

    fn next_callback_id(&mut self) -> CallbackId {
        self.next_id += 1;
        CallbackId(self.next_id)
    }

    fn drain_up_to(&mut self, limit: usize) -> usize {
        let mut processed = 0;
        while processed < limit {
            match self.receiver.try_recv() {
                Ok(event) => {
                    self.dispatch(&event);
                    processed += 1;
                }
                Err(_) => break,
            }
        }
        if processed > 0 {
            log::trace!(
                "EventBus drained {processed} event(s), {} pending.",
                self.pending()
            );
        }
        processed
    }

    fn dispatch(&mut self, event: &Event) {
        if self.config.logging {
            log::debug!("Dispatching {} for '{}'.", event.kind, event.resource);
        }

        let mut faults = Vec::new();

        for entry in &mut self.signals[event.kind.index()] {
            if let Err(message) = isolate(|| (entry.callback)(event)) {
                faults.push(("signal", message));
            }
        }

        for record in self
            .listeners
            .iter_mut()
            .filter(|record| record.accepts(event))
        {
            if let Err(message) = isolate(|| record.listener.on_event(event)) {
                faults.push(("listener", message));
            }
        }

        let registry = &mut self.callbacks[event.kind.index()];
        let mut index = registry.len();
        while index > 0 {
            index -= 1;
            if let Err(message) = isolate(|| (registry[index].callback)(event)) {
                let removed = registry.remove(index);
                faults.push(("callback", format!("{message} (callback {:?} removed)", removed.id)));
            }
        }

        if let Some(entries) = self.resource_callbacks.get_mut(&event.resource) {
            for entry in entries.iter_mut() {
                if let Err(message) = isolate(|| (entry.callback)(event)) {
                    faults.push(("resource callback", message));
                }
            }
        }

        self.dispatched += 1;
        for (stage, message) in faults {
            self.report_fault(stage, event, message);
        }

        if let Some(journal) = &mut self.journal {
            journal.push(event.clone());
        }
    }

    fn report_fault(&mut self, stage: &str, event: &Event, message: String) {
        self.faults += 1;
        let error = StagehandError::CallbackException(format!(
            "{stage} handling {} for '{}': {message}",
            event.kind, event.resource
        ));
        if self.config.logging {
            log::warn!("{error}");
        } else {
            log::trace!("{error}");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

fn isolate<F>(f: F) -> Result<(), String>
where
    F: FnOnce() -> Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(panic_message(&*payload)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, Timestamp};
    use anyhow::bail;
    use std::sync::Mutex;
    use std::thread;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn trace() -> Trace {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn recorder(trace: &Trace, label: &'static str) -> impl FnMut(&Event) -> Result<()> + Send {
        let trace = Arc::clone(trace);
        move |event: &Event| {
            trace
                .lock()
                .unwrap()
                .push(format!("{label}:{}", event.resource));
            Ok(())
        }
    }

    fn async_bus(max_events_per_frame: usize) -> EventBus {
        EventBus::with_clock(
            EventBusConfig {
                async_processing: true,
                max_events_per_frame,
                logging: false,
            },
            Arc::new(ManualClock::default()),
        )
    }

    fn sync_bus() -> EventBus {
        EventBus::with_clock(
            EventBusConfig {
                async_processing: false,
                ..Default::default()
            },
            Arc::new(ManualClock::default()),
        )
    }

    #[test]
    fn drain_is_bounded_and_fifo() {
        let mut bus = async_bus(10);
        let seen = trace();
        bus.connect(EventKind::LoadProgress, recorder(&seen, "p"));

        for i in 0..25 {
            bus.trigger(EventKind::LoadProgress, format!("r{i}"), EventPayload::None);
        }
        assert_eq!(bus.pending(), 25);

        assert_eq!(bus.drain(), 10);
        assert_eq!(bus.drain(), 10);
        assert_eq!(bus.drain(), 5);
        assert_eq!(bus.drain(), 0);

        let expected: Vec<String> = (0..25).map(|i| format!("p:r{i}")).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[test]
    fn sync_mode_dispatches_immediately() {
        let mut bus = sync_bus();
        let seen = trace();
        bus.connect(EventKind::LoadStarted, recorder(&seen, "s"));

        bus.trigger(EventKind::LoadStarted, "Harbor", EventPayload::None);
        assert_eq!(bus.pending(), 0);
        assert_eq!(*seen.lock().unwrap(), vec!["s:Harbor".to_string()]);
    }

    #[test]
    fn stages_run_in_order() {
        let mut bus = sync_bus();
        let seen = trace();
        bus.register_resource_callback("Harbor", recorder(&seen, "resource"));
        bus.register_callback(EventKind::LoadCompleted, recorder(&seen, "callback"));
        bus.add_listener(EventMask::ALL, None, recorder(&seen, "listener"));
        bus.connect(EventKind::LoadCompleted, recorder(&seen, "signal"));

        bus.trigger(EventKind::LoadCompleted, "Harbor", EventPayload::None);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "signal:Harbor",
                "listener:Harbor",
                "callback:Harbor",
                "resource:Harbor"
            ]
        );
    }

    #[test]
    fn freestanding_callbacks_run_newest_first() {
        let mut bus = sync_bus();
        let seen = trace();
        bus.register_callback(EventKind::UnloadStarted, recorder(&seen, "first"));
        bus.register_callback(EventKind::UnloadStarted, recorder(&seen, "second"));
        bus.register_callback(EventKind::UnloadStarted, recorder(&seen, "third"));

        bus.trigger(EventKind::UnloadStarted, "Cave", EventPayload::None);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["third:Cave", "second:Cave", "first:Cave"]
        );
    }

    #[test]
    fn faulting_freestanding_callback_is_removed_after_first_failure() {
        let mut bus = sync_bus();
        let seen = trace();
        bus.register_callback(EventKind::LoadFailed, recorder(&seen, "ok"));
        bus.register_callback(EventKind::LoadFailed, |_: &Event| -> Result<()> {
            bail!("boom")
        });
        bus.register_callback(EventKind::LoadFailed, |_: &Event| -> Result<()> {
            panic!("kaboom")
        });
        assert_eq!(bus.callback_count(EventKind::LoadFailed), 3);

        bus.trigger(EventKind::LoadFailed, "A", EventPayload::None);
        assert_eq!(bus.callback_count(EventKind::LoadFailed), 1);
        assert_eq!(bus.fault_count(), 2);

        bus.trigger(EventKind::LoadFailed, "B", EventPayload::None);
        assert_eq!(bus.fault_count(), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["ok:A", "ok:B"]);
    }

    #[test]
    fn faulting_listener_and_resource_callback_are_retried() {
        let mut bus = sync_bus();
        let listener_calls = Arc::new(Mutex::new(0));
        let resource_calls = Arc::new(Mutex::new(0));

        let calls = Arc::clone(&listener_calls);
        bus.add_listener(EventMask::ALL, None, move |_: &Event| -> Result<()> {
            *calls.lock().unwrap() += 1;
            bail!("listener always fails")
        });
        let calls = Arc::clone(&resource_calls);
        bus.register_resource_callback("Harbor", move |_: &Event| -> Result<()> {
            *calls.lock().unwrap() += 1;
            bail!("resource callback always fails")
        });

        bus.trigger(EventKind::LoadStarted, "Harbor", EventPayload::None);
        bus.trigger(EventKind::LoadCompleted, "Harbor", EventPayload::None);

        assert_eq!(*listener_calls.lock().unwrap(), 2);
        assert_eq!(*resource_calls.lock().unwrap(), 2);
        assert_eq!(bus.listener_count(), 1);
        assert_eq!(bus.resource_callback_count("Harbor"), 1);
        assert_eq!(bus.fault_count(), 4);
    }

    #[test]
    fn listener_filters_by_mask_target_and_enabled_flag() {
        let mut bus = sync_bus();
        let seen = trace();
        let id = bus.add_listener(
            EventKind::LoadCompleted.mask(),
            Some("Harbor"),
            recorder(&seen, "l"),
        );

        bus.trigger(EventKind::LoadStarted, "Harbor", EventPayload::None);
        bus.trigger(EventKind::LoadCompleted, "Cave", EventPayload::None);
        bus.trigger(EventKind::LoadCompleted, "Harbor", EventPayload::None);

        assert!(bus.set_listener_enabled(id, false));
        bus.trigger(EventKind::LoadCompleted, "Harbor", EventPayload::None);

        assert!(bus.remove_listener(id));
        assert!(!bus.remove_listener(id));
        assert_eq!(*seen.lock().unwrap(), vec!["l:Harbor"]);
    }

    #[test]
    fn remove_callback_finds_every_registry() {
        let mut bus = sync_bus();
        let seen = trace();
        let signal = bus.connect(EventKind::LoadStarted, recorder(&seen, "signal"));
        let callback = bus.register_callback(EventKind::LoadStarted, recorder(&seen, "callback"));
        let resource = bus.register_resource_callback("A", recorder(&seen, "resource"));

        assert!(bus.remove_callback(signal));
        assert!(bus.remove_callback(callback));
        assert!(bus.remove_callback(resource));
        assert!(!bus.remove_callback(resource));

        bus.trigger(EventKind::LoadStarted, "A", EventPayload::None);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn sender_queues_events_from_another_thread() {
        let mut bus = sync_bus();
        let seen = trace();
        bus.connect(EventKind::PreloadStarted, recorder(&seen, "s"));
        let sender = bus.sender();

        let handle = thread::spawn(move || {
            sender.trigger(EventKind::PreloadStarted, "Remote", EventPayload::None)
        });
        assert!(handle.join().unwrap());

        assert_eq!(bus.pending(), 1);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.flush(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["s:Remote"]);
    }

    #[test]
    fn sender_fails_once_bus_is_dropped() {
        let bus = async_bus(10);
        let sender = bus.sender();
        drop(bus);
        assert!(!sender.trigger(EventKind::LoadStarted, "A", EventPayload::None));
    }

    #[test]
    fn journal_records_dispatched_events_with_timestamps() {
        let clock = ManualClock::new(Timestamp::from_millis(500));
        let mut bus = EventBus::with_clock(
            EventBusConfig {
                max_events_per_frame: 1,
                ..Default::default()
            },
            Arc::new(clock.clone()),
        );
        bus.enable_journal();

        bus.trigger(EventKind::LoadStarted, "A", EventPayload::None);
        clock.advance(std::time::Duration::from_millis(250));
        bus.trigger(EventKind::LoadCompleted, "A", EventPayload::None);
        assert!(bus.take_journal().is_empty());

        bus.drain();
        let journal = bus.take_journal();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].kind, EventKind::LoadStarted);
        assert_eq!(journal[0].timestamp, Timestamp::from_millis(500));

        bus.drain();
        let journal = bus.take_journal();
        assert_eq!(journal[0].timestamp, Timestamp::from_millis(750));
        assert_eq!(bus.dispatched_count(), 2);
    }
}
