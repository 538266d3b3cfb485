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

//! The load/unload state machine.
//!
//! Per resource name the registry walks `Unloaded -> Loading -> Loaded ->
//! Unloading -> Unloaded`. A preload is a `Loading` operation held at the
//! activation gate; it becomes `Loaded` through [`LifecycleRegistry::activate`]
//! or when an ordinary [`LifecycleRegistry::load`] takes it over.
//!
//! At most one operation is in flight per name. The transition guard holds
//! exactly the names with an operation in flight, preloads included.

use std::collections::{BTreeMap, HashSet};

use stagehand_core::{
    EventBus, EventKind, EventPayload, LoadMode, LoadOperation, LoadedResources, ResourceHandle,
    ResourceLoader, ResourceState, StagehandError, StagehandResult, ACTIVATION_THRESHOLD,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    Load,
    Preload,
    Unload,
}

struct InFlight {
    name: String,
    kind: OperationKind,
    operation: Box<dyn LoadOperation>,
    activation_granted: bool,
}

/// Owns every [`ResourceHandle`] and the operations driving them.
pub struct LifecycleRegistry {
    loader: Box<dyn ResourceLoader>,
    handles: BTreeMap<String, ResourceHandle>,
    transitioning: HashSet<String>,
    operations: Vec<InFlight>,
}

impl LifecycleRegistry {
    /// Creates a registry issuing operations to `loader`.
    pub fn new(loader: impl ResourceLoader + 'static) -> Self {
        Self::with_boxed_loader(Box::new(loader))
    }

    /// Creates a registry from an already boxed loader.
    pub fn with_boxed_loader(loader: Box<dyn ResourceLoader>) -> Self {
        Self {
            loader,
            handles: BTreeMap::new(),
            transitioning: HashSet::new(),
            operations: Vec::new(),
        }
    }

    /// Requests that `name` be loaded.
    ///
    /// A pending preload of `name` is taken over instead of starting a second
    /// operation. Every rejection is also published as `LoadFailed`.
    ///
    /// # Arguments
    ///
    /// * `name` - The resource to load. Must not be empty.
    /// * `mode` - How the content combines with what is already loaded. Ignored
    ///   when a pending preload is taken over.
    /// * `bus` - Receives `LoadStarted`, or `LoadFailed` on rejection.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the operation is in flight. Completion is reported later
    /// by [`LifecycleRegistry::tick`].
    pub fn load(&mut self, name: &str, mode: LoadMode, bus: &mut EventBus) -> StagehandResult<()> {
        if name.is_empty() {
            return Self::reject(
                bus,
                EventKind::LoadFailed,
                name,
                StagehandError::InvalidArgument("resource name is empty".to_string()),
            );
        }

        if let Some(op) = self.preload_operation_mut(name) {
            op.kind = OperationKind::Load;
            if let Some(handle) = self.handles.get_mut(name) {
                handle.mark_preloaded(false);
            }
            log::info!("Load of '{name}' takes over its pending preload.");
            bus.trigger(EventKind::LoadStarted, name, EventPayload::None);
            return Ok(());
        }

        if self.transitioning.contains(name) {
            log::warn!("Ignoring load of '{name}': already transitioning.");
            return Self::reject(
                bus,
                EventKind::LoadFailed,
                name,
                StagehandError::AlreadyTransitioning(name.to_string()),
            );
        }

        if self.is_loaded(name) {
            return Self::reject(
                bus,
                EventKind::LoadFailed,
                name,
                StagehandError::AlreadyLoaded(name.to_string()),
            );
        }

        let Some(mut operation) = self.loader.start_load(name, mode) else {
            log::error!("Resource loader refused to load '{name}'.");
            return Self::reject(
                bus,
                EventKind::LoadFailed,
                name,
                StagehandError::OperationStartFailed(name.to_string()),
            );
        };
        operation.set_activation_allowed(false);

        self.transitioning.insert(name.to_string());
        self.handle_mut(name).set_state(ResourceState::Loading);
        self.operations.push(InFlight {
            name: name.to_string(),
            kind: OperationKind::Load,
            operation,
            activation_granted: false,
        });

        log::info!("Loading '{name}' ({mode:?}).");
        bus.trigger(EventKind::LoadStarted, name, EventPayload::None);
        Ok(())
    }

    /// Requests that `name` be unloaded.
    ///
    /// Returns `Ok(false)` without doing anything if `name` is unknown, already
    /// unloading, or mid-transition.
    pub fn unload(&mut self, name: &str, bus: &mut EventBus) -> StagehandResult<bool> {
        let Some(state) = self.handles.get(name).map(ResourceHandle::state) else {
            return Ok(false);
        };
        if state == ResourceState::Unloading || self.transitioning.contains(name) {
            log::debug!("Ignoring unload of '{name}' ({state}).");
            return Ok(false);
        }

        let Some(operation) = self.loader.start_unload(name) else {
            log::error!("Resource loader refused to unload '{name}'.");
            return Self::reject(
                bus,
                EventKind::UnloadFailed,
                name,
                StagehandError::OperationStartFailed(name.to_string()),
            )
            .map(|_| false);
        };

        self.transitioning.insert(name.to_string());
        self.handle_mut(name).set_state(ResourceState::Unloading);
        self.operations.push(InFlight {
            name: name.to_string(),
            kind: OperationKind::Unload,
            operation,
            activation_granted: true,
        });

        log::info!("Unloading '{name}'.");
        bus.trigger(EventKind::UnloadStarted, name, EventPayload::None);
        Ok(true)
    }

    /// Starts loading `name` up to the activation gate without activating it.
    ///
    /// Returns `Ok(false)` without doing anything if `name` is already loading,
    /// loaded, preloaded or otherwise mid-transition.
    pub fn preload(&mut self, name: &str, bus: &mut EventBus) -> StagehandResult<bool> {
        if name.is_empty() {
            return Self::reject(
                bus,
                EventKind::PreloadFailed,
                name,
                StagehandError::InvalidArgument("resource name is empty".to_string()),
            )
            .map(|_| false);
        }
        if self.transitioning.contains(name) || self.state(name) != ResourceState::Unloaded {
            log::debug!("Ignoring preload of '{name}' ({}).", self.state(name));
            return Ok(false);
        }

        let Some(mut operation) = self.loader.start_load(name, LoadMode::Additive) else {
            log::error!("Resource loader refused to preload '{name}'.");
            return Self::reject(
                bus,
                EventKind::PreloadFailed,
                name,
                StagehandError::OperationStartFailed(name.to_string()),
            )
            .map(|_| false);
        };
        operation.set_activation_allowed(false);

        self.transitioning.insert(name.to_string());
        self.handle_mut(name).mark_preloaded(true);
        self.operations.push(InFlight {
            name: name.to_string(),
            kind: OperationKind::Preload,
            operation,
            activation_granted: false,
        });

        log::info!("Preloading '{name}'.");
        bus.trigger(EventKind::PreloadStarted, name, EventPayload::None);
        Ok(true)
    }

    /// Lets a preloaded resource finish loading. Returns `false` if `name` is not preloaded.
    ///
    /// Completion is reported as `LoadCompleted` by a later [`tick`](Self::tick).
    pub fn activate(&mut self, name: &str) -> bool {
        let Some(op) = self.preload_operation_mut(name) else {
            return false;
        };
        op.kind = OperationKind::Load;
        if let Some(handle) = self.handles.get_mut(name) {
            handle.mark_preloaded(false);
        }
        log::info!("Activating preloaded '{name}'.");
        true
    }

    /// Polls every in-flight operation once and publishes the resulting events.
    pub fn tick(&mut self, bus: &mut EventBus) {
        let operations = std::mem::take(&mut self.operations);
        for mut op in operations {
            op.operation.poll();

            if op.kind == OperationKind::Load && !op.activation_granted {
                let progress = op.operation.progress();
                if progress < ACTIVATION_THRESHOLD {
                    bus.trigger(EventKind::LoadProgress, &op.name, EventPayload::Progress(progress));
                } else {
                    bus.trigger(EventKind::LoadProgress, &op.name, EventPayload::Progress(1.0));
                    op.operation.set_activation_allowed(true);
                    op.activation_granted = true;
                }
            }

            if op.kind != OperationKind::Preload && op.operation.is_done() {
                self.complete(op, bus);
            } else {
                self.operations.push(op);
            }
        }
    }

    /// Whether `name` is fully loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.state(name) == ResourceState::Loaded
    }

    /// Whether `name` is held (or heading) at the activation gate.
    pub fn is_preloaded(&self, name: &str) -> bool {
        self.handles
            .get(name)
            .is_some_and(ResourceHandle::is_preloaded)
    }

    /// Whether the preload of `name` has reached the activation gate.
    pub fn is_preload_ready(&self, name: &str) -> bool {
        self.operations.iter().any(|op| {
            op.kind == OperationKind::Preload
                && op.name == name
                && op.operation.progress() >= ACTIVATION_THRESHOLD
        })
    }

    /// Whether an operation is in flight for `name`.
    pub fn is_transitioning(&self, name: &str) -> bool {
        self.transitioning.contains(name)
    }

    /// The lifecycle state of `name`; untracked names are `Unloaded`.
    pub fn state(&self, name: &str) -> ResourceState {
        self.handles
            .get(name)
            .map_or(ResourceState::Unloaded, ResourceHandle::state)
    }

    /// The handle for `name`, if tracked.
    pub fn handle(&self, name: &str) -> Option<&ResourceHandle> {
        self.handles.get(name)
    }

    /// Names of every loaded resource, in name order.
    pub fn loaded_resources(&self) -> Vec<String> {
        self.names_where(|handle| handle.state() == ResourceState::Loaded)
    }

    /// Names of every preloaded resource, in name order.
    pub fn preloaded_resources(&self) -> Vec<String> {
        self.names_where(ResourceHandle::is_preloaded)
    }

    /// Number of operations in flight, preloads included.
    pub fn in_flight_count(&self) -> usize {
        self.operations.len()
    }

    fn complete(&mut self, op: InFlight, bus: &mut EventBus) {
        self.transitioning.remove(&op.name);
        match op.kind {
            OperationKind::Load => {
                self.handle_mut(&op.name).set_state(ResourceState::Loaded);
                log::info!("Loaded '{}'.", op.name);
                bus.trigger(EventKind::LoadCompleted, op.name, EventPayload::None);
            }
            OperationKind::Unload => {
                self.handles.remove(&op.name);
                log::info!("Unloaded '{}'.", op.name);
                bus.trigger(EventKind::UnloadCompleted, op.name, EventPayload::None);
            }
            OperationKind::Preload => {}
        }
    }

    fn preload_operation_mut(&mut self, name: &str) -> Option<&mut InFlight> {
        self.operations
            .iter_mut()
            .find(|op| op.kind == OperationKind::Preload && op.name == name)
    }

    fn handle_mut(&mut self, name: &str) -> &mut ResourceHandle {
        self.handles
            .entry(name.to_string())
            .or_insert_with(|| ResourceHandle::new(name))
    }

    fn names_where(&self, predicate: impl Fn(&ResourceHandle) -> bool) -> Vec<String> {
        self.handles
            .values()
            .filter(|&handle| predicate(handle))
            .map(|handle| handle.name().to_string())
            .collect()
    }

    fn reject(
        bus: &mut EventBus,
        kind: EventKind,
        name: &str,
        error: StagehandError,
    ) -> StagehandResult<()> {
        bus.trigger(
            kind,
            name,
            EventPayload::Failure {
                error: error.clone(),
            },
        );
        Err(error)
    }
}

impl LoadedResources for LifecycleRegistry {
    fn is_loaded(&self, name: &str) -> bool {
        LifecycleRegistry::is_loaded(self, name)
    }

    fn is_accessible(&self, name: &str) -> bool {
        LifecycleRegistry::is_loaded(self, name) || self.is_preload_ready(name)
    }
}
