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

//! The event model and the event bus.
//!
//! Events are a closed sum type ([`EventKind`] plus [`EventPayload`]) produced
//! by the lifecycle registry, the preload scheduler and the validator. The
//! [`EventBus`] queues them in a FIFO channel and fans them out, in bounded
//! batches, to four independent classes of subscribers.

mod bus;
mod types;

pub use self::bus::{
    CallbackId, EventBus, EventBusConfig, EventCallback, EventListener, EventSender, ListenerId,
};
pub use self::types::{Event, EventKind, EventMask, EventPayload};
