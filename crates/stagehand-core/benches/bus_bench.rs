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

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stagehand_core::{Event, EventBus, EventBusConfig, EventKind, EventMask, EventPayload};

fn bench_drain(c: &mut Criterion) {
    let mut bus = EventBus::new(EventBusConfig {
        async_processing: true,
        max_events_per_frame: 64,
        logging: false,
    });

    let mut seen = 0u64;
    bus.connect(EventKind::LoadProgress, move |event| {
        seen += 1;
        black_box((seen, event.progress()));
        Ok(())
    });
    bus.add_listener(EventMask::LOADING, Some("Harbor"), |event: &Event| -> anyhow::Result<()> {
        black_box(event.timestamp);
        Ok(())
    });
    for _ in 0..8 {
        bus.register_callback(EventKind::LoadProgress, |event| {
            black_box(&event.resource);
            Ok(())
        });
    }

    let mut group = c.benchmark_group("Event Bus");

    group.bench_function("Queue + drain 64 progress events", |b| {
        b.iter(|| {
            for i in 0..64 {
                bus.trigger(
                    EventKind::LoadProgress,
                    "Harbor",
                    EventPayload::Progress(i as f32 / 64.0),
                );
            }
            black_box(bus.drain());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_drain);
criterion_main!(benches);
