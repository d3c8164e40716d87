//! Consolidation hot path benchmark
//!
//! Measures the per-fragment cost of routing plus accumulation, the
//! path every inbound audio fragment takes.
//!
//! Run with: cargo bench --bench consolidate

use std::time::Duration;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use voicelink::audio::{AudioFragment, AudioRouter, ConsolidationBuffer, MessageId};
use voicelink::config::AudioConfig;

const FRAGMENT_BYTES: usize = 2048;
const FRAGMENTS_PER_BURST: usize = 32;

fn burst(message: &str) -> Vec<AudioFragment> {
    let payload = Bytes::from(vec![0x5a; FRAGMENT_BYTES]);
    (0..FRAGMENTS_PER_BURST)
        .map(|_| AudioFragment::new(MessageId::new(message), payload.clone()))
        .collect()
}

fn bench_consolidation(c: &mut Criterion) {
    let config = AudioConfig::default();
    let window = Duration::from_millis(800);

    let mut group = c.benchmark_group("consolidation");
    group.throughput(Throughput::Bytes((FRAGMENT_BYTES * FRAGMENTS_PER_BURST) as u64));

    group.bench_function("accumulate_burst", |b| {
        b.iter_batched(
            || (ConsolidationBuffer::new(&config), burst("bench")),
            |(mut buffer, fragments)| {
                for fragment in fragments {
                    black_box(buffer.accumulate(fragment, window));
                }
                black_box(buffer.force_flush())
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("route_and_accumulate", |b| {
        b.iter_batched(
            || {
                (
                    AudioRouter::new(&config),
                    ConsolidationBuffer::new(&config),
                    burst("bench"),
                )
            },
            |(mut router, mut buffer, fragments)| {
                for fragment in fragments {
                    let _ = black_box(router.route(&fragment));
                    let window = router.window();
                    black_box(buffer.accumulate(fragment, window));
                }
                black_box(buffer.force_flush())
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_consolidation);
criterion_main!(benches);
