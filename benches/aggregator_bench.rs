//! Criterion benchmarks for hot paths in the relay aggregator.
//!
//! Run with:
//!   cargo bench
//!
//! Covers:
//!   - Inbound frame decoding (JSON parse + validation)
//!   - Filter fingerprinting (sort + SHA-256)
//!   - Event merge/sort in the fan-out union map

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relaygate::model::{sort_desc, Event, EventId, Filter, PubKey, Signature};
use std::collections::HashSet;

static SAMPLE_EVENT_FRAME: &str = r#"["EVENT", "sub1", {
    "id": "a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2",
    "pubkey": "a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2",
    "sig": "a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2",
    "kind": 1,
    "created_at": 1700000000,
    "content": "benchmark content",
    "tags": [["e", "a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2"]]
}]"#;

fn bench_frame_decode(c: &mut Criterion) {
    c.bench_function("decode_event_frame_unverified", |b| {
        b.iter(|| {
            let frame = relaygate::codec::decode_frame(black_box(SAMPLE_EVENT_FRAME), 256 * 1024, 1_700_000_600, false);
            black_box(frame).ok();
        });
    });
}

fn bench_fingerprint(c: &mut Criterion) {
    let filter = Filter {
        authors: Some((0u8..50).map(|b| PubKey([b; 32])).collect()),
        kinds: Some(vec![1, 6, 7]),
        limit: 50,
        ..Default::default()
    };

    c.bench_function("filter_fingerprint_50_authors", |b| {
        b.iter(|| {
            black_box(filter.fingerprint());
        });
    });
}

fn bench_merge_sort(c: &mut Criterion) {
    let mut events: Vec<Event> = (0..500u32)
        .map(|i| Event {
            id: EventId([(i % 256) as u8; 32]),
            pubkey: PubKey([0; 32]),
            sig: Signature([0; 64]),
            kind: 1,
            created_at: 1_700_000_000 + (i as i64 % 1000),
            content: String::new(),
            tags: vec![],
            relays_seen: HashSet::new(),
        })
        .collect();

    c.bench_function("sort_desc_500_events", |b| {
        b.iter(|| {
            sort_desc(black_box(&mut events));
        });
    });
}

criterion_group!(benches, bench_frame_decode, bench_fingerprint, bench_merge_sort);
criterion_main!(benches);
