//! Codec benchmarks for tack-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use tack_protocol::{codec, ActorRef, BroadcastPayload, EntityKey, EventName, Frame};

fn card_payload() -> BroadcastPayload {
    BroadcastPayload::for_event(
        EventName::CardUpdated,
        EntityKey::Card,
        json!({
            "id": "0b9f6a1c-0f0e-4a44-9d62-0c1f0b6b8a11",
            "title": "Ship the release notes",
            "status": "In Progress",
            "members": ["u1", "u2", "u3"],
            "labels": ["docs"],
        }),
        ActorRef::new("u1", Some("u1@example.com".into())),
    )
}

fn bench_encode_event(c: &mut Criterion) {
    let payload = card_payload();
    let size = codec::encode_event("board", EventName::CardUpdated, &payload)
        .unwrap()
        .len();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(size as u64));
    group.bench_function("card_event", |b| {
        b.iter(|| codec::encode_event(black_box("board"), EventName::CardUpdated, black_box(&payload)))
    });
    group.finish();
}

fn bench_decode_event(c: &mut Criterion) {
    let encoded = codec::encode_event("board", EventName::CardUpdated, &card_payload()).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("card_event", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_control_roundtrip(c: &mut Criterion) {
    let frame = Frame::join(42, "0b9f6a1c-0f0e-4a44-9d62-0c1f0b6b8a11");

    c.bench_function("join_roundtrip", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_event,
    bench_decode_event,
    bench_control_roundtrip
);
criterion_main!(benches);
