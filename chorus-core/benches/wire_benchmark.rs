use criterion::{black_box, criterion_group, criterion_main, Criterion};
use chorus_core::wire::{self, Field, FieldKind};
use chorus_core::{Pose, RoomDocument};
use serde_json::json;

fn audio_fields() -> Vec<Field> {
    vec![
        Field::U32(5),
        Field::U32(3),
        Field::U32(0),
        Field::F32(0.0),
        Field::F32(20.0),
        Field::Bytes(vec![0u8; 160]),
    ]
}

fn bench_compact_encode(c: &mut Criterion) {
    let fields = audio_fields();
    c.bench_function("compact_encode_audio_160B", |b| {
        b.iter(|| black_box(wire::encode(black_box(&fields)).unwrap()))
    });
}

fn bench_compact_decode(c: &mut Criterion) {
    let encoded = wire::encode(&audio_fields()).unwrap();
    let schema = [
        FieldKind::U32,
        FieldKind::U32,
        FieldKind::U32,
        FieldKind::F32,
        FieldKind::F32,
        FieldKind::Bytes,
    ];
    c.bench_function("compact_decode_audio_160B", |b| {
        b.iter(|| black_box(wire::decode_with(black_box(&encoded), &schema).unwrap()))
    });
}

fn bench_tagged_roundtrip(c: &mut Criterion) {
    let fields = vec![
        Field::U32(4),
        Field::U32(9),
        Field::Static(Pose::default().to_bytes().to_vec()),
        Field::Str("hello".into()),
    ];
    c.bench_function("tagged_roundtrip_pose", |b| {
        b.iter(|| {
            let encoded = wire::encode_tagged(black_box(&fields)).unwrap();
            black_box(wire::decode_tagged(&encoded).unwrap())
        })
    });
}

fn bench_entity_set(c: &mut Criterion) {
    let doc = RoomDocument::new();
    let entity = doc.get_or_create_entity("bench").unwrap();
    let mut n = 0u64;
    c.bench_function("entity_set_single_key", |b| {
        b.iter(|| {
            n += 1;
            entity.set("counter", json!(n)).unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_compact_encode,
    bench_compact_decode,
    bench_tagged_roundtrip,
    bench_entity_set,
);
criterion_main!(benches);
