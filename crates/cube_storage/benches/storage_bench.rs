use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use tempfile::tempdir;

use cube_common::types::ShardId;
use cube_common::value::Value;
use cube_storage::codec;
use cube_storage::wal::{ShardWal, SyncMode, WalStats};
use cube_storage::{CountingBloomFilter, DataStore};

const N: usize = 1_000;

fn codec_encode(c: &mut Criterion) {
    c.bench_function("codec_encode_set_1k", |b| {
        b.iter(|| {
            for i in 0..N {
                let key = format!("bench_key_{i:05}");
                codec::encode_set(&key, &Value::Text("payload payload payload".into())).unwrap();
            }
        });
    });
}

fn codec_decode(c: &mut Criterion) {
    let records: Vec<String> = (0..N)
        .map(|i| {
            codec::encode_set(&format!("bench_key_{i:05}"), &Value::Int(i as i64))
                .unwrap()
                .record
        })
        .collect();
    c.bench_function("codec_decode_1k", |b| {
        b.iter(|| {
            for record in &records {
                codec::decode(record).unwrap();
            }
        });
    });
}

fn bloom_add_contains(c: &mut Criterion) {
    c.bench_function("bloom_add_contains_1k", |b| {
        b.iter_batched(
            CountingBloomFilter::with_defaults,
            |filter| {
                for i in 0..N {
                    filter.add(&format!("prefix_{i:05}"));
                }
                for i in 0..N {
                    assert!(filter.contains(&format!("prefix_{i:05}")));
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn datafile_update_or_append(c: &mut Criterion) {
    c.bench_function("datafile_append_500", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                (DataStore::new(dir.path()), dir)
            },
            |(store, _dir)| {
                for i in 0..500 {
                    let enc =
                        codec::encode_set(&format!("k{i:04}"), &Value::Int(i as i64)).unwrap();
                    let prefix = codec::extract_key_prefix(&enc.record).unwrap().to_string();
                    store
                        .update_or_append(ShardId(0), &enc.record, &prefix)
                        .unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn datafile_read_last_match(c: &mut Criterion) {
    c.bench_function("datafile_read_by_prefix", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let store = DataStore::new(dir.path());
                for i in 0..500 {
                    let enc =
                        codec::encode_set(&format!("k{i:04}"), &Value::Int(i as i64)).unwrap();
                    store.append(ShardId(0), &enc.record).unwrap();
                }
                let prefix = codec::encode_get("k0250").unwrap().prefix;
                (store, prefix, dir)
            },
            |(store, prefix, _dir)| {
                assert!(store
                    .read_line_by_prefix(ShardId(0), &prefix)
                    .unwrap()
                    .is_some());
            },
            BatchSize::SmallInput,
        );
    });
}

fn wal_append_fsync(c: &mut Criterion) {
    c.bench_function("wal_append_fsync_100", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let wal = ShardWal::open(
                    dir.path(),
                    ShardId(0),
                    SyncMode::FSync,
                    Arc::new(WalStats::default()),
                );
                (wal, dir)
            },
            |(mut wal, _dir)| {
                for i in 0..100 {
                    let enc = codec::encode_set(&format!("k{i}"), &Value::Int(i)).unwrap();
                    wal.log(&enc.record).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn wal_append_nosync(c: &mut Criterion) {
    c.bench_function("wal_append_nosync_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let wal = ShardWal::open(
                    dir.path(),
                    ShardId(0),
                    SyncMode::None,
                    Arc::new(WalStats::default()),
                );
                (wal, dir)
            },
            |(mut wal, _dir)| {
                for i in 0..N {
                    let enc = codec::encode_set(&format!("k{i}"), &Value::Int(i as i64)).unwrap();
                    wal.log(&enc.record).unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    codec_encode,
    codec_decode,
    bloom_add_contains,
    datafile_update_or_append,
    datafile_read_last_match,
    wal_append_fsync,
    wal_append_nosync,
);

criterion_main!(benches);
