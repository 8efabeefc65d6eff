//! Criterion benchmarks for gridshard.
//!
//! Covers the hot paths of a built index:
//! - point lookups and cursor walks inside one shard file
//! - posting list packing and unpacking
//! - term-list lookups through the store, served from the local cache

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use gridshard::codec::{Occurrence, PackedPostingCodec, PostingCodec};
use gridshard::config::IndexStoreConfig;
use gridshard::query::{Relation, TermListRequest};
use gridshard::shard::{ShardOptions, ShardReader, ShardWriter};
use gridshard::spill::TermRecord;
use gridshard::store::GridIndexStore;
use tempfile::TempDir;

/// Sorted terms sharing a leading character.
fn generate_terms(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("term{i:07}")).collect()
}

fn generate_occurrences(count: usize) -> Vec<Occurrence> {
    (0..count as u64)
        .map(|doc| Occurrence::with_positions(doc, doc % 3, vec![1, 5, 9, (doc % 100) as u32]))
        .collect()
}

fn bench_shard_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("shard_lookup");
    let codec = PackedPostingCodec::new();

    for size in [1_000, 100_000] {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.index");
        let terms = generate_terms(size);
        let options = ShardOptions::default();

        let mut writer = ShardWriter::create(&path, &options).unwrap();
        for (id, term) in terms.iter().enumerate() {
            let value = codec.serialize(id as u64 + 1, &generate_occurrences(4)).unwrap();
            writer.put(term.as_bytes(), &value).unwrap();
        }
        writer.close().unwrap();
        let reader = ShardReader::open(&path, &options).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("get", size), &terms, |b, terms| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 7919) % terms.len();
                black_box(reader.get(terms[i].as_bytes()).unwrap())
            })
        });

        group.bench_with_input(BenchmarkId::new("walk_100", size), &terms, |b, terms| {
            let start = terms[terms.len() / 2].as_bytes();
            b.iter(|| {
                let mut cursor = reader.cursor();
                let mut entry = cursor.seek_ge(start).unwrap();
                let mut seen = 0;
                while let Some((key, _)) = entry {
                    black_box(key);
                    seen += 1;
                    if seen == 100 {
                        break;
                    }
                    entry = cursor.next().unwrap();
                }
                seen
            })
        });
    }

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let codec = PackedPostingCodec::new();

    for records in [10, 1_000] {
        let occurrences = generate_occurrences(records);
        let packed = codec.serialize(1, &occurrences).unwrap();

        group.throughput(Throughput::Elements(records as u64));
        group.bench_with_input(BenchmarkId::new("serialize", records), &occurrences, |b, occ| {
            b.iter(|| black_box(codec.serialize(1, occ).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("deserialize", records), &packed, |b, packed| {
            b.iter(|| black_box(codec.deserialize(packed).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("summary", records), &packed, |b, packed| {
            b.iter(|| black_box(codec.deserialize_summary(&packed[..codec.summary_len()]).unwrap()))
        });
    }

    group.finish();
}

fn bench_term_list(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store =
        GridIndexStore::open(IndexStoreConfig::new(dir.path(), "memory://bench-term-list")).unwrap();

    let records: Vec<TermRecord> = ["apple", "banana", "cherry", "date", "elder", "fig"]
        .iter()
        .flat_map(|fruit| {
            (0..2_000u64).map(move |i| TermRecord::new(format!("{fruit}{i:05}"), i, 0, i % 4 + 1))
        })
        .collect();
    store.create_index("title").unwrap();
    store.begin_indexing("title").unwrap();
    store.store_terms("title", &records).unwrap();
    store.commit_indexing("title").unwrap();

    let mut group = c.benchmark_group("term_list");
    for summary_only in [false, true] {
        let request = TermListRequest::new("banana01990")
            .relation(Relation::Ge)
            .limit(50)
            .summary_only(summary_only);
        group.bench_with_input(
            BenchmarkId::new("cross_shard_ge_50", summary_only),
            &request,
            |b, request| b.iter(|| black_box(store.fetch_term_list("title", request).unwrap())),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_shard_lookup, bench_codec, bench_term_list);
criterion_main!(benches);
