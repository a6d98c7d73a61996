use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use mailfts::index::IndexStore;
use mailfts::model::message::IndexEntry;
use mailfts::search::fts5;
use mailfts::search::query::{parse_query, SearchScope};

const WORDS: &[&str] = &[
    "invoice", "meeting", "project", "deadline", "budget", "travel", "report", "review",
    "release", "holiday", "contract", "payment",
];

fn populated_store(dir: &std::path::Path, count: i64) -> IndexStore {
    let (mut store, _) = IndexStore::open(dir.join("bench.fts.db")).unwrap();
    let writer = store.begin().unwrap();
    for id in 1..=count {
        let word = |n: i64| WORDS[(n as usize) % WORDS.len()];
        writer
            .insert(&IndexEntry {
                id,
                account: id % 3,
                folder: id % 7,
                time: id * 60_000,
                address: format!("user{} <user{}@example.com>", id % 50, id % 50),
                subject: format!("{} {}", word(id), word(id / 3)),
                keyword: String::new(),
                text: format!("{} {} {} {}", word(id), word(id * 7), word(id / 5), word(id + 3)),
                notes: String::new(),
            })
            .unwrap();
    }
    writer.commit().unwrap();
    store
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_query", |b| {
        b.iter(|| {
            let spec = parse_query(black_box("invoice +budget -travel ?holiday"), SearchScope::default());
            fts5::render(&spec)
        })
    });
}

fn bench_match(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = populated_store(dir.path(), 10_000);
    let phrase = parse_query("project deadline", SearchScope::default());
    let operators = parse_query(
        "+invoice -travel ?holiday",
        SearchScope {
            account: Some(1),
            ..SearchScope::default()
        },
    );

    c.bench_function("match_phrase_10k", |b| {
        b.iter(|| store.match_ids(black_box(&phrase)).unwrap())
    });
    c.bench_function("match_operators_scoped_10k", |b| {
        b.iter(|| store.match_ids(black_box(&operators)).unwrap())
    });
    c.bench_function("suggest_prefix_10k", |b| {
        b.iter(|| store.suggestions(black_box("re"), 10).unwrap())
    });
}

criterion_group!(benches, bench_compile, bench_match);
criterion_main!(benches);
