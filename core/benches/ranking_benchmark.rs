/// Context ranking benchmarks using Criterion
///
/// Run with: cargo bench --bench ranking_benchmark
///
/// Benchmarks cover:
/// - Ranking stores of increasing size with the default budget
/// - Ranking under a token budget
/// - Filtered queries
use concord_core::{
    ContextBudget, ContextFilter, ContextPriority, ContextRanker, ContextStore, ContextType,
    EntrySpec, RankRequest,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const T0: i64 = 1_700_000_000_000;

fn populated_store(size: usize) -> ContextStore {
    let store = ContextStore::new("bench.agent");
    let priorities = [
        ContextPriority::Low,
        ContextPriority::Medium,
        ContextPriority::High,
        ContextPriority::Critical,
    ];
    for i in 0..size {
        let spec = EntrySpec::conversation(format!("message {i} about topic {}", i % 17))
            .with_priority(priorities[i % priorities.len()])
            .with_tag(format!("topic{}", i % 17));
        store.add_at(spec, T0 + i as i64 * 1_000).unwrap();
    }
    store
}

fn bench_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("ranker_default_budget");
    let ranker = ContextRanker::default();

    for size in [100usize, 1_000, 10_000] {
        let store = populated_store(size);
        let request = RankRequest::new("status").with_tag("topic3");
        let now = T0 + size as i64 * 1_000;

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(ranker.rank_at(&store, &request, now)))
        });
    }
    group.finish();
}

fn bench_rank_token_budget(c: &mut Criterion) {
    let ranker = ContextRanker::default();
    let store = populated_store(1_000);
    let request = RankRequest::for_query("what happened with topic5?")
        .with_budget(ContextBudget::entries(200).with_max_tokens(512));
    let now = T0 + 1_000_000;

    c.bench_function("ranker_token_budget_1000", |b| {
        b.iter(|| black_box(ranker.rank_at(&store, &request, now)))
    });
}

fn bench_query(c: &mut Criterion) {
    let store = populated_store(10_000);
    let now = T0 + 10_000_000;

    c.bench_function("store_query_filtered_10000", |b| {
        b.iter(|| {
            let query = store.query_at(
                ContextFilter::new()
                    .of_type(ContextType::Conversation)
                    .min_priority(ContextPriority::High)
                    .with_tag("topic3")
                    .limit(10),
                now,
            );
            black_box(query.count())
        })
    });
}

criterion_group!(benches, bench_rank, bench_rank_token_budget, bench_query);
criterion_main!(benches);
