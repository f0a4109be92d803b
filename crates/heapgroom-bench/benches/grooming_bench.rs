//! Grooming engine benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use heapgroom_core::registry::VulnerableObjectDescriptor;
use heapgroom_core::{
    AllocatorAnalyzer, BucketClassifier, BugDescriptor, BugKind, EligibilityTable, EngineConfig,
    GroomingEngine, GroomingPolicy, LayoutCatalog, ObjectRegistry, StrategySynthesizer,
    TraceEvent,
};

/// Alloc/free churn over a few buckets with deterministic addresses.
fn churn_trace(len: usize) -> Vec<TraceEvent> {
    let sizes = [24usize, 48, 64, 96, 200];
    let mut live: Vec<(usize, usize)> = Vec::new();
    let mut events = Vec::with_capacity(len);
    let mut next = 0x10_000usize;
    for i in 0..len {
        if i % 3 == 2
            && let Some((address, size)) = live.pop()
        {
            events.push(TraceEvent::free("Obj", size, address).at(i as u64));
            continue;
        }
        let size = sizes[i % sizes.len()];
        events.push(TraceEvent::alloc("Obj", size, Some(next)).at(i as u64));
        live.push((next, size));
        next += 0x100;
    }
    events
}

fn registry(classifier: &BucketClassifier) -> ObjectRegistry {
    let objects = ["JSFunction", "JSObject", "DOMNode", "ArrayBuffer", "TypedArray", "DataView"]
        .iter()
        .zip([64usize, 56, 96, 48, 48, 40])
        .map(|(name, size)| {
            VulnerableObjectDescriptor::new(*name, size, classifier)
                .map(|d| d.with_fields(["length", "backing_store"]))
        })
        .collect::<Result<Vec<_>, _>>()
        .expect("valid registry");
    ObjectRegistry::new(objects, classifier).expect("valid registry")
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    for alignment in [8usize, 16, 64] {
        let classifier = BucketClassifier::new(alignment).expect("alignment");
        group.bench_with_input(BenchmarkId::new("align", alignment), &classifier, |b, cl| {
            b.iter(|| {
                for size in 1..=4096 {
                    criterion::black_box(cl.bucket_of(size).ok());
                }
            });
        });
    }
    group.finish();
}

fn bench_simulate_freelist(c: &mut Criterion) {
    let analyzer = AllocatorAnalyzer::new(&EngineConfig::default()).expect("analyzer");
    let mut group = c.benchmark_group("simulate_freelist");
    for len in [1_000usize, 10_000, 100_000] {
        let trace = churn_trace(len);
        group.bench_with_input(BenchmarkId::new("events", len), &trace, |b, trace| {
            b.iter(|| criterion::black_box(analyzer.simulate_freelist(trace).ok()));
        });
    }
    group.finish();
}

fn bench_simulate_all(c: &mut Criterion) {
    let config = EngineConfig::default();
    let classifier = config.classifier().expect("classifier");
    let engine = GroomingEngine::new(
        &config,
        registry(&classifier),
        EligibilityTable::default(),
        LayoutCatalog::default(),
    )
    .expect("engine");
    let initial = engine
        .analyzer()
        .simulate_freelist(&churn_trace(5_000))
        .expect("replay")
        .state;
    let synthesizer = StrategySynthesizer::new(
        GroomingPolicy {
            pre_allocation_count: 64,
            post_allocation_count: 32,
            ..GroomingPolicy::default()
        },
        classifier,
    );

    let mut group = c.benchmark_group("simulate_all");
    for kind in BugKind::ALL {
        let bug = BugDescriptor::new(kind, 64).expect("bug");
        let candidates: Vec<_> = engine
            .chains()
            .discover(&bug, engine.registry())
            .into_iter()
            .map(|ranked| {
                let strategy = synthesizer.synthesize(&ranked.chain);
                (ranked.chain, strategy)
            })
            .collect();
        group.bench_with_input(
            BenchmarkId::new("kind", kind.as_str()),
            &candidates,
            |b, candidates| {
                b.iter(|| criterion::black_box(synthesizer.simulate_all(candidates, &initial).ok()));
            },
        );
    }
    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let config = EngineConfig::default();
    let classifier = config.classifier().expect("classifier");
    let engine = GroomingEngine::new(
        &config,
        registry(&classifier),
        EligibilityTable::default(),
        LayoutCatalog::default(),
    )
    .expect("engine");
    let trace = churn_trace(10_000);
    let bug = BugDescriptor::new(BugKind::UseAfterFree, 64).expect("bug");

    c.bench_function("plan/uaf_10k_events", |b| {
        b.iter(|| criterion::black_box(engine.plan(&bug, &trace).ok()));
    });
}

criterion_group!(
    benches,
    bench_classify,
    bench_simulate_freelist,
    bench_simulate_all,
    bench_plan
);
criterion_main!(benches);
