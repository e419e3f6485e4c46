//! Benchmarks for hint inference over correction samples
//!
//! Run with: cargo bench -p formsight-learning

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use formsight_core::Correction;
use formsight_learning::inference::{generalize, infer_field_hint};
use formsight_learning::LearningConfig;

fn corrections(count: usize) -> Vec<Correction> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let values = ["05.03.2024", "INV-2024-0012", "Istanbul", "1.250,00", "ankara "];
    (0..count)
        .map(|i| Correction {
            id: i as i64,
            document_id: i as i64,
            template_field_id: Some(1),
            original_value: None,
            corrected_value: values[i % values.len()].to_string(),
            context: Default::default(),
            user_id: None,
            created_at: start + Duration::minutes(i as i64),
        })
        .collect()
}

fn benchmark_inference(c: &mut Criterion) {
    let config = LearningConfig::default();
    let mut group = c.benchmark_group("hint_inference");

    for size in [10usize, 200, 1_000] {
        let sample = corrections(size);
        let refs: Vec<&Correction> = sample.iter().collect();
        group.bench_with_input(BenchmarkId::new("infer_field_hint", size), &refs, |b, refs| {
            b.iter(|| infer_field_hint(1, black_box(refs), &config))
        });
    }
    group.finish();

    c.bench_function("generalize", |b| b.iter(|| generalize(black_box("INV-2024-0012 / TR 34"))));
}

criterion_group!(benches, benchmark_inference);
criterion_main!(benches);
