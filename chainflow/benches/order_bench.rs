//! Benchmarks for the step order policy.

use chainflow::core::Step;
use chainflow::order::{validate_and_order, CanonicalOrder};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use uuid::Uuid;

fn steps_for(order: &CanonicalOrder, names: &[&str]) -> Vec<Step> {
    let pipeline_id = Uuid::new_v4();
    names
        .iter()
        .map(|n| Step::new(pipeline_id, *n, order.index_of(n).unwrap_or_default()))
        .collect()
}

fn order_benchmark(c: &mut Criterion) {
    let circ = CanonicalOrder::circ_rna();
    let full = steps_for(&circ, &circ.names().iter().rev().map(String::as_str).collect::<Vec<_>>());
    c.bench_function("validate_and_order/circ_rna_full", |b| {
        b.iter(|| validate_and_order(black_box(&circ), black_box(&full)))
    });

    let names: Vec<String> = (0..200).map(|i| format!("step{i:03}")).collect();
    let wide = CanonicalOrder::new(names.iter().cloned());
    let selected: Vec<&str> = names[50..150].iter().rev().map(String::as_str).collect();
    let wide_steps = steps_for(&wide, &selected);
    c.bench_function("validate_and_order/100_of_200", |b| {
        b.iter(|| validate_and_order(black_box(&wide), black_box(&wide_steps)))
    });

    let mut gapped = wide_steps.clone();
    gapped.remove(40);
    c.bench_function("validate_and_order/gap_rejected", |b| {
        b.iter(|| validate_and_order(black_box(&wide), black_box(&gapped)).is_err())
    });
}

criterion_group!(benches, order_benchmark);
criterion_main!(benches);
