// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use criterion::{criterion_group, criterion_main, Criterion};
use libdd_baggage::{BaggageField, BaggageStateFactory};
use std::hint::black_box;

fn field(name: &str) -> BaggageField {
    BaggageField::new(name).unwrap()
}

fn bench_get_value(c: &mut Criterion) {
    let mut builder = BaggageStateFactory::builder();
    builder.set_dynamic_fields();
    let state = builder.build().unwrap().create();
    for i in 0..16 {
        state.update_value(&field(&format!("field-{i}")), Some("value"));
    }
    let last = field("field-15");

    c.bench_function("get_value/dynamic_tail", |b| {
        b.iter(|| black_box(state.get_value(black_box(&last))))
    });
}

fn bench_update_value(c: &mut Criterion) {
    let mut builder = BaggageStateFactory::builder();
    builder.set_field(field("user-id"));
    let state = builder.build().unwrap().create();
    let user_id = field("user-id");

    let mut flip = false;
    c.bench_function("update_value/declared_field", |b| {
        b.iter(|| {
            flip = !flip;
            let value = if flip { "romeo" } else { "juliet" };
            black_box(state.update_value(&user_id, Some(value)))
        })
    });
}

fn bench_filter_keys(c: &mut Criterion) {
    let mut builder = BaggageStateFactory::builder();
    builder.set_dynamic_fields();
    let state = builder.build().unwrap().create();
    for i in 0..8 {
        state.update_value(&field(&format!("field-{i}")), Some("value"));
    }
    let filtered = [field("field-1"), field("field-6")];

    c.bench_function("to_map_filtering_fields/8_pairs_2_filtered", |b| {
        b.iter(|| black_box(state.to_map_filtering_fields(black_box(&filtered))))
    });
}

criterion_group!(benches, bench_get_value, bench_update_value, bench_filter_keys);
criterion_main!(benches);
