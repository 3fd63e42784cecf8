//! Benchmarks for the per-item hot path of drupal-migrate.
//!
//! Run with: cargo bench -p drupal-migrate

#![allow(clippy::pedantic)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;

use drupal_migrate::config::MigrationOptions;
use drupal_migrate::connectors::memory::MemorySource;
use drupal_migrate::job::JobArgs;
use drupal_migrate::parser::parse_item;
use drupal_migrate::store::memory::MemoryStore;
use drupal_migrate::transform::{ExtensionPoint, TransformContext};
use drupal_migrate::validator::{extract_images, ValidatorRules};
use drupal_migrate::{
    register_builtin, EntityKind, MigrationJob, Pipeline, RawRow, RunMode, TransformRegistry,
};

fn post_row(nid: u64) -> RawRow {
    [
        ("drupal_nid", json!(nid)),
        ("drupal_uid", json!(nid % 17)),
        ("post_title", json!("Caf&eacute; &amp; &quot;bar&quot;")),
        (
            "post_content",
            json!("<p>Lorem &hellip; ipsum <img src=\"/sites/default/files/a.jpg\"></p>".repeat(20)),
        ),
        ("post_excerpt", json!("")),
        ("post_date", json!(1_500_000_000)),
        ("post_modified", json!(1_500_000_100)),
        ("post_type", json!("article")),
        ("url_alias", json!([{ "alias": "a" }, { "alias": "b" }])),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
}

fn registry() -> TransformRegistry {
    let mut registry = TransformRegistry::new();
    register_builtin(&mut registry, &MigrationOptions::default());
    registry
}

/// Benchmark parse + built-in transforms for one post
fn bench_parse_and_transform(c: &mut Criterion) {
    let registry = registry();
    let row = post_row(1);
    let ctx = TransformContext::default();

    c.bench_function("parse_transform_post", |b| {
        b.iter(|| {
            let record = parse_item(EntityKind::Post, row.clone()).unwrap();
            black_box(registry.apply(ExtensionPoint::Post, record, &ctx))
        })
    });
}

/// Benchmark image reference extraction used by the validator
fn bench_extract_images(c: &mut Criterion) {
    let rules = ValidatorRules::new("www.example.com", vec!["/sites/default/files/".into()]).unwrap();
    let content: String = (0..50)
        .map(|i| format!("<p>text</p><img src=\"/sites/default/files/{i}.jpg\"><img src='https://cdn.other.com/{i}.png'>"))
        .collect();

    c.bench_function("extract_images_100_refs", |b| {
        b.iter(|| black_box(extract_images(&content, &rules)))
    });
}

/// Benchmark full in-memory runs by page size
fn bench_pipeline_page_size(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let transforms = Arc::new(registry());
    let rows: Vec<RawRow> = (1..=500).map(post_row).collect();

    let mut group = c.benchmark_group("pipeline_page_size");
    for page_size in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::new("posts_500", page_size), &page_size, |b, &size| {
            b.to_async(&rt).iter(|| async {
                let pipeline = Pipeline::new(
                    Arc::new(MemorySource::new(rows.clone())),
                    Arc::new(MemoryStore::new()),
                    transforms.clone(),
                );
                let mut job = MigrationJob::new(EntityKind::Post, RunMode::Import, size, JobArgs::default());
                black_box(pipeline.run(&mut job).await.unwrap())
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_parse_and_transform,
    bench_extract_images,
    bench_pipeline_page_size
);
criterion_main!(benches);
