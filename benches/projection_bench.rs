use bson::{doc, Bson, Document};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use docdelta::projection::{parse_projection, ProjectionPolicies};
use docdelta::{apply_diff, compute_diff};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generate `n` realistic documents with a mix of scalars, sub-documents and
/// arrays.
fn generate_documents(n: usize) -> Vec<Document> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut docs = Vec::with_capacity(n);
    for i in 0..n {
        let tags: Vec<Bson> = (0..rng.gen_range(0..6))
            .map(|t| Bson::String(format!("tag-{}", t)))
            .collect();
        let ratings: Vec<Bson> = (0..rng.gen_range(0..4))
            .map(|_| {
                Bson::Document(doc! {
                    "user": format!("u{}", rng.gen_range(0..100)),
                    "score": rng.gen_range(0..10),
                })
            })
            .collect();
        docs.push(doc! {
            "_id": i as i64,
            "item": format!("item-{}", i),
            "qty": rng.gen_range(0..1000),
            "size": { "h": rng.gen_range(0..100), "w": rng.gen_range(0..100), "uom": "cm" },
            "tags": tags,
            "ratings": ratings,
        });
    }
    docs
}

fn mutate(doc: &Document, rng: &mut StdRng) -> Document {
    let mut out = doc.clone();
    out.insert("qty", Bson::Int32(rng.gen_range(0..1000)));
    if let Some(Bson::Document(size)) = out.get_mut("size") {
        size.insert("w", Bson::Int32(rng.gen_range(0..100)));
    }
    out.insert("touched", Bson::Boolean(true));
    out
}

fn bench_projection_apply(c: &mut Criterion) {
    let docs = generate_documents(1000);
    let mut executor = parse_projection(
        &doc! {"item": 1, "size.h": 1, "ratings.score": 1},
        ProjectionPolicies::default(),
    )
    .unwrap();
    executor.optimize();

    c.bench_function("projection_apply", |b| {
        b.iter(|| {
            for doc in &docs {
                black_box(executor.apply(doc));
            }
        })
    });
}

fn bench_diff_compute_and_apply(c: &mut Criterion) {
    let docs = generate_documents(1000);
    let mut rng = StdRng::seed_from_u64(7);
    let pairs: Vec<(Document, Document)> = docs
        .iter()
        .map(|d| (d.clone(), mutate(d, &mut rng)))
        .collect();

    c.bench_function("diff_compute", |b| {
        b.iter(|| {
            for (pre, post) in &pairs {
                black_box(compute_diff(pre, post).unwrap());
            }
        })
    });

    let diffs: Vec<_> = pairs
        .iter()
        .map(|(pre, post)| compute_diff(pre, post).unwrap())
        .collect();
    c.bench_function("diff_apply", |b| {
        b.iter(|| {
            for ((pre, _), diff) in pairs.iter().zip(&diffs) {
                black_box(apply_diff(pre, diff).unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_projection_apply, bench_diff_compute_and_apply);
criterion_main!(benches);
