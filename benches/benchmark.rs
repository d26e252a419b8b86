// Training and serving benchmarks for both recommendation models
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use rand::rngs::StdRng;
use recx_core::{
    InteractionRecord, LatentConfig, LatentTrainer, RecommendQuery, Recommender, SimilarityModel, Source,
};

fn generate_records(users: i64, items: i64, per_user: usize, seed: u64) -> Vec<InteractionRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let catalog: Vec<i64> = (0..items).collect();
    let mut records = Vec::new();
    for user in 0..users {
        for &item in catalog.choose_multiple(&mut rng, per_user) {
            let rating = (rng.random_range(1.0f32..5.0) * 10.0).round() / 10.0;
            records.push(InteractionRecord::new(user, item, rating, Source::Review));
        }
    }
    records
}

fn bench_config() -> LatentConfig {
    LatentConfig {
        epochs: 5,
        fine_tune_epochs: 3,
        ..LatentConfig::default()
    }
}

fn benchmark_similarity(c: &mut Criterion) {
    let mut group = c.benchmark_group("similarity");

    for users in [100i64, 500, 1000].iter() {
        let records = generate_records(*users, 200, 10, 1);
        group.bench_with_input(BenchmarkId::new("build", users), &records, |b, records| {
            b.iter(|| SimilarityModel::build(black_box(records)).unwrap());
        });

        let model = SimilarityModel::build(&records).unwrap();
        let query = RecommendQuery::default();
        group.bench_with_input(BenchmarkId::new("recommend", users), &model, |b, model| {
            let mut user = 0;
            b.iter(|| {
                user = (user + 1) % *users;
                black_box(model.recommend(user, &query, None))
            });
        });
    }

    group.finish();
}

fn benchmark_latent(c: &mut Criterion) {
    let mut group = c.benchmark_group("latent");
    group.sample_size(10);
    let trainer = LatentTrainer::new(bench_config()).with_seed(7);

    for users in [100i64, 500].iter() {
        let records = generate_records(*users, 200, 10, 2);
        group.bench_with_input(BenchmarkId::new("train", users), &records, |b, records| {
            b.iter(|| trainer.train_full(black_box(records)).unwrap());
        });

        let (prior, _) = trainer.train_full(&records).unwrap();
        let fresh: Vec<InteractionRecord> = generate_records(20, 220, 5, 3)
            .into_iter()
            .map(|r| InteractionRecord::new(r.user_id + users, r.item_id, r.rating, r.source))
            .collect();
        group.bench_with_input(BenchmarkId::new("fine_tune", users), &fresh, |b, fresh| {
            b.iter(|| trainer.fine_tune_with_summary(&prior, black_box(fresh)).unwrap());
        });

        let query = RecommendQuery::default();
        group.bench_with_input(BenchmarkId::new("recommend", users), &prior, |b, model| {
            let mut user = 0;
            b.iter(|| {
                user = (user + 1) % *users;
                black_box(model.recommend(user, &query, None))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_similarity, benchmark_latent);
criterion_main!(benches);
