// Integration tests for recx
use recx_api::upstream::{parse_orders, parse_reviews};
use recx_core::vector::cosine_similarity;
use recx_core::{
    augment, fuse, ActiveModel, AugmentConfig, EngineConfig, Error, InteractionBatch, InteractionRecord,
    LatentConfig, ModelKind, RawLineItem, RawOrder, RawReview, RecommendQuery, Recommender, SimilarityModel,
    Source,
};
use recx_storage::{ArtifactKind, ArtifactStore, LmdbArtifactStore, ModelManager};
use std::sync::Arc;
use tempfile::TempDir;

fn order(customer: i64, product: i64, quantity: i64) -> RawOrder {
    RawOrder {
        id: None,
        customer_id: Some(customer),
        items: vec![RawLineItem {
            product_id: Some(product),
            variant_id: None,
            quantity: Some(quantity),
        }],
    }
}

fn review(customer: i64, product: i64, rating: f64) -> RawReview {
    RawReview {
        id: None,
        order_id: None,
        product_id: Some(product),
        customer_id: Some(customer),
        rating: Some(rating),
    }
}

fn latent_config() -> EngineConfig {
    EngineConfig {
        model: ModelKind::Latent,
        augment: AugmentConfig::disabled(),
        latent: LatentConfig {
            dim: 8,
            epochs: 10,
            fine_tune_epochs: 5,
            ..LatentConfig::default()
        },
        ..EngineConfig::default()
    }
}

fn catalog_batch() -> InteractionBatch {
    InteractionBatch::new(
        vec![
            order(1, 10, 2),
            order(1, 11, 1),
            order(2, 10, 1),
            order(2, 12, 3),
            order(3, 11, 1),
            order(3, 13, 2),
            order(4, 12, 1),
        ],
        vec![review(1, 10, 4.0), review(2, 12, 1.0), review(4, 13, 5.0)],
    )
}

#[test]
fn test_review_overrides_purchase() {
    let records = fuse(&[order(1, 10, 4)], &[review(1, 10, 2.0), review(1, 10, 3.0)]).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].rating, 2.5);
    assert_eq!(records[0].source, Source::Review);
}

#[test]
fn test_full_coverage_falls_back_to_popularity() {
    let records = vec![
        InteractionRecord::new(1, 10, 4.0, Source::Review),
        InteractionRecord::new(1, 11, 2.0, Source::Review),
        InteractionRecord::new(2, 10, 5.0, Source::Review),
        InteractionRecord::new(2, 11, 1.0, Source::Review),
    ];
    assert!(cosine_similarity(&[4.0, 2.0], &[5.0, 1.0]) > 0.0);

    let model = SimilarityModel::build(&records).unwrap();
    let query = RecommendQuery {
        top_k_neighbors: 1,
        top_n: 3,
    };
    let recs = model.recommend(1, &query, None);
    let ids: Vec<_> = recs.iter().map(|r| r.item_id).collect();
    assert_eq!(ids, vec![10, 11]);
    assert!((recs[0].score - 4.5).abs() < 1e-6);
    assert!((recs[1].score - 1.5).abs() < 1e-6);
}

#[test]
fn test_similarity_matrix_is_symmetric() {
    let records = fuse(&catalog_batch().orders, &catalog_batch().reviews).unwrap();
    let data = augment(records, &AugmentConfig::default()).unwrap();
    assert!(data.synthetic > 0);

    let model = SimilarityModel::build(&data.records).unwrap();
    let n = model.num_users();
    for i in 0..n {
        for j in 0..n {
            assert_eq!(model.similarity().get(i, j), model.similarity().get(j, i));
        }
    }
}

#[test]
fn test_augmentation_is_reproducible() {
    let records = fuse(&catalog_batch().orders, &catalog_batch().reviews).unwrap();
    let a = augment(records.clone(), &AugmentConfig::default()).unwrap();
    let b = augment(records, &AugmentConfig::default()).unwrap();
    assert_eq!(a.records, b.records);
}

#[test]
fn test_empty_rebuild_keeps_version() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(LmdbArtifactStore::new(dir.path()).unwrap());
    let manager = ModelManager::open(store.clone(), EngineConfig::default()).unwrap();

    let result = manager.rebuild(&InteractionBatch::default());
    assert!(matches!(result, Err(Error::Data(_))));
    assert_eq!(store.latest_version().unwrap(), 0);
    assert!(!manager.health().loaded);
}

#[test]
fn test_new_user_grows_vocabulary_and_survives_restart() {
    let dir = TempDir::new().unwrap();
    let prior_ids;
    {
        let manager = ModelManager::with_lmdb(dir.path(), latent_config()).unwrap();
        let first = manager.rebuild(&catalog_batch()).unwrap();
        let snapshot = manager.snapshot().unwrap();
        let ActiveModel::Latent(model) = &snapshot.model else {
            panic!("expected a latent model");
        };
        prior_ids = model.users().ids().to_vec();

        let second = manager
            .rebuild(&InteractionBatch::new(vec![order(99, 11, 1)], vec![review(99, 13, 4.0)]))
            .unwrap();
        assert_eq!(second.version, first.version + 1);
        assert_eq!(second.users, first.users + 1);
    }

    let manager = ModelManager::with_lmdb(dir.path(), latent_config()).unwrap();
    let health = manager.health();
    assert!(health.loaded);
    assert_eq!(health.version, Some(2));

    let snapshot = manager.snapshot().unwrap();
    let ActiveModel::Latent(model) = &snapshot.model else {
        panic!("expected a latent model");
    };
    for (index, id) in prior_ids.iter().enumerate() {
        assert_eq!(model.users().index_of(*id), Some(index));
    }
    let row = model.users().index_of(99).unwrap();
    assert_eq!(row, prior_ids.len());
    assert!(model.embeddings().users().row(row).iter().all(|x| x.is_finite()));

    let recs = manager.recommend(99, &RecommendQuery::default(), None).unwrap();
    assert!(recs.iter().all(|r| r.item_id != 11 && r.item_id != 13));
}

#[test]
fn test_cold_start_is_user_independent() {
    let manager = ModelManager::new(
        Arc::new(recx_storage::MemoryArtifactStore::new()),
        EngineConfig {
            augment: AugmentConfig::disabled(),
            ..EngineConfig::default()
        },
    )
    .unwrap();
    manager.rebuild(&catalog_batch()).unwrap();

    let query = manager.default_query();
    let a = manager.recommend(-1, &query, None).unwrap();
    let b = manager.recommend(5_000, &query, None).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 3);
}

#[test]
fn test_rebuild_from_wire_format() {
    let orders = parse_orders(serde_json::json!({
        "data": {"content": [
            {"id": 1, "customerId": 1, "items": [{"productId": 10, "quantity": 1}, {"productId": 11, "quantity": 2}]},
            {"id": 2, "customerId": 2, "items": [{"productId": 10, "quantity": 3}]}
        ]}
    }))
    .unwrap();
    let reviews = parse_reviews(serde_json::json!([
        {"id": 1, "orderId": 2, "productId": 12, "customerId": 2, "rating": 5}
    ]))
    .unwrap();

    let dir = TempDir::new().unwrap();
    let manager = ModelManager::with_lmdb(dir.path(), EngineConfig::default()).unwrap();
    let report = manager.rebuild(&InteractionBatch::new(orders, reviews)).unwrap();
    assert_eq!(report.version, 1);
    assert!(report.interactions >= 4);
    assert_eq!(manager.health().model, Some(ModelKind::Similarity));
    drop(manager);

    let store = LmdbArtifactStore::new(dir.path().join("lmdb")).unwrap();
    let artifact = store.get(ArtifactKind::SimilarityMatrix).unwrap().unwrap();
    assert_eq!(artifact.version, 1);
    artifact.verify().unwrap();
}
