//! # recx
//!
//! A rating-fusion and recommendation engine.
//!
//! recx merges purchase quantities and review scores into one rating per
//! (user, item), optionally pads sparse data with seeded synthetic users, and
//! trains one of two models:
//!
//! - a **similarity model**: user-user cosine similarity over min-max scaled
//!   ratings, predicting with a similarity-weighted neighbor average
//! - a **latent-factor model**: user and item embeddings trained with
//!   mini-batch gradient descent, fine-tuned incrementally as new users and
//!   items arrive
//!
//! Artifacts are versioned and committed atomically; serving reads an
//! immutable snapshot that is swapped only after a successful rebuild.
//!
//! ## Quick Start
//!
//! ### As a Server
//!
//! ```bash
//! cargo install recx
//! recx --data-dir ./data serve --http-port 8000 \
//!     --orders-url http://orders/orders/secure/recommend \
//!     --reviews-url http://products/product/public/recommend
//! ```
//!
//! ### As a Library
//!
//! ```rust,no_run
//! use recx::prelude::*;
//! use std::sync::Arc;
//!
//! let manager = ModelManager::new(Arc::new(MemoryArtifactStore::new()), EngineConfig::default()).unwrap();
//!
//! let orders: Vec<RawOrder> = serde_json::from_str(r#"[
//!     {"id": 1, "customerId": 1, "items": [{"productId": 10, "quantity": 2}]},
//!     {"id": 2, "customerId": 2, "items": [{"productId": 11, "quantity": 1}]}
//! ]"#).unwrap();
//! let report = manager.rebuild(&InteractionBatch::new(orders, vec![])).unwrap();
//! println!("built version {}", report.version);
//!
//! let recs = manager.recommend(1, &manager.default_query(), None).unwrap();
//! ```
//!
//! ## Crate Structure
//!
//! - [`recx-core`](https://docs.rs/recx-core) - Fusion, augmentation, both models, serving rules
//! - [`recx-storage`](https://docs.rs/recx-storage) - Artifact stores (memory, LMDB) and the model manager
//! - [`recx-api`](https://docs.rs/recx-api) - Upstream HTTP client and REST API

// Re-export core types
pub use recx_core::{
    augment, fuse, ActiveModel, AugmentConfig, DateRange, EngineConfig, Error, InteractionBatch,
    InteractionRecord, ItemId, LatentConfig, LatentFactorModel, LatentTrainer, ModelKind, RawOrder,
    RawReview, RecommendQuery, Recommender, Result, ScoredItem, ServingConfig, SimilarityModel, Source,
    UserId,
};

// Re-export storage
pub use recx_storage::{
    ArtifactKind, ArtifactStore, Health, LmdbArtifactStore, MemoryArtifactStore, ModelManager, RebuildReport,
};

// Re-export API
pub use recx_api::{AppState, RestApi, UpstreamClient, UpstreamConfig};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        EngineConfig, Error, InteractionBatch, InteractionRecord, MemoryArtifactStore, ModelKind, ModelManager,
        RawOrder, RawReview, RecommendQuery, Recommender, Result, ScoredItem,
    };
}
