//! # recx Core
//!
//! Core library for the recx recommendation engine.
//!
//! This crate turns raw orders and reviews into ratings and trains the two
//! recommendation models served by the engine:
//!
//! - [`fuse`] - Merge purchases and reviews into one rating per (user, item)
//! - [`augment`] - Seeded synthetic users for sparse catalogs
//! - [`SimilarityModel`] - User-user cosine similarity over a rating matrix
//! - [`LatentFactorModel`] - Embedding model with incremental fine-tuning
//! - [`Recommender`] - Shared serving contract and fallback rules
//!
//! ## Example
//!
//! ```rust
//! use recx_core::{fuse, augment, AugmentConfig, RecommendQuery, Recommender, SimilarityModel};
//! use recx_core::{RawLineItem, RawOrder};
//!
//! let orders = vec![
//!     RawOrder { id: Some(1), customer_id: Some(1), items: vec![RawLineItem { product_id: Some(10), variant_id: None, quantity: Some(2) }] },
//!     RawOrder { id: Some(2), customer_id: Some(2), items: vec![RawLineItem { product_id: Some(11), variant_id: None, quantity: Some(1) }] },
//! ];
//! let records = fuse(&orders, &[]).unwrap();
//! let data = augment(records, &AugmentConfig::default()).unwrap();
//! let model = SimilarityModel::build(&data.records).unwrap();
//!
//! let recs = model.recommend(1, &RecommendQuery::default(), None);
//! assert!(recs.iter().all(|r| r.item_id != 10));
//! ```

pub mod augment;
pub mod config;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod interaction;
pub mod latent;
pub mod model;
pub mod popularity;
pub mod similarity;
pub mod vocabulary;

/// Dense vector helpers shared by both models
pub mod vector;

pub use augment::{augment, AugmentedSet};
pub use config::{AugmentConfig, EngineConfig, LatentConfig, ModelKind, ServingConfig};
pub use embedding::{EmbeddingModel, EmbeddingTable};
pub use error::{Error, Result};
pub use fusion::fuse;
pub use interaction::{
    DateRange, InteractionBatch, InteractionRecord, ItemId, RawLineItem, RawOrder, RawReview, Source, UserId,
};
pub use latent::{LatentFactorModel, LatentTrainer, TrainMode, TrainingSummary};
pub use model::{ActiveModel, ModelBuilder, RecommendQuery, Recommender, ScoredItem};
pub use popularity::PopularityIndex;
pub use similarity::{RatingMatrix, SimilarityBuilder, SimilarityMatrix, SimilarityModel};
pub use vocabulary::Vocabulary;
