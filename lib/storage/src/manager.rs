use crate::artifact::{ArtifactBatch, ArtifactKind, VersionedArtifact};
use crate::lmdb_storage::LmdbArtifactStore;
use crate::store::ArtifactStore;
use ahash::AHashSet;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use recx_core::{
    augment, fuse, ActiveModel, AugmentedSet, EmbeddingModel, EngineConfig, Error, InteractionBatch,
    InteractionRecord, ItemId, LatentFactorModel, LatentTrainer, ModelBuilder, ModelKind, RatingMatrix,
    RecommendQuery, Recommender, Result, ScoredItem, SimilarityBuilder, SimilarityMatrix, SimilarityModel,
    TrainMode, UserId, Vocabulary,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Immutable model state served to readers
#[derive(Debug)]
pub struct ModelSnapshot {
    pub version: u64,
    pub model: ActiveModel,
    pub installed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub loaded: bool,
    pub version: Option<u64>,
    pub model: Option<ModelKind>,
}

/// Outcome of a successful rebuild
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildReport {
    pub build_id: Uuid,
    pub status: String,
    pub model: ModelKind,
    pub version: u64,
    pub users: usize,
    pub items: usize,
    pub interactions: usize,
    pub synthetic: usize,
    pub sparsity: f32,
    pub mode: TrainMode,
}

/// Owns the artifact store and the active model snapshot.
///
/// Readers clone the current `Arc<ModelSnapshot>` and never wait on a rebuild;
/// a rebuild swaps in a new snapshot only after its artifacts are committed.
pub struct ModelManager {
    store: Arc<dyn ArtifactStore>,
    config: EngineConfig,
    active: RwLock<Option<Arc<ModelSnapshot>>>,
    rebuild_lock: Mutex<()>,
}

impl ModelManager {
    /// Manager with no active model, regardless of what `store` holds.
    pub fn new(store: Arc<dyn ArtifactStore>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            active: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
        })
    }

    /// Manager that installs the latest stored artifacts of the configured model, if any.
    pub fn open(store: Arc<dyn ArtifactStore>, config: EngineConfig) -> Result<Self> {
        let manager = Self::new(store, config)?;
        match load_snapshot(manager.store.as_ref(), manager.config.model) {
            Ok(Some(snapshot)) => {
                info!(version = snapshot.version, model = %snapshot.model.kind(), "model loaded from store");
                *manager.active.write() = Some(Arc::new(snapshot));
            }
            Ok(None) => info!(model = %manager.config.model, "no stored model, waiting for a rebuild"),
            Err(e) => warn!(error = %e, "stored artifacts are unusable, waiting for a rebuild"),
        }
        Ok(manager)
    }

    /// LMDB-backed manager rooted at `data_dir`.
    pub fn with_lmdb<P: AsRef<Path>>(data_dir: P, config: EngineConfig) -> Result<Self> {
        let store = LmdbArtifactStore::new(data_dir.as_ref().join("lmdb"))?;
        Self::open(Arc::new(store), config)
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn snapshot(&self) -> Option<Arc<ModelSnapshot>> {
        self.active.read().clone()
    }

    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.active.read().is_some()
    }

    pub fn health(&self) -> Health {
        match self.snapshot() {
            Some(snapshot) => Health {
                loaded: true,
                version: Some(snapshot.version),
                model: Some(snapshot.model.kind()),
            },
            None => Health {
                loaded: false,
                version: None,
                model: None,
            },
        }
    }

    /// Query built from the configured serving defaults.
    pub fn default_query(&self) -> RecommendQuery {
        RecommendQuery {
            top_k_neighbors: self.config.serving.top_k_neighbors,
            top_n: self.config.serving.top_n,
        }
    }

    pub fn recommend(
        &self,
        user_id: UserId,
        query: &RecommendQuery,
        active_items: Option<&AHashSet<ItemId>>,
    ) -> Result<Vec<ScoredItem>> {
        let snapshot = self.snapshot().ok_or(Error::NotReady)?;
        Ok(snapshot.model.as_recommender().recommend(user_id, query, active_items))
    }

    /// Fuse, augment, train or fine-tune, persist, then swap the snapshot.
    ///
    /// Any failure leaves the store and the active snapshot untouched.
    pub fn rebuild(&self, batch: &InteractionBatch) -> Result<RebuildReport> {
        let _guard = self.rebuild_lock.lock();
        let build_id = Uuid::new_v4();
        info!(
            %build_id,
            orders = batch.orders.len(),
            reviews = batch.reviews.len(),
            model = %self.config.model,
            "rebuild started"
        );

        let result = self.run_rebuild(build_id, batch);
        if let Err(e) = &result {
            warn!(%build_id, error = %e, retriable = e.is_retriable(), "rebuild failed");
        }
        result
    }

    fn run_rebuild(&self, build_id: Uuid, batch: &InteractionBatch) -> Result<RebuildReport> {
        let records = fuse(&batch.orders, &batch.reviews)?;
        let data = augment(records, &self.config.augment)?;
        info!(%build_id, interactions = data.records.len(), synthetic = data.synthetic, "interactions prepared");

        let prior = self.snapshot();
        let (model, mode) = match self.config.model {
            ModelKind::Similarity => {
                let prior = prior.as_ref().and_then(|s| match &s.model {
                    ActiveModel::Similarity(model) => Some(model),
                    _ => None,
                });
                let (model, mode) = train_or_fine_tune(&SimilarityBuilder, prior, &data)?;
                (ActiveModel::Similarity(model), mode)
            }
            ModelKind::Latent => {
                let prior = prior.as_ref().and_then(|s| match &s.model {
                    ActiveModel::Latent(model) => Some(model),
                    _ => None,
                });
                let trainer = LatentTrainer::new(self.config.latent.clone());
                let (model, mode) = train_or_fine_tune(&trainer, prior, &data)?;
                (ActiveModel::Latent(model), mode)
            }
        };

        let version = self.store.latest_version()? + 1;
        self.store.commit(artifacts_for(&model, version)?)?;
        info!(%build_id, version, "artifacts committed");

        let report = report_for(build_id, &model, version, &data, mode);
        *self.active.write() = Some(Arc::new(ModelSnapshot {
            version,
            model,
            installed_at: Utc::now(),
        }));
        info!(%build_id, version, users = report.users, items = report.items, mode = ?mode, "snapshot swapped");
        Ok(report)
    }
}

fn train_or_fine_tune<B: ModelBuilder>(
    builder: &B,
    prior: Option<&B::Model>,
    data: &AugmentedSet,
) -> Result<(B::Model, TrainMode)> {
    if let Some(prior) = prior {
        if let Some(model) = builder.fine_tune(prior, data)? {
            return Ok((model, TrainMode::FineTune));
        }
    }
    Ok((builder.train(data)?, TrainMode::Full))
}

fn artifacts_for(model: &ActiveModel, version: u64) -> Result<ArtifactBatch> {
    let mut batch = ArtifactBatch::new(version);
    match model {
        ActiveModel::Similarity(model) => {
            batch
                .put(ArtifactKind::RatingMatrix, model.ratings())?
                .put(ArtifactKind::SimilarityMatrix, model.similarity())?;
        }
        ActiveModel::Latent(model) => {
            batch
                .put(ArtifactKind::UserVocabulary, model.users())?
                .put(ArtifactKind::ItemVocabulary, model.items())?
                .put(ArtifactKind::EmbeddingState, model.embeddings())?
                .put(ArtifactKind::InteractionHistory, &model.history())?;
        }
    }
    Ok(batch)
}

fn report_for(build_id: Uuid, model: &ActiveModel, version: u64, data: &AugmentedSet, mode: TrainMode) -> RebuildReport {
    let (users, items, sparsity) = match model {
        ActiveModel::Similarity(model) => {
            let (users, items) = model.ratings().shape();
            (users, items, model.ratings().sparsity())
        }
        ActiveModel::Latent(model) => {
            let (users, items) = (model.users().len(), model.items().len());
            let cells = (users * items).max(1) as f32;
            (users, items, 1.0 - model.history().len() as f32 / cells)
        }
    };
    RebuildReport {
        build_id,
        status: "success".to_string(),
        model: model.kind(),
        version,
        users,
        items,
        interactions: data.records.len(),
        synthetic: data.synthetic,
        sparsity,
        mode,
    }
}

/// Latest artifacts of `kind`, all required to share one version.
fn fetch_all(store: &dyn ArtifactStore, kinds: &[ArtifactKind]) -> Result<Option<Vec<VersionedArtifact>>> {
    let mut artifacts = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        match store.get(kind)? {
            Some(artifact) => artifacts.push(artifact),
            None => return Ok(None),
        }
    }
    if let Some(first) = artifacts.first() {
        if let Some(stray) = artifacts.iter().find(|a| a.version != first.version) {
            return Err(Error::Persistence(format!(
                "{} is at version {} but {} is at version {}",
                stray.kind, stray.version, first.kind, first.version
            )));
        }
    }
    Ok(Some(artifacts))
}

fn load_snapshot(store: &dyn ArtifactStore, kind: ModelKind) -> Result<Option<ModelSnapshot>> {
    let Some(artifacts) = fetch_all(store, ArtifactKind::for_model(kind))? else {
        return Ok(None);
    };
    let version = artifacts[0].version;

    let model = match kind {
        ModelKind::Similarity => {
            let ratings: RatingMatrix = artifacts[0].open()?;
            let similarity: SimilarityMatrix = artifacts[1].open()?;
            ActiveModel::Similarity(SimilarityModel::from_parts(ratings, similarity)?)
        }
        ModelKind::Latent => {
            let users: Vocabulary = artifacts[0].open()?;
            let items: Vocabulary = artifacts[1].open()?;
            let embeddings: EmbeddingModel = artifacts[2].open()?;
            let history: Vec<InteractionRecord> = artifacts[3].open()?;
            ActiveModel::Latent(LatentFactorModel::from_parts(users, items, embeddings, history)?)
        }
    };

    Ok(Some(ModelSnapshot {
        version,
        model,
        installed_at: Utc::now(),
    }))
}
