//! Latent-factor recommendation model
//!
//! Users and items are embedded in a shared space and a rating is predicted
//! as `sigmoid(u · v + b)` in normalized [0, 1] units. Training minimizes
//! squared error with mini-batch gradient descent, early-stops on a held-out
//! split, and finishes with a short negative-sampling pass.
//!
//! A trained model can be fine-tuned with a new interaction batch: both
//! vocabularies grow by appending, prior embedding rows are carried over
//! verbatim, and training runs on the new batch plus a bounded replay sample
//! of older interactions.

use crate::augment::AugmentedSet;
use crate::config::{LatentConfig, ModelKind};
use crate::embedding::{denormalize, EmbeddingModel, Gradients};
use crate::interaction::{InteractionRecord, ItemId, UserId};
use crate::model::{Exhausted, ModelBuilder, RecommendQuery, Recommender, ScoredItem};
use crate::popularity::PopularityIndex;
use crate::vocabulary::Vocabulary;
use crate::{Error, Result};
use ahash::{AHashMap, AHashSet};
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Minimum improvement of the monitored loss that resets patience.
const MIN_DELTA: f32 = 1e-6;

/// Negative draws attempted per requested negative before giving up.
const NEGATIVE_ATTEMPTS_PER_SAMPLE: usize = 20;

/// (user index, item index, normalized target)
type Example = (usize, usize, f32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainMode {
    Full,
    FineTune,
}

/// What one training or fine-tuning pass did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub mode: TrainMode,
    pub examples: usize,
    pub replayed: usize,
    pub epochs_run: usize,
    pub train_losses: Vec<f32>,
    pub validation_losses: Vec<f32>,
    pub negatives: usize,
    pub new_users: usize,
    pub new_items: usize,
}

/// Trained embedding model with its vocabularies and interaction history
#[derive(Debug, Clone)]
pub struct LatentFactorModel {
    users: Vocabulary,
    items: Vocabulary,
    embeddings: EmbeddingModel,
    history: Vec<InteractionRecord>,
    rated: AHashMap<UserId, AHashSet<ItemId>>,
    popularity: PopularityIndex,
}

impl LatentFactorModel {
    /// Reassemble a model from persisted artifacts.
    pub fn from_parts(
        users: Vocabulary,
        items: Vocabulary,
        embeddings: EmbeddingModel,
        history: Vec<InteractionRecord>,
    ) -> Result<Self> {
        if embeddings.users().dim() != embeddings.items().dim() {
            return Err(Error::Persistence(format!(
                "user embedding dim {} does not match item embedding dim {}",
                embeddings.users().dim(),
                embeddings.items().dim()
            )));
        }
        if embeddings.users().rows() != users.len() || embeddings.items().rows() != items.len() {
            return Err(Error::Persistence(format!(
                "embedding rows ({}, {}) do not match vocabulary sizes ({}, {})",
                embeddings.users().rows(),
                embeddings.items().rows(),
                users.len(),
                items.len()
            )));
        }
        if let Some(stray) = history
            .iter()
            .find(|r| !users.contains(r.user_id) || !items.contains(r.item_id))
        {
            return Err(Error::Persistence(format!(
                "history entry ({}, {}) is missing from the vocabularies",
                stray.user_id, stray.item_id
            )));
        }
        Ok(Self::assemble(users, items, embeddings, history))
    }

    fn assemble(users: Vocabulary, items: Vocabulary, embeddings: EmbeddingModel, history: Vec<InteractionRecord>) -> Self {
        let mut rated: AHashMap<UserId, AHashSet<ItemId>> = AHashMap::new();
        for record in &history {
            rated.entry(record.user_id).or_default().insert(record.item_id);
        }
        let popularity = PopularityIndex::from_records(&history);
        Self {
            users,
            items,
            embeddings,
            history,
            rated,
            popularity,
        }
    }

    #[inline]
    #[must_use]
    pub fn users(&self) -> &Vocabulary {
        &self.users
    }

    #[inline]
    #[must_use]
    pub fn items(&self) -> &Vocabulary {
        &self.items
    }

    #[inline]
    #[must_use]
    pub fn embeddings(&self) -> &EmbeddingModel {
        &self.embeddings
    }

    #[inline]
    #[must_use]
    pub fn history(&self) -> &[InteractionRecord] {
        &self.history
    }

    /// Normalized prediction for a known (user, item) pair.
    pub fn predict(&self, user_id: UserId, item_id: ItemId) -> Option<f32> {
        let user = self.users.index_of(user_id)?;
        let item = self.items.index_of(item_id)?;
        Some(self.embeddings.forward(user, item))
    }

    pub fn into_parts(self) -> (Vocabulary, Vocabulary, EmbeddingModel, Vec<InteractionRecord>) {
        (self.users, self.items, self.embeddings, self.history)
    }
}

impl Recommender for LatentFactorModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Latent
    }

    fn contains_user(&self, user_id: UserId) -> bool {
        self.users.contains(user_id)
    }

    fn unrated_items(&self, user_id: UserId) -> Vec<ItemId> {
        let rated = self.rated.get(&user_id);
        let mut items: Vec<ItemId> = self
            .items
            .ids()
            .iter()
            .copied()
            .filter(|item| rated.map_or(true, |set| !set.contains(item)))
            .collect();
        items.sort_unstable();
        items
    }

    fn score(&self, user_id: UserId, candidates: &[ItemId], _query: &RecommendQuery) -> Vec<ScoredItem> {
        let Some(user) = self.users.index_of(user_id) else {
            return Vec::new();
        };
        candidates
            .iter()
            .filter_map(|&item_id| {
                let item = self.items.index_of(item_id)?;
                Some(ScoredItem {
                    item_id,
                    score: denormalize(self.embeddings.forward(user, item)),
                })
            })
            .collect()
    }

    fn popularity(&self) -> &PopularityIndex {
        &self.popularity
    }

    fn on_exhausted(&self) -> Exhausted {
        Exhausted::Empty
    }

    fn num_users(&self) -> usize {
        self.users.len()
    }

    fn num_items(&self) -> usize {
        self.items.len()
    }
}

/// Vocabularies and embeddings of a fine-tune before any gradient update
#[derive(Debug, Clone)]
pub struct FineTunePlan {
    pub users: Vocabulary,
    pub items: Vocabulary,
    pub embeddings: EmbeddingModel,
    /// New interactions first, then the replay sample.
    pub training_set: Vec<InteractionRecord>,
    pub replayed: usize,
    pub new_users: usize,
    pub new_items: usize,
    /// Prior history with the new batch applied on top.
    pub history: Vec<InteractionRecord>,
}

/// Trains and fine-tunes [`LatentFactorModel`]s
#[derive(Debug, Clone, Default)]
pub struct LatentTrainer {
    config: LatentConfig,
    seed: Option<u64>,
}

impl LatentTrainer {
    pub fn new(config: LatentConfig) -> Self {
        Self { config, seed: None }
    }

    /// Fix the training RNG, making runs reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &LatentConfig {
        &self.config
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }

    /// Train from scratch on `records`.
    pub fn train_full(&self, records: &[InteractionRecord]) -> Result<(LatentFactorModel, TrainingSummary)> {
        if records.is_empty() {
            return Err(Error::Training("training set is empty".to_string()));
        }
        let mut rng = self.rng();
        let cfg = &self.config;

        let users = Vocabulary::from_ids(records.iter().map(|r| r.user_id));
        let items = Vocabulary::from_ids(records.iter().map(|r| r.item_id));
        let mut embeddings = EmbeddingModel::random(users.len(), items.len(), cfg.dim, cfg.init_range, &mut rng);

        let examples = to_examples(records, &users, &items);
        let report = fit(
            &mut embeddings,
            examples,
            &FitParams {
                learning_rate: cfg.learning_rate,
                epochs: cfg.epochs,
                patience: cfg.patience,
                batch_size: cfg.batch_size,
                validation_fraction: cfg.validation_fraction,
                regularization: cfg.regularization,
            },
            &mut rng,
        )?;

        let known = known_pairs(records, &users, &items);
        let negatives = negative_sampling(&mut embeddings, &known, cfg, cfg.learning_rate, &mut rng);
        ensure_finite(&embeddings)?;

        let summary = TrainingSummary {
            mode: TrainMode::Full,
            examples: records.len(),
            replayed: 0,
            epochs_run: report.train_losses.len(),
            train_losses: report.train_losses,
            validation_losses: report.validation_losses,
            negatives,
            new_users: users.len(),
            new_items: items.len(),
        };
        info!(
            users = users.len(),
            items = items.len(),
            epochs = summary.epochs_run,
            negatives,
            "latent model trained"
        );

        let history = dedup_sorted(records.to_vec());
        Ok((LatentFactorModel::assemble(users, items, embeddings, history), summary))
    }

    /// Grow vocabularies and embeddings for `new_records` and pick the replay sample.
    pub fn plan_fine_tune<R: Rng + ?Sized>(
        &self,
        prior: &LatentFactorModel,
        new_records: &[InteractionRecord],
        rng: &mut R,
    ) -> Result<FineTunePlan> {
        let cfg = &self.config;

        let mut users = prior.users.clone();
        let mut items = prior.items.clone();
        let new_users = users.extend(new_records.iter().map(|r| r.user_id));
        let new_items = items.extend(new_records.iter().map(|r| r.item_id));
        let embeddings = prior.embeddings.extend(new_users, new_items, cfg.new_row_std, rng)?;

        let new_keys: AHashSet<(UserId, ItemId)> = new_records.iter().map(InteractionRecord::key).collect();
        let eligible: Vec<&InteractionRecord> = prior
            .history
            .iter()
            .filter(|r| !new_keys.contains(&r.key()))
            .collect();
        let replay_len = ((eligible.len() as f32 * cfg.replay_fraction).floor() as usize).min(cfg.replay_cap);

        let mut training_set = new_records.to_vec();
        training_set.extend(eligible.choose_multiple(rng, replay_len).map(|r| (*r).clone()));

        let mut history: Vec<InteractionRecord> = eligible.into_iter().cloned().collect();
        history.extend(new_records.iter().cloned());

        Ok(FineTunePlan {
            users,
            items,
            embeddings,
            training_set,
            replayed: replay_len,
            new_users,
            new_items,
            history: dedup_sorted(history),
        })
    }

    /// Fine-tune `prior` on `new_records` plus a replay sample of its history.
    ///
    /// Returns `Ok(None)` when `prior` has no history to replay, in which case
    /// a full [`LatentTrainer::train_full`] is the right call.
    pub fn fine_tune_with_summary(
        &self,
        prior: &LatentFactorModel,
        new_records: &[InteractionRecord],
    ) -> Result<Option<(LatentFactorModel, TrainingSummary)>> {
        if prior.history.is_empty() {
            return Ok(None);
        }
        let mut rng = self.rng();
        let cfg = &self.config;

        let plan = self.plan_fine_tune(prior, new_records, &mut rng)?;
        if plan.training_set.is_empty() {
            return Err(Error::Training("fine-tune set is empty".to_string()));
        }
        debug!(
            new_users = plan.new_users,
            new_items = plan.new_items,
            replayed = plan.replayed,
            "fine-tune plan ready"
        );

        let FineTunePlan {
            users,
            items,
            mut embeddings,
            training_set,
            replayed,
            new_users,
            new_items,
            history,
        } = plan;

        let examples = to_examples(&training_set, &users, &items);
        let report = fit(
            &mut embeddings,
            examples,
            &FitParams {
                learning_rate: cfg.fine_tune_learning_rate,
                epochs: cfg.fine_tune_epochs,
                patience: cfg.fine_tune_patience,
                batch_size: cfg.batch_size,
                validation_fraction: cfg.validation_fraction,
                regularization: cfg.regularization,
            },
            &mut rng,
        )?;

        let known = known_pairs(&history, &users, &items);
        let negatives = negative_sampling(&mut embeddings, &known, cfg, cfg.fine_tune_learning_rate, &mut rng);
        ensure_finite(&embeddings)?;

        let summary = TrainingSummary {
            mode: TrainMode::FineTune,
            examples: training_set.len(),
            replayed,
            epochs_run: report.train_losses.len(),
            train_losses: report.train_losses,
            validation_losses: report.validation_losses,
            negatives,
            new_users,
            new_items,
        };
        info!(
            users = users.len(),
            items = items.len(),
            new_users,
            new_items,
            replayed,
            epochs = summary.epochs_run,
            "latent model fine-tuned"
        );

        Ok(Some((LatentFactorModel::assemble(users, items, embeddings, history), summary)))
    }
}

impl ModelBuilder for LatentTrainer {
    type Model = LatentFactorModel;

    fn train(&self, data: &AugmentedSet) -> Result<LatentFactorModel> {
        self.train_full(&data.records).map(|(model, _)| model)
    }

    fn fine_tune(&self, prior: &LatentFactorModel, data: &AugmentedSet) -> Result<Option<LatentFactorModel>> {
        Ok(self
            .fine_tune_with_summary(prior, &data.records)?
            .map(|(model, _)| model))
    }
}

struct FitParams {
    learning_rate: f32,
    epochs: usize,
    patience: usize,
    batch_size: usize,
    validation_fraction: f32,
    regularization: f32,
}

#[derive(Debug, Default)]
struct FitReport {
    train_losses: Vec<f32>,
    validation_losses: Vec<f32>,
}

fn to_examples(records: &[InteractionRecord], users: &Vocabulary, items: &Vocabulary) -> Vec<Example> {
    records
        .iter()
        .filter_map(|r| Some((users.index_of(r.user_id)?, items.index_of(r.item_id)?, r.normalized_rating())))
        .collect()
}

fn known_pairs(records: &[InteractionRecord], users: &Vocabulary, items: &Vocabulary) -> AHashSet<(usize, usize)> {
    records
        .iter()
        .filter_map(|r| Some((users.index_of(r.user_id)?, items.index_of(r.item_id)?)))
        .collect()
}

/// Later records win on duplicate keys; output is sorted by key.
fn dedup_sorted(records: Vec<InteractionRecord>) -> Vec<InteractionRecord> {
    let mut by_key: BTreeMap<(UserId, ItemId), InteractionRecord> = BTreeMap::new();
    for record in records {
        by_key.insert(record.key(), record);
    }
    by_key.into_values().collect()
}

fn ensure_finite(embeddings: &EmbeddingModel) -> Result<()> {
    if embeddings.is_finite() {
        Ok(())
    } else {
        Err(Error::Training("numerical instability: non-finite embedding values".to_string()))
    }
}

/// Supervised phase with a random train/validation split and early stopping.
fn fit<R: Rng + ?Sized>(
    model: &mut EmbeddingModel,
    mut examples: Vec<Example>,
    params: &FitParams,
    rng: &mut R,
) -> Result<FitReport> {
    if examples.is_empty() {
        return Err(Error::Training("training set is empty".to_string()));
    }
    examples.shuffle(rng);
    let mut validation_len = (examples.len() as f32 * params.validation_fraction).floor() as usize;
    if validation_len >= examples.len() {
        validation_len = 0;
    }
    let validation = examples.split_off(examples.len() - validation_len);
    let mut train = examples;

    let mut report = FitReport::default();
    let mut grads = Gradients::default();
    let mut best = f32::INFINITY;
    let mut stale = 0usize;

    for epoch in 0..params.epochs {
        train.shuffle(rng);
        let mut total = 0.0f32;
        for batch in train.chunks(params.batch_size) {
            grads.clear();
            for &(user, item, target) in batch {
                total += model.accumulate(user, item, target, params.regularization, &mut grads);
            }
            model.apply(&grads, params.learning_rate);
        }
        let train_loss = total / train.len() as f32;
        let monitored = if validation.is_empty() {
            train_loss
        } else {
            let loss = model.loss(&validation);
            report.validation_losses.push(loss);
            loss
        };
        report.train_losses.push(train_loss);

        if !monitored.is_finite() || !train_loss.is_finite() {
            return Err(Error::Training(format!("numerical instability: loss diverged at epoch {}", epoch)));
        }
        debug!(epoch, train_loss, monitored, "epoch finished");

        if monitored < best - MIN_DELTA {
            best = monitored;
            stale = 0;
        } else {
            stale += 1;
            if stale >= params.patience {
                debug!(epoch, best, "early stopping");
                break;
            }
        }
    }

    Ok(report)
}

/// Push random unobserved pairs toward a zero rating. Returns the number applied.
fn negative_sampling<R: Rng + ?Sized>(
    model: &mut EmbeddingModel,
    known: &AHashSet<(usize, usize)>,
    cfg: &LatentConfig,
    learning_rate: f32,
    rng: &mut R,
) -> usize {
    let num_users = model.users().rows();
    let num_items = model.items().rows();
    let total = num_users * num_items;
    if total == 0 || known.len() >= total {
        return 0;
    }

    let wanted = cfg.negative_samples.min(total - known.len());
    let mut drawn: AHashSet<(usize, usize)> = AHashSet::with_capacity(wanted);
    let mut grads = Gradients::default();
    let mut attempts = 0usize;

    while drawn.len() < wanted && attempts < wanted * NEGATIVE_ATTEMPTS_PER_SAMPLE {
        attempts += 1;
        let pair = (rng.random_range(0..num_users), rng.random_range(0..num_items));
        if known.contains(&pair) || !drawn.insert(pair) {
            continue;
        }
        grads.clear();
        model.accumulate(pair.0, pair.1, 0.0, cfg.regularization, &mut grads);
        model.apply(&grads, learning_rate);
    }

    drawn.len()
}
