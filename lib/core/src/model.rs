//! Serving contract shared by both recommendation models.
//!
//! Every model answers the same question: given a user, which items should be
//! shown. The fallback rules are expressed as an explicit decision table
//! ([`Recommender::decide`]) evaluated before any scoring runs:
//!
//! | user known | candidates left | action                         |
//! |------------|-----------------|--------------------------------|
//! | no         | -               | popularity ranking             |
//! | yes        | no              | model's [`Exhausted`] policy   |
//! | yes        | yes             | score candidates, rank, top-n  |

use crate::augment::AugmentedSet;
use crate::config::ModelKind;
use crate::interaction::{ItemId, UserId};
use crate::latent::LatentFactorModel;
use crate::popularity::PopularityIndex;
use crate::similarity::SimilarityModel;
use crate::Result;
use ahash::AHashSet;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: ItemId,
    pub score: f32,
}

/// Per-request serving parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecommendQuery {
    pub top_k_neighbors: usize,
    pub top_n: usize,
}

impl Default for RecommendQuery {
    fn default() -> Self {
        Self {
            top_k_neighbors: 5,
            top_n: 3,
        }
    }
}

/// What a model does for a known user with nothing left to score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    Popularity,
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    ColdStart,
    Exhausted(Exhausted),
    Score(Vec<ItemId>),
}

/// Sort by descending score, ties by ascending item id, keep `n`.
pub fn rank(mut scored: Vec<ScoredItem>, n: usize) -> Vec<ScoredItem> {
    scored.sort_by_key(|s| (Reverse(OrderedFloat(s.score)), s.item_id));
    scored.truncate(n);
    scored
}

pub trait Recommender: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn contains_user(&self, user_id: UserId) -> bool;

    /// Items the user has not rated, ascending by id.
    fn unrated_items(&self, user_id: UserId) -> Vec<ItemId>;

    /// Score candidate items for a known user.
    fn score(&self, user_id: UserId, candidates: &[ItemId], query: &RecommendQuery) -> Vec<ScoredItem>;

    fn popularity(&self) -> &PopularityIndex;

    fn on_exhausted(&self) -> Exhausted;

    fn num_users(&self) -> usize;

    fn num_items(&self) -> usize;

    fn decide(&self, user_id: UserId, active: Option<&AHashSet<ItemId>>) -> Decision {
        if !self.contains_user(user_id) {
            return Decision::ColdStart;
        }
        let candidates: Vec<ItemId> = self
            .unrated_items(user_id)
            .into_iter()
            .filter(|item| active.map_or(true, |set| set.contains(item)))
            .collect();
        if candidates.is_empty() {
            Decision::Exhausted(self.on_exhausted())
        } else {
            Decision::Score(candidates)
        }
    }

    fn recommend(&self, user_id: UserId, query: &RecommendQuery, active: Option<&AHashSet<ItemId>>) -> Vec<ScoredItem> {
        match self.decide(user_id, active) {
            Decision::ColdStart | Decision::Exhausted(Exhausted::Popularity) => {
                self.popularity().top(query.top_n, active)
            }
            Decision::Exhausted(Exhausted::Empty) => Vec::new(),
            Decision::Score(candidates) => rank(self.score(user_id, &candidates, query), query.top_n),
        }
    }
}

/// Training side of a model: full build plus optional incremental update.
pub trait ModelBuilder {
    type Model;

    fn train(&self, data: &AugmentedSet) -> Result<Self::Model>;

    /// Incrementally update `prior` with `data`. `Ok(None)` means the builder
    /// declines and a full [`ModelBuilder::train`] is required.
    fn fine_tune(&self, prior: &Self::Model, data: &AugmentedSet) -> Result<Option<Self::Model>>;
}

/// Whichever model variant is currently being served
#[derive(Debug, Clone)]
pub enum ActiveModel {
    Similarity(SimilarityModel),
    Latent(LatentFactorModel),
}

impl ActiveModel {
    pub fn as_recommender(&self) -> &dyn Recommender {
        match self {
            ActiveModel::Similarity(model) => model,
            ActiveModel::Latent(model) => model,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.as_recommender().kind()
    }
}
