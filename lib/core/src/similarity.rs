//! Neighborhood collaborative filtering
//!
//! Pivots interactions into a dense user × item [`RatingMatrix`], min-max
//! scales each item column, and computes the cosine similarity between every
//! pair of user rows. Predictions are similarity-weighted averages over the
//! top-k most similar users who rated the item.

use crate::augment::AugmentedSet;
use crate::config::ModelKind;
use crate::interaction::{InteractionRecord, ItemId, UserId};
use crate::model::{Exhausted, ModelBuilder, RecommendQuery, Recommender, ScoredItem};
use crate::popularity::PopularityIndex;
use crate::vector::cosine_similarity;
use crate::vocabulary::Vocabulary;
use crate::{Error, Result};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Dense user × item ratings; 0 means unobserved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingMatrix {
    users: Vocabulary,
    items: Vocabulary,
    values: Vec<f32>,
}

impl RatingMatrix {
    pub fn from_records(records: &[InteractionRecord]) -> Result<Self> {
        let users = Vocabulary::from_ids(records.iter().map(|r| r.user_id));
        let items = Vocabulary::from_ids(records.iter().map(|r| r.item_id));
        if users.is_empty() || items.is_empty() {
            return Err(Error::Data("rating matrix is empty".to_string()));
        }

        let mut values = vec![0.0; users.len() * items.len()];
        for record in records {
            if let (Some(u), Some(i)) = (users.index_of(record.user_id), items.index_of(record.item_id)) {
                values[u * items.len() + i] = record.rating;
            }
        }
        Ok(Self { users, items, values })
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

    /// (rows, columns)
    #[inline]
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.users.len(), self.items.len())
    }

    #[inline]
    #[must_use]
    pub fn row(&self, user: usize) -> &[f32] {
        let width = self.items.len();
        &self.values[user * width..(user + 1) * width]
    }

    #[inline]
    #[must_use]
    pub fn get(&self, user: usize, item: usize) -> f32 {
        self.values[user * self.items.len() + item]
    }

    /// Fraction of cells without an observed rating.
    pub fn sparsity(&self) -> f32 {
        if self.values.is_empty() {
            return 1.0;
        }
        let observed = self.values.iter().filter(|&&v| v > 0.0).count();
        1.0 - observed as f32 / self.values.len() as f32
    }

    /// Mean of each column over all rows.
    pub fn column_means(&self) -> Vec<(ItemId, f32)> {
        let (rows, cols) = self.shape();
        (0..cols)
            .map(|i| {
                let sum: f32 = (0..rows).map(|u| self.get(u, i)).sum();
                (self.items.ids()[i], sum / rows as f32)
            })
            .collect()
    }

    /// Copy with every column min-max scaled to [0, 1]; constant columns become 0.
    pub fn min_max_scaled(&self) -> Vec<f32> {
        let (rows, cols) = self.shape();
        let mut scaled = self.values.clone();
        for i in 0..cols {
            let (min, max) = (0..rows).fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), u| {
                let v = self.get(u, i);
                (lo.min(v), hi.max(v))
            });
            let range = max - min;
            for u in 0..rows {
                let cell = &mut scaled[u * cols + i];
                *cell = if range > 0.0 { (*cell - min) / range } else { 0.0 };
            }
        }
        scaled
    }

    fn validate(&self) -> Result<()> {
        if self.values.len() != self.users.len() * self.items.len() {
            return Err(Error::Persistence(format!(
                "rating matrix holds {} cells for shape {:?}",
                self.values.len(),
                self.shape()
            )));
        }
        Ok(())
    }
}

/// Symmetric user × user cosine similarity in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatrix {
    users: Vocabulary,
    values: Vec<f32>,
}

impl SimilarityMatrix {
    pub fn from_ratings(ratings: &RatingMatrix) -> Self {
        let (rows, cols) = ratings.shape();
        let scaled = ratings.min_max_scaled();

        let mut values: Vec<f32> = (0..rows)
            .into_par_iter()
            .flat_map_iter(|a| {
                let row_a = &scaled[a * cols..(a + 1) * cols];
                let scaled = &scaled;
                (0..rows).map(move |b| {
                    let row_b = &scaled[b * cols..(b + 1) * cols];
                    cosine_similarity(row_a, row_b).clamp(0.0, 1.0)
                })
            })
            .collect();

        // mirror the upper triangle
        for a in 0..rows {
            for b in (a + 1)..rows {
                values[b * rows + a] = values[a * rows + b];
            }
        }

        Self {
            users: ratings.users().clone(),
            values,
        }
    }

    #[inline]
    #[must_use]
    pub fn users(&self) -> &Vocabulary {
        &self.users
    }

    #[inline]
    #[must_use]
    pub fn get(&self, a: usize, b: usize) -> f32 {
        self.values[a * self.users.len() + b]
    }

    /// The `k` most similar other users, by descending similarity then ascending id.
    pub fn neighbors(&self, user: usize, k: usize) -> Vec<(usize, f32)> {
        let mut others: Vec<(usize, f32)> = (0..self.users.len())
            .filter(|&other| other != user)
            .map(|other| (other, self.get(user, other)))
            .collect();
        others.sort_by_key(|&(other, sim)| (Reverse(OrderedFloat(sim)), self.users.ids()[other]));
        others.truncate(k);
        others
    }
}

/// Rating and similarity matrices plus the derived popularity ranking
#[derive(Debug, Clone)]
pub struct SimilarityModel {
    ratings: RatingMatrix,
    similarity: SimilarityMatrix,
    popularity: PopularityIndex,
}

impl SimilarityModel {
    pub fn build(records: &[InteractionRecord]) -> Result<Self> {
        let ratings = RatingMatrix::from_records(records)?;
        let similarity = SimilarityMatrix::from_ratings(&ratings);
        Ok(Self::assemble(ratings, similarity))
    }

    /// Reassemble a model from persisted matrices.
    pub fn from_parts(ratings: RatingMatrix, similarity: SimilarityMatrix) -> Result<Self> {
        ratings.validate()?;
        let n = ratings.users().len();
        if similarity.users != ratings.users || similarity.values.len() != n * n {
            return Err(Error::Persistence(
                "similarity matrix does not match rating matrix users".to_string(),
            ));
        }
        Ok(Self::assemble(ratings, similarity))
    }

    fn assemble(ratings: RatingMatrix, similarity: SimilarityMatrix) -> Self {
        let popularity = PopularityIndex::from_scores(ratings.column_means());
        Self {
            ratings,
            similarity,
            popularity,
        }
    }

    #[inline]
    #[must_use]
    pub fn ratings(&self) -> &RatingMatrix {
        &self.ratings
    }

    #[inline]
    #[must_use]
    pub fn similarity(&self) -> &SimilarityMatrix {
        &self.similarity
    }

    pub fn into_parts(self) -> (RatingMatrix, SimilarityMatrix) {
        (self.ratings, self.similarity)
    }
}

impl Recommender for SimilarityModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Similarity
    }

    fn contains_user(&self, user_id: UserId) -> bool {
        self.ratings.users().contains(user_id)
    }

    fn unrated_items(&self, user_id: UserId) -> Vec<ItemId> {
        let Some(user) = self.ratings.users().index_of(user_id) else {
            return Vec::new();
        };
        self.ratings
            .row(user)
            .iter()
            .zip(self.ratings.items().ids())
            .filter(|(&rating, _)| rating == 0.0)
            .map(|(_, &item)| item)
            .collect()
    }

    fn score(&self, user_id: UserId, candidates: &[ItemId], query: &RecommendQuery) -> Vec<ScoredItem> {
        let Some(user) = self.ratings.users().index_of(user_id) else {
            return Vec::new();
        };
        let neighbors = self.similarity.neighbors(user, query.top_k_neighbors);

        candidates
            .iter()
            .filter_map(|&item_id| {
                let item = self.ratings.items().index_of(item_id)?;
                let (weighted, total) = neighbors
                    .iter()
                    .map(|&(other, sim)| (sim, self.ratings.get(other, item)))
                    .filter(|&(_, rating)| rating > 0.0)
                    .fold((0.0f32, 0.0f32), |(w, t), (sim, rating)| (w + sim * rating, t + sim));
                let score = if total > 0.0 { weighted / total } else { 0.0 };
                Some(ScoredItem { item_id, score })
            })
            .collect()
    }

    fn popularity(&self) -> &PopularityIndex {
        &self.popularity
    }

    fn on_exhausted(&self) -> Exhausted {
        Exhausted::Popularity
    }

    fn num_users(&self) -> usize {
        self.ratings.shape().0
    }

    fn num_items(&self) -> usize {
        self.ratings.shape().1
    }
}

/// Builds [`SimilarityModel`]s; always rebuilds from scratch
#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityBuilder;

impl ModelBuilder for SimilarityBuilder {
    type Model = SimilarityModel;

    fn train(&self, data: &AugmentedSet) -> Result<SimilarityModel> {
        SimilarityModel::build(&data.records)
    }

    fn fine_tune(&self, _prior: &SimilarityModel, _data: &AugmentedSet) -> Result<Option<SimilarityModel>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::Source;

    fn record(user: i64, item: i64, rating: f32) -> InteractionRecord {
        InteractionRecord::new(user, item, rating, Source::Review)
    }

    fn two_users() -> Vec<InteractionRecord> {
        vec![record(1, 10, 4.0), record(1, 11, 2.0), record(2, 10, 5.0), record(2, 11, 1.0)]
    }

    #[test]
    fn test_rating_matrix_pivot() {
        let matrix = RatingMatrix::from_records(&[record(2, 11, 3.0), record(1, 10, 4.0)]).unwrap();
        assert_eq!(matrix.shape(), (2, 2));
        assert_eq!(matrix.row(0), &[4.0, 0.0]);
        assert_eq!(matrix.row(1), &[0.0, 3.0]);
        assert!((matrix.sparsity() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_empty_matrix_is_data_error() {
        assert!(matches!(RatingMatrix::from_records(&[]), Err(Error::Data(_))));
    }

    #[test]
    fn test_min_max_scaling() {
        let matrix = RatingMatrix::from_records(&two_users()).unwrap();
        let scaled = matrix.min_max_scaled();
        // column 10: [4, 5] -> [0, 1]; column 11: [2, 1] -> [1, 0]
        assert_eq!(scaled, vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_constant_column_scales_to_zero() {
        let matrix = RatingMatrix::from_records(&[record(1, 10, 3.0), record(2, 10, 3.0)]).unwrap();
        assert_eq!(matrix.min_max_scaled(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_similarity_symmetric_and_bounded() {
        let records = vec![
            record(1, 10, 4.0),
            record(1, 12, 1.0),
            record(2, 10, 5.0),
            record(2, 11, 2.0),
            record(3, 11, 4.5),
            record(3, 12, 3.0),
            record(4, 10, 1.0),
        ];
        let ratings = RatingMatrix::from_records(&records).unwrap();
        let sim = SimilarityMatrix::from_ratings(&ratings);
        let n = ratings.shape().0;
        for a in 0..n {
            for b in 0..n {
                assert_eq!(sim.get(a, b), sim.get(b, a));
                assert!((0.0..=1.0).contains(&sim.get(a, b)));
            }
        }
    }

    #[test]
    fn test_neighbors_exclude_self() {
        let model = SimilarityModel::build(&two_users()).unwrap();
        let neighbors = model.similarity().neighbors(0, 5);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].0, 1);
    }

    #[test]
    fn test_fully_rated_user_falls_back_to_popularity() {
        let model = SimilarityModel::build(&two_users()).unwrap();
        let query = RecommendQuery { top_k_neighbors: 1, top_n: 2 };
        let recs = model.recommend(1, &query, None);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].item_id, 10);
        assert!((recs[0].score - 4.5).abs() < 1e-6);
        assert_eq!(recs[1].item_id, 11);
        assert!((recs[1].score - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_weighted_neighbor_prediction() {
        let records = vec![
            record(1, 10, 5.0),
            record(2, 10, 5.0),
            record(2, 11, 4.0),
            record(3, 10, 4.0),
            record(3, 11, 2.0),
            record(3, 12, 3.0),
        ];
        let model = SimilarityModel::build(&records).unwrap();
        let query = RecommendQuery { top_k_neighbors: 2, top_n: 5 };
        let recs = model.recommend(1, &query, None);

        let ids: Vec<_> = recs.iter().map(|s| s.item_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&11) && ids.contains(&12));

        let (u1, u2, u3) = (0, 1, 2);
        let s12 = model.similarity().get(u1, u2);
        let s13 = model.similarity().get(u1, u3);
        let item11 = recs.iter().find(|s| s.item_id == 11).unwrap();
        let expected = if s12 + s13 > 0.0 { (s12 * 4.0 + s13 * 2.0) / (s12 + s13) } else { 0.0 };
        assert!((item11.score - expected).abs() < 1e-5);
    }

    #[test]
    fn test_item_without_neighbor_rating_scores_zero() {
        let records = vec![record(1, 10, 5.0), record(2, 10, 5.0), record(3, 11, 4.0)];
        let model = SimilarityModel::build(&records).unwrap();
        let query = RecommendQuery { top_k_neighbors: 1, top_n: 5 };
        // user 1's single neighbor is user 2, who never rated item 11
        let recs = model.recommend(1, &query, None);
        assert_eq!(recs, vec![ScoredItem { item_id: 11, score: 0.0 }]);
    }

    #[test]
    fn test_unknown_users_get_identical_popularity() {
        let model = SimilarityModel::build(&two_users()).unwrap();
        let query = RecommendQuery::default();
        assert_eq!(model.recommend(-1, &query, None), model.recommend(999, &query, None));
        assert_eq!(model.recommend(-1, &query, None)[0].item_id, 10);
    }

    #[test]
    fn test_from_parts_rejects_mismatch() {
        let a = SimilarityModel::build(&two_users()).unwrap();
        let b = SimilarityModel::build(&[record(7, 10, 1.0)]).unwrap();
        let (ratings, _) = a.into_parts();
        let (_, similarity) = b.into_parts();
        assert!(matches!(
            SimilarityModel::from_parts(ratings, similarity),
            Err(Error::Persistence(_))
        ));
    }

    #[test]
    fn test_builder_declines_fine_tune() {
        let data = AugmentedSet::unaugmented(two_users());
        let prior = SimilarityBuilder.train(&data).unwrap();
        assert!(SimilarityBuilder.fine_tune(&prior, &data).unwrap().is_none());
    }
}
