use crate::interaction::{InteractionRecord, ItemId, UserId};
use crate::model::ScoredItem;
use ahash::{AHashMap, AHashSet};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Global popularity ranking used for cold-start users.
///
/// An item's score is its mean rating across every user in the history,
/// counting users who never rated it as zero. Ties rank by ascending item id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopularityIndex {
    ranked: Vec<ScoredItem>,
}

impl PopularityIndex {
    pub fn from_records(records: &[InteractionRecord]) -> Self {
        let users: AHashSet<UserId> = records.iter().map(|r| r.user_id).collect();
        let mut sums: AHashMap<ItemId, f32> = AHashMap::new();
        for record in records {
            *sums.entry(record.item_id).or_default() += record.rating;
        }
        let divisor = users.len().max(1) as f32;
        Self::from_scores(sums.into_iter().map(|(item_id, sum)| (item_id, sum / divisor)))
    }

    pub fn from_scores<I: IntoIterator<Item = (ItemId, f32)>>(scores: I) -> Self {
        let mut ranked: Vec<ScoredItem> = scores
            .into_iter()
            .map(|(item_id, score)| ScoredItem { item_id, score })
            .collect();
        ranked.sort_by_key(|s| (std::cmp::Reverse(OrderedFloat(s.score)), s.item_id));
        Self { ranked }
    }

    /// Top `n` items, restricted to `active` when given.
    pub fn top(&self, n: usize, active: Option<&AHashSet<ItemId>>) -> Vec<ScoredItem> {
        self.ranked
            .iter()
            .filter(|s| active.map_or(true, |set| set.contains(&s.item_id)))
            .take(n)
            .cloned()
            .collect()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}
