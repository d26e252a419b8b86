//! Synthetic augmentation
//!
//! Adds a bounded set of synthetic users to the fused interactions so that
//! sparse catalogs still produce a usable neighborhood. Generation is fully
//! determined by [`AugmentConfig::seed`].

use crate::config::AugmentConfig;
use crate::interaction::{InteractionRecord, ItemId, Source, UserId, MAX_RATING};
use crate::{Error, Result};
use ahash::AHashMap;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use tracing::debug;

/// Rating assumed for an item with no real average.
const DEFAULT_ITEM_RATING: f32 = 3.0;

/// Fused interactions plus synthetic ones
#[derive(Debug, Clone)]
pub struct AugmentedSet {
    pub records: Vec<InteractionRecord>,
    /// Number of synthetic records that survived deduplication.
    pub synthetic: usize,
}

impl AugmentedSet {
    /// Wrap records that were not augmented.
    pub fn unaugmented(records: Vec<InteractionRecord>) -> Self {
        Self { records, synthetic: 0 }
    }
}

/// Mean real rating per item.
pub fn item_averages(records: &[InteractionRecord]) -> AHashMap<ItemId, f32> {
    let mut sums: AHashMap<ItemId, (f32, u32)> = AHashMap::new();
    for record in records {
        let entry = sums.entry(record.item_id).or_insert((0.0, 0));
        entry.0 += record.rating;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(item, (sum, count))| (item, sum / count as f32))
        .collect()
}

/// Generate the synthetic records for `records` without merging them.
pub fn synthesize(records: &[InteractionRecord], config: &AugmentConfig) -> Result<Vec<InteractionRecord>> {
    let mut items: Vec<ItemId> = records.iter().map(|r| r.item_id).collect();
    items.sort_unstable();
    items.dedup();

    if items.is_empty() || config.synthetic_user_ids.is_empty() {
        return Ok(Vec::new());
    }

    let averages = item_averages(records);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut synthetic = Vec::new();

    for user_id in config.synthetic_user_ids.clone() {
        let wanted = rng.random_range(config.min_items..=config.max_items);
        let chosen: SmallVec<[ItemId; 4]> = items
            .choose_multiple(&mut rng, wanted.min(items.len()))
            .copied()
            .collect();

        for item_id in chosen {
            let mean = averages.get(&item_id).copied().unwrap_or(DEFAULT_ITEM_RATING);
            let normal = Normal::new(mean, config.rating_std)
                .map_err(|e| Error::InvalidConfig(format!("rating_std: {}", e)))?;
            let rating = normal.sample(&mut rng).clamp(1.0, MAX_RATING);
            let rating = (rating * 10.0).round() / 10.0;
            synthetic.push(InteractionRecord::new(user_id, item_id, rating, Source::Synthetic).with_quantity(1));
        }
    }

    Ok(synthetic)
}

/// Merge synthetic interactions into the fused set.
///
/// Real records are applied after synthetic ones so a synthetic id colliding
/// with a real (user, item) never replaces the real rating.
pub fn augment(records: Vec<InteractionRecord>, config: &AugmentConfig) -> Result<AugmentedSet> {
    let synthetic = synthesize(&records, config)?;
    if synthetic.is_empty() {
        return Ok(AugmentedSet::unaugmented(records));
    }

    let mut merged: BTreeMap<(UserId, ItemId), InteractionRecord> = BTreeMap::new();
    for record in synthetic {
        merged.insert(record.key(), record);
    }
    for record in records {
        merged.insert(record.key(), record);
    }

    let records: Vec<InteractionRecord> = merged.into_values().collect();
    let synthetic = records.iter().filter(|r| r.source == Source::Synthetic).count();
    debug!(total = records.len(), synthetic, "augmented interactions");

    Ok(AugmentedSet { records, synthetic })
}
