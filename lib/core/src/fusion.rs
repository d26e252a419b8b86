//! Interaction fusion
//!
//! Merges implicit signals (purchased quantity) and explicit signals (review
//! ratings) into exactly one [`InteractionRecord`] per (user, item). An
//! explicit rating always wins over the implicit one, and the record's
//! `source` follows the same precedence.

use crate::interaction::{InteractionRecord, ItemId, RawOrder, RawReview, Source, UserId, MAX_RATING};
use crate::{Error, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Rating points granted per purchased unit.
pub const RATING_PER_UNIT: f32 = 2.5;

#[derive(Debug, Default)]
struct FusedEntry {
    quantity: Option<i64>,
    explicit_sum: f64,
    explicit_count: u32,
}

impl FusedEntry {
    fn implicit_rating(&self) -> Option<f32> {
        match self.quantity {
            Some(q) if q > 0 => Some((q as f32 * RATING_PER_UNIT).min(MAX_RATING)),
            _ => None,
        }
    }

    fn explicit_rating(&self) -> Option<f32> {
        if self.explicit_count == 0 {
            None
        } else {
            let mean = self.explicit_sum / self.explicit_count as f64;
            Some((mean as f32).clamp(0.0, MAX_RATING))
        }
    }
}

/// Implicit rating for a total purchased quantity.
#[inline]
#[must_use]
pub fn implicit_rating(quantity: i64) -> f32 {
    (quantity.max(0) as f32 * RATING_PER_UNIT).min(MAX_RATING)
}

/// Fuse orders and reviews into one record per (user, item), sorted by key.
///
/// Order lines or reviews that cannot be resolved to a (user, item, value)
/// triple are skipped. Returns [`Error::Data`] when nothing survives.
pub fn fuse(orders: &[RawOrder], reviews: &[RawReview]) -> Result<Vec<InteractionRecord>> {
    let mut entries: BTreeMap<(UserId, ItemId), FusedEntry> = BTreeMap::new();
    let mut skipped = 0usize;

    for order in orders {
        let Some(user_id) = order.customer_id else {
            skipped += order.items.len();
            continue;
        };
        for line in &order.items {
            match (line.product_id, line.quantity) {
                (Some(item_id), Some(quantity)) => {
                    let entry = entries.entry((user_id, item_id)).or_default();
                    let total = entry.quantity.get_or_insert(0);
                    *total = total.saturating_add(quantity);
                }
                _ => skipped += 1,
            }
        }
    }

    for review in reviews {
        match (review.customer_id, review.product_id, review.rating) {
            (Some(user_id), Some(item_id), Some(rating)) if rating.is_finite() => {
                let entry = entries.entry((user_id, item_id)).or_default();
                entry.explicit_sum += rating;
                entry.explicit_count += 1;
            }
            _ => skipped += 1,
        }
    }

    let records: Vec<InteractionRecord> = entries
        .into_iter()
        .filter_map(|((user_id, item_id), entry)| {
            let quantity = entry.quantity.and_then(|q| u32::try_from(q).ok());
            let (rating, source) = match (entry.explicit_rating(), entry.implicit_rating()) {
                (Some(rating), _) => (rating, Source::Review),
                (None, Some(rating)) => (rating, Source::Order),
                (None, None) => return None,
            };
            Some(InteractionRecord {
                user_id,
                item_id,
                rating,
                source,
                quantity,
            })
        })
        .collect();

    debug!(
        orders = orders.len(),
        reviews = reviews.len(),
        skipped,
        fused = records.len(),
        "fused interactions"
    );

    if records.is_empty() {
        return Err(Error::no_interactions());
    }
    Ok(records)
}
