use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type UserId = i64;
pub type ItemId = i64;

/// Upper bound of the rating scale.
pub const MAX_RATING: f32 = 5.0;

/// Where a fused rating came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Order,
    Review,
    Synthetic,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Order => write!(f, "order"),
            Source::Review => write!(f, "review"),
            Source::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// One rating per (user, item) after fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub rating: f32,
    pub source: Source,
    pub quantity: Option<u32>,
}

impl InteractionRecord {
    #[inline]
    #[must_use]
    pub fn new(user_id: UserId, item_id: ItemId, rating: f32, source: Source) -> Self {
        Self {
            user_id,
            item_id,
            rating,
            source,
            quantity: None,
        }
    }

    #[must_use]
    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> (UserId, ItemId) {
        (self.user_id, self.item_id)
    }

    /// Rating scaled to [0, 1], the target space of the latent-factor model.
    #[inline]
    #[must_use]
    pub fn normalized_rating(&self) -> f32 {
        (self.rating / MAX_RATING).clamp(0.0, 1.0)
    }
}

/// A line item of an upstream order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLineItem {
    #[serde(default)]
    pub product_id: Option<ItemId>,
    #[serde(default)]
    pub variant_id: Option<i64>,
    #[serde(default)]
    pub quantity: Option<i64>,
}

/// An upstream order with nested line items
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub customer_id: Option<UserId>,
    #[serde(default)]
    pub items: Vec<RawLineItem>,
}

/// An upstream product review
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReview {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub order_id: Option<i64>,
    #[serde(default)]
    pub product_id: Option<ItemId>,
    #[serde(default)]
    pub customer_id: Option<UserId>,
    #[serde(default)]
    pub rating: Option<f64>,
}

/// Raw input of one rebuild
#[derive(Debug, Clone, Default)]
pub struct InteractionBatch {
    pub orders: Vec<RawOrder>,
    pub reviews: Vec<RawReview>,
}

impl InteractionBatch {
    pub fn new(orders: Vec<RawOrder>, reviews: Vec<RawReview>) -> Self {
        Self { orders, reviews }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.reviews.is_empty()
    }
}

/// Optional date window passed to the upstream fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// Query parameters in the upstream's `startDate` / `endDate` format.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(start) = self.start {
            params.push(("startDate", start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = self.end {
            params.push(("endDate", end.format("%Y-%m-%d").to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_wire_format() {
        let raw = r#"{"id": 7, "customerId": 3, "totalAmount": 10.5,
            "items": [{"productId": 10, "quantity": 2, "variantName": "red"}]}"#;
        let order: RawOrder = serde_json::from_str(raw).unwrap();
        assert_eq!(order.customer_id, Some(3));
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].product_id, Some(10));
        assert_eq!(order.items[0].quantity, Some(2));
    }

    #[test]
    fn test_review_missing_fields() {
        let review: RawReview = serde_json::from_str(r#"{"id": 1, "productId": 4}"#).unwrap();
        assert_eq!(review.customer_id, None);
        assert_eq!(review.rating, None);
    }

    #[test]
    fn test_date_range_params() {
        let range = DateRange::new(NaiveDate::from_ymd_opt(2025, 11, 1), None);
        assert_eq!(range.query_params(), vec![("startDate", "2025-11-01".to_string())]);
        assert!(DateRange::default().query_params().is_empty());
    }

    #[test]
    fn test_normalized_rating() {
        let record = InteractionRecord::new(1, 2, 4.0, Source::Review);
        assert!((record.normalized_rating() - 0.8).abs() < 1e-6);
    }
}
