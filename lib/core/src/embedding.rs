//! Embedding tables and the user/item scoring model.
//!
//! Tables are flat arenas addressed by dense vocabulary index. Growth never
//! mutates a table in place: [`EmbeddingTable::extend`] returns a new table
//! holding a verbatim copy of the old rows followed by the new ones.

use crate::interaction::MAX_RATING;
use crate::vector::{axpy, dot, sigmoid};
use crate::{Error, Result};
use ahash::AHashMap;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Lowest rating a served prediction may show.
pub const MIN_SERVED_RATING: f32 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingTable {
    dim: usize,
    data: Vec<f32>,
}

impl EmbeddingTable {
    /// Fresh table with entries drawn uniformly from `[-range, range)`.
    pub fn random<R: Rng + ?Sized>(rows: usize, dim: usize, range: f32, rng: &mut R) -> Self {
        let data = (0..rows * dim)
            .map(|_| if range > 0.0 { rng.random_range(-range..range) } else { 0.0 })
            .collect();
        Self { dim, data }
    }

    #[inline]
    #[must_use]
    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    #[must_use]
    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    #[inline]
    pub fn row_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.data[index * self.dim..(index + 1) * self.dim]
    }

    /// Element-wise mean of all rows; zeros for an empty table.
    pub fn mean_row(&self) -> Vec<f32> {
        let mut mean = vec![0.0; self.dim];
        let rows = self.rows();
        if rows == 0 {
            return mean;
        }
        for index in 0..rows {
            axpy(&mut mean, 1.0, self.row(index));
        }
        let inv = 1.0 / rows as f32;
        mean.iter_mut().for_each(|x| *x *= inv);
        mean
    }

    /// New table with `new_rows` extra rows.
    ///
    /// Existing rows are copied verbatim into the same indices; each new row
    /// is the mean of the existing rows plus N(0, `std`) noise.
    pub fn extend<R: Rng + ?Sized>(&self, new_rows: usize, std: f32, rng: &mut R) -> Result<Self> {
        let mut data = Vec::with_capacity(self.data.len() + new_rows * self.dim);
        data.extend_from_slice(&self.data);

        if new_rows > 0 {
            let mean = self.mean_row();
            let noise = Normal::new(0.0f32, std)
                .map_err(|e| Error::InvalidConfig(format!("new_row_std: {}", e)))?;
            for _ in 0..new_rows {
                data.extend(mean.iter().map(|m| m + noise.sample(rng)));
            }
        }

        Ok(Self { dim: self.dim, data })
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }
}

/// Per-row gradient accumulator for one mini-batch
#[derive(Debug, Default)]
pub struct Gradients {
    users: AHashMap<usize, Vec<f32>>,
    items: AHashMap<usize, Vec<f32>>,
    bias: f32,
}

impl Gradients {
    pub fn clear(&mut self) {
        self.users.clear();
        self.items.clear();
        self.bias = 0.0;
    }
}

/// User and item embeddings combined by `sigmoid(u · v + bias)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    users: EmbeddingTable,
    items: EmbeddingTable,
    bias: f32,
}

impl EmbeddingModel {
    pub fn new(users: EmbeddingTable, items: EmbeddingTable, bias: f32) -> Result<Self> {
        if users.dim() != items.dim() {
            return Err(Error::InvalidConfig(format!(
                "user dim {} != item dim {}",
                users.dim(),
                items.dim()
            )));
        }
        Ok(Self { users, items, bias })
    }

    pub fn random<R: Rng + ?Sized>(num_users: usize, num_items: usize, dim: usize, range: f32, rng: &mut R) -> Self {
        Self {
            users: EmbeddingTable::random(num_users, dim, range, rng),
            items: EmbeddingTable::random(num_items, dim, range, rng),
            bias: 0.0,
        }
    }

    #[inline]
    #[must_use]
    pub fn users(&self) -> &EmbeddingTable {
        &self.users
    }

    #[inline]
    #[must_use]
    pub fn items(&self) -> &EmbeddingTable {
        &self.items
    }

    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.users.dim()
    }

    /// Predicted rating in [0, 1].
    #[inline]
    #[must_use]
    pub fn forward(&self, user: usize, item: usize) -> f32 {
        sigmoid(dot(self.users.row(user), self.items.row(item)) + self.bias)
    }

    /// Model sized for `new_users` / `new_items` extra vocabulary entries.
    pub fn extend<R: Rng + ?Sized>(&self, new_users: usize, new_items: usize, std: f32, rng: &mut R) -> Result<Self> {
        Ok(Self {
            users: self.users.extend(new_users, std, rng)?,
            items: self.items.extend(new_items, std, rng)?,
            bias: self.bias,
        })
    }

    /// Squared error of one example, accumulating its gradient into `grads`.
    pub fn accumulate(&self, user: usize, item: usize, target: f32, regularization: f32, grads: &mut Gradients) -> f32 {
        let u = self.users.row(user);
        let v = self.items.row(item);
        let p = sigmoid(dot(u, v) + self.bias);
        let err = p - target;
        let g = 2.0 * err * p * (1.0 - p);

        let du = grads.users.entry(user).or_insert_with(|| vec![0.0; u.len()]);
        axpy(du, g, v);
        axpy(du, regularization, u);

        let dv = grads.items.entry(item).or_insert_with(|| vec![0.0; v.len()]);
        axpy(dv, g, u);
        axpy(dv, regularization, v);

        grads.bias += g;
        err * err
    }

    /// Gradient-descent step with the accumulated gradients.
    pub fn apply(&mut self, grads: &Gradients, learning_rate: f32) {
        for (&index, grad) in &grads.users {
            axpy(self.users.row_mut(index), -learning_rate, grad);
        }
        for (&index, grad) in &grads.items {
            axpy(self.items.row_mut(index), -learning_rate, grad);
        }
        self.bias -= learning_rate * grads.bias;
    }

    /// Mean squared error over `(user, item, target)` triples without updating.
    pub fn loss(&self, examples: &[(usize, usize, f32)]) -> f32 {
        if examples.is_empty() {
            return 0.0;
        }
        let total: f32 = examples
            .iter()
            .map(|&(u, i, t)| {
                let err = self.forward(u, i) - t;
                err * err
            })
            .sum();
        total / examples.len() as f32
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.bias.is_finite() && self.users.is_finite() && self.items.is_finite()
    }
}

/// Map a normalized prediction back to the served rating scale.
#[inline]
#[must_use]
pub fn denormalize(prediction: f32) -> f32 {
    (prediction * MAX_RATING).clamp(MIN_SERVED_RATING, MAX_RATING)
}
