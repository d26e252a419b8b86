use crate::interaction::UserId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Which recommendation model a deployment builds and serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Similarity,
    Latent,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Similarity => write!(f, "similarity"),
            ModelKind::Latent => write!(f, "latent"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "similarity" | "cf" => Ok(ModelKind::Similarity),
            "latent" | "embedding" => Ok(ModelKind::Latent),
            other => Err(Error::InvalidConfig(format!("unknown model kind '{}'", other))),
        }
    }
}

/// Synthetic augmentation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    pub seed: u64,
    /// Ids handed to synthetic users. An empty range disables augmentation.
    pub synthetic_user_ids: Range<UserId>,
    pub min_items: usize,
    pub max_items: usize,
    pub rating_std: f32,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            seed: 44,
            synthetic_user_ids: 1_000_000_005..1_000_000_020,
            min_items: 2,
            max_items: 4,
            rating_std: 1.0,
        }
    }
}

impl AugmentConfig {
    /// Configuration that never generates synthetic users.
    pub fn disabled() -> Self {
        Self {
            synthetic_user_ids: 0..0,
            ..Self::default()
        }
    }
}

/// Latent-factor training parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatentConfig {
    pub dim: usize,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    pub patience: usize,
    pub fine_tune_epochs: usize,
    pub fine_tune_learning_rate: f32,
    pub fine_tune_patience: usize,
    pub validation_fraction: f32,
    pub replay_fraction: f32,
    pub replay_cap: usize,
    pub negative_samples: usize,
    /// Std of the noise added around the mean row when a table grows.
    pub new_row_std: f32,
    /// Half-width of the uniform range used for fresh tables.
    pub init_range: f32,
    pub regularization: f32,
}

impl Default for LatentConfig {
    fn default() -> Self {
        Self {
            dim: 32,
            batch_size: 64,
            epochs: 50,
            learning_rate: 0.05,
            patience: 3,
            fine_tune_epochs: 20,
            fine_tune_learning_rate: 0.01,
            fine_tune_patience: 2,
            validation_fraction: 0.1,
            replay_fraction: 0.1,
            replay_cap: 1000,
            negative_samples: 100,
            new_row_std: 0.01,
            init_range: 0.05,
            regularization: 1e-4,
        }
    }
}

/// Defaults applied when a request leaves them out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    pub top_k_neighbors: usize,
    pub top_n: usize,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            top_k_neighbors: 5,
            top_n: 3,
        }
    }
}

/// Configuration of the whole rebuild / serve engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub model: ModelKind,
    pub augment: AugmentConfig,
    pub latent: LatentConfig,
    pub serving: ServingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::Similarity,
            augment: AugmentConfig::default(),
            latent: LatentConfig::default(),
            serving: ServingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let latent = &self.latent;
        if latent.dim == 0 {
            return Err(Error::InvalidConfig("latent.dim must be positive".into()));
        }
        if latent.batch_size == 0 {
            return Err(Error::InvalidConfig("latent.batch_size must be positive".into()));
        }
        for (name, value) in [
            ("latent.validation_fraction", latent.validation_fraction),
            ("latent.replay_fraction", latent.replay_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        if latent.learning_rate <= 0.0 || latent.fine_tune_learning_rate <= 0.0 {
            return Err(Error::InvalidConfig("learning rates must be positive".into()));
        }
        if self.augment.min_items == 0 || self.augment.min_items > self.augment.max_items {
            return Err(Error::InvalidConfig(format!(
                "augment item bounds {}..={} are invalid",
                self.augment.min_items, self.augment.max_items
            )));
        }
        if self.serving.top_n == 0 {
            return Err(Error::InvalidConfig("serving.top_n must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"model": "latent", "latent": {"dim": 8}}"#).unwrap();
        assert_eq!(config.model, ModelKind::Latent);
        assert_eq!(config.latent.dim, 8);
        assert_eq!(config.latent.patience, 3);
        assert_eq!(config.augment.seed, 44);
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        let mut config = EngineConfig::default();
        config.latent.validation_fraction = 1.5;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("Latent".parse::<ModelKind>().unwrap(), ModelKind::Latent);
        assert_eq!("similarity".parse::<ModelKind>().unwrap(), ModelKind::Similarity);
        assert!("forest".parse::<ModelKind>().is_err());
    }
}
