// Versioned model artifacts and their on-disk encoding
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use recx_core::{Error, ModelKind, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    RatingMatrix,
    SimilarityMatrix,
    UserVocabulary,
    ItemVocabulary,
    EmbeddingState,
    InteractionHistory,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 6] = [
        ArtifactKind::RatingMatrix,
        ArtifactKind::SimilarityMatrix,
        ArtifactKind::UserVocabulary,
        ArtifactKind::ItemVocabulary,
        ArtifactKind::EmbeddingState,
        ArtifactKind::InteractionHistory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::RatingMatrix => "rating_matrix",
            ArtifactKind::SimilarityMatrix => "similarity_matrix",
            ArtifactKind::UserVocabulary => "user_vocabulary",
            ArtifactKind::ItemVocabulary => "item_vocabulary",
            ArtifactKind::EmbeddingState => "embedding_state",
            ArtifactKind::InteractionHistory => "interaction_history",
        }
    }

    /// Kinds written together by one build of `model`.
    pub fn for_model(model: ModelKind) -> &'static [ArtifactKind] {
        match model {
            ModelKind::Similarity => &[ArtifactKind::RatingMatrix, ArtifactKind::SimilarityMatrix],
            ModelKind::Latent => &[
                ArtifactKind::UserVocabulary,
                ArtifactKind::ItemVocabulary,
                ArtifactKind::EmbeddingState,
                ArtifactKind::InteractionHistory,
            ],
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sealed artifact: compressed payload plus integrity metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedArtifact {
    pub kind: ArtifactKind,
    pub version: u64,
    pub payload: Vec<u8>,
    pub checksum: String,
    pub updated_at: DateTime<Utc>,
}

impl VersionedArtifact {
    /// Encode `value` (bincode, then gzip) and checksum the result.
    pub fn seal<T: Serialize>(kind: ArtifactKind, version: u64, value: &T) -> Result<Self> {
        let payload = encode(value).map_err(|e| Error::Serialization(format!("{}: {:#}", kind, e)))?;
        Ok(Self {
            kind,
            version,
            checksum: checksum(&payload),
            payload,
            updated_at: Utc::now(),
        })
    }

    pub fn verify(&self) -> Result<()> {
        let actual = checksum(&self.payload);
        if actual != self.checksum {
            return Err(Error::Persistence(format!(
                "{} v{}: checksum mismatch (expected {}, found {})",
                self.kind, self.version, self.checksum, actual
            )));
        }
        Ok(())
    }

    /// Verify the checksum and decode the payload.
    pub fn open<T: DeserializeOwned>(&self) -> Result<T> {
        self.verify()?;
        decode(&self.payload).map_err(|e| Error::Persistence(format!("{} v{}: {:#}", self.kind, self.version, e)))
    }

    pub(crate) fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        bincode::deserialize(bytes).context("corrupt artifact envelope")
    }
}

/// Artifacts of one build, all sharing the same version
#[derive(Debug, Clone)]
pub struct ArtifactBatch {
    version: u64,
    artifacts: Vec<VersionedArtifact>,
}

impl ArtifactBatch {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            artifacts: Vec::new(),
        }
    }

    pub fn put<T: Serialize>(&mut self, kind: ArtifactKind, value: &T) -> Result<&mut Self> {
        self.artifacts.retain(|a| a.kind != kind);
        self.artifacts.push(VersionedArtifact::seal(kind, self.version, value)?);
        Ok(self)
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn kinds(&self) -> Vec<ArtifactKind> {
        self.artifacts.iter().map(|a| a.kind).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn into_artifacts(self) -> Vec<VersionedArtifact> {
        self.artifacts
    }
}

fn encode<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    let raw = bincode::serialize(value)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
    encoder.write_all(&raw)?;
    Ok(encoder.finish()?)
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> anyhow::Result<T> {
    let mut raw = Vec::new();
    GzDecoder::new(payload)
        .read_to_end(&mut raw)
        .map_err(|e| anyhow!("gzip: {}", e))?;
    bincode::deserialize(&raw).context("bincode")
}

fn checksum(payload: &[u8]) -> String {
    format!("{:x}", Sha256::digest(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recx_core::{InteractionRecord, Source, Vocabulary};

    #[test]
    fn test_seal_and_open() {
        let vocab = Vocabulary::from_ids([3, 1, 2]);
        let artifact = VersionedArtifact::seal(ArtifactKind::UserVocabulary, 7, &vocab).unwrap();
        assert_eq!(artifact.version, 7);
        assert_eq!(artifact.checksum.len(), 64);
        let restored: Vocabulary = artifact.open().unwrap();
        assert_eq!(restored.ids(), vocab.ids());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let history = vec![InteractionRecord::new(1, 2, 4.0, Source::Review)];
        let mut artifact = VersionedArtifact::seal(ArtifactKind::InteractionHistory, 1, &history).unwrap();
        let last = artifact.payload.len() - 1;
        artifact.payload[last] ^= 0xff;
        assert!(matches!(artifact.open::<Vec<InteractionRecord>>(), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_envelope_bytes() {
        let artifact = VersionedArtifact::seal(ArtifactKind::RatingMatrix, 2, &vec![1.0f32, 2.0]).unwrap();
        let bytes = artifact.to_bytes().unwrap();
        assert_eq!(VersionedArtifact::from_bytes(&bytes).unwrap(), artifact);
        assert!(VersionedArtifact::from_bytes(&bytes[..3]).is_err());
    }

    #[test]
    fn test_batch_replaces_same_kind() {
        let mut batch = ArtifactBatch::new(4);
        batch.put(ArtifactKind::UserVocabulary, &vec![1i64]).unwrap();
        batch.put(ArtifactKind::UserVocabulary, &vec![1i64, 2]).unwrap();
        batch.put(ArtifactKind::ItemVocabulary, &vec![9i64]).unwrap();
        assert_eq!(batch.kinds(), vec![ArtifactKind::UserVocabulary, ArtifactKind::ItemVocabulary]);
        assert!(batch.into_artifacts().iter().all(|a| a.version == 4));
    }

    #[test]
    fn test_kinds_per_model() {
        assert_eq!(ArtifactKind::for_model(ModelKind::Similarity).len(), 2);
        assert_eq!(ArtifactKind::for_model(ModelKind::Latent).len(), 4);
        assert_eq!(ArtifactKind::EmbeddingState.to_string(), "embedding_state");
    }
}
