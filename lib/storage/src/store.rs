use crate::artifact::{ArtifactBatch, ArtifactKind, VersionedArtifact};
use ahash::AHashMap;
use parking_lot::RwLock;
use recx_core::{Error, Result};

/// Persistent home of model artifacts.
///
/// `get` always returns the most recently committed artifact of a kind.
/// `commit` is all-or-nothing: either every artifact of the batch and the new
/// version become visible, or the store is left exactly as it was.
pub trait ArtifactStore: Send + Sync {
    fn get(&self, kind: ArtifactKind) -> Result<Option<VersionedArtifact>>;

    /// Highest committed version; 0 for an empty store.
    fn latest_version(&self) -> Result<u64>;

    fn commit(&self, batch: ArtifactBatch) -> Result<()>;
}

pub(crate) fn check_commit(latest: u64, batch: &ArtifactBatch) -> Result<()> {
    if batch.is_empty() {
        return Err(Error::Persistence("refusing to commit an empty artifact batch".to_string()));
    }
    if batch.version() <= latest {
        return Err(Error::Persistence(format!(
            "version {} is not newer than committed version {}",
            batch.version(),
            latest
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct MemoryInner {
    version: u64,
    artifacts: AHashMap<ArtifactKind, VersionedArtifact>,
}

/// In-process store, mainly for tests and single-shot CLI rebuilds
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn get(&self, kind: ArtifactKind) -> Result<Option<VersionedArtifact>> {
        Ok(self.inner.read().artifacts.get(&kind).cloned())
    }

    fn latest_version(&self) -> Result<u64> {
        Ok(self.inner.read().version)
    }

    fn commit(&self, batch: ArtifactBatch) -> Result<()> {
        let mut inner = self.inner.write();
        check_commit(inner.version, &batch)?;
        inner.version = batch.version();
        for artifact in batch.into_artifacts() {
            inner.artifacts.insert(artifact.kind, artifact);
        }
        Ok(())
    }
}
