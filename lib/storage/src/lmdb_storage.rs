// LMDB-backed artifact store
use crate::artifact::{ArtifactBatch, ArtifactKind, VersionedArtifact};
use crate::store::{check_commit, ArtifactStore};
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use recx_core::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const DB_ARTIFACTS: &str = "artifacts";
const DB_META: &str = "meta";
const KEY_VERSION: &str = "version";

/// Artifacts keyed by kind name, plus a version record in the same environment
pub struct LmdbArtifactStore {
    env: Arc<Env>,
    artifacts_db: Database<heed::types::Str, heed::types::Bytes>,
    meta_db: Database<heed::types::Str, heed::types::U64<heed::byteorder::BE>>,
}

impl LmdbArtifactStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_env(path.as_ref()).map_err(|e| Error::Persistence(format!("open lmdb: {:#}", e)))
    }

    fn open_env(path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(path)?;

        let env = Arc::new(unsafe {
            EnvOpenOptions::new()
                .map_size(10 * 1024 * 1024 * 1024) // 10GB
                .max_dbs(4)
                .open(path)?
        });

        let mut wtxn = env.write_txn()?;
        let artifacts_db = env.create_database(&mut wtxn, Some(DB_ARTIFACTS))?;
        let meta_db = env.create_database(&mut wtxn, Some(DB_META))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            artifacts_db,
            meta_db,
        })
    }

    fn read_version(&self, rtxn: &RoTxn) -> anyhow::Result<u64> {
        Ok(self.meta_db.get(rtxn, KEY_VERSION)?.unwrap_or(0))
    }

    fn try_get(&self, kind: ArtifactKind) -> anyhow::Result<Option<VersionedArtifact>> {
        let rtxn = self.env.read_txn()?;
        match self.artifacts_db.get(&rtxn, kind.as_str())? {
            Some(bytes) => Ok(Some(VersionedArtifact::from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    fn try_commit(&self, batch: ArtifactBatch) -> Result<()> {
        let persist = |e: heed::Error| Error::Persistence(format!("lmdb: {}", e));

        // One write transaction covers every artifact and the version record.
        let mut wtxn = self.env.write_txn().map_err(persist)?;
        let latest = self.meta_db.get(&wtxn, KEY_VERSION).map_err(persist)?.unwrap_or(0);
        check_commit(latest, &batch)?;

        let version = batch.version();
        for artifact in batch.into_artifacts() {
            let bytes = artifact
                .to_bytes()
                .map_err(|e| Error::Serialization(format!("{}: {:#}", artifact.kind, e)))?;
            self.artifacts_db
                .put(&mut wtxn, artifact.kind.as_str(), &bytes)
                .map_err(persist)?;
            debug!(kind = %artifact.kind, version, size = bytes.len(), "artifact staged");
        }
        self.meta_db.put(&mut wtxn, KEY_VERSION, &version).map_err(persist)?;
        wtxn.commit().map_err(persist)?;
        Ok(())
    }
}

impl ArtifactStore for LmdbArtifactStore {
    fn get(&self, kind: ArtifactKind) -> Result<Option<VersionedArtifact>> {
        self.try_get(kind)
            .map_err(|e| Error::Persistence(format!("read {}: {:#}", kind, e)))
    }

    fn latest_version(&self) -> Result<u64> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| Error::Persistence(e.to_string()))?;
        self.read_version(&rtxn)
            .map_err(|e| Error::Persistence(format!("read version: {:#}", e)))
    }

    fn commit(&self, batch: ArtifactBatch) -> Result<()> {
        self.try_commit(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recx_core::Vocabulary;
    use tempfile::TempDir;

    fn vocab_batch(version: u64, ids: &[i64]) -> ArtifactBatch {
        let mut batch = ArtifactBatch::new(version);
        batch
            .put(ArtifactKind::UserVocabulary, &Vocabulary::from_ids(ids.iter().copied()))
            .unwrap();
        batch
            .put(ArtifactKind::ItemVocabulary, &Vocabulary::from_ids([100, 200]))
            .unwrap();
        batch
    }

    #[test]
    fn test_commit_and_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = LmdbArtifactStore::new(dir.path()).unwrap();
            assert_eq!(store.latest_version().unwrap(), 0);
            store.commit(vocab_batch(1, &[1, 2])).unwrap();
            store.commit(vocab_batch(2, &[1, 2, 3])).unwrap();
        }

        let store = LmdbArtifactStore::new(dir.path()).unwrap();
        assert_eq!(store.latest_version().unwrap(), 2);
        let artifact = store.get(ArtifactKind::UserVocabulary).unwrap().unwrap();
        assert_eq!(artifact.version, 2);
        let vocab: Vocabulary = artifact.open().unwrap();
        assert_eq!(vocab.len(), 3);
        assert!(store.get(ArtifactKind::EmbeddingState).unwrap().is_none());
    }

    #[test]
    fn test_rejected_commit_leaves_store_untouched() {
        let dir = TempDir::new().unwrap();
        let store = LmdbArtifactStore::new(dir.path()).unwrap();
        store.commit(vocab_batch(5, &[1])).unwrap();

        assert!(matches!(store.commit(vocab_batch(5, &[1, 2, 3])), Err(Error::Persistence(_))));
        assert_eq!(store.latest_version().unwrap(), 5);
        let vocab: Vocabulary = store
            .get(ArtifactKind::UserVocabulary)
            .unwrap()
            .unwrap()
            .open()
            .unwrap();
        assert_eq!(vocab.len(), 1);
    }
}
