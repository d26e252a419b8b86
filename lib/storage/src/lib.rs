pub mod artifact;
pub mod lmdb_storage;
pub mod manager;
pub mod store;

pub use artifact::{ArtifactBatch, ArtifactKind, VersionedArtifact};
pub use lmdb_storage::LmdbArtifactStore;
pub use manager::{Health, ModelManager, ModelSnapshot, RebuildReport};
pub use store::{ArtifactStore, MemoryArtifactStore};
