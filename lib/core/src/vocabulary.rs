use serde::{Deserialize, Serialize};
use ahash::AHashMap;

/// Bidirectional id <-> dense index mapping backing an embedding table.
///
/// Indices are contiguous in `[0, len)`. An id keeps its index forever:
/// growth only appends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<i64>", into = "Vec<i64>")]
pub struct Vocabulary {
    ids: Vec<i64>,
    index: AHashMap<i64, usize>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary ids; indices follow ascending id order.
    pub fn from_ids<I: IntoIterator<Item = i64>>(ids: I) -> Self {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self::from(ids)
    }

    /// Append ids not yet present, in ascending order. Returns how many were added.
    pub fn extend<I: IntoIterator<Item = i64>>(&mut self, ids: I) -> usize {
        let mut fresh: Vec<i64> = ids
            .into_iter()
            .filter(|id| !self.index.contains_key(id))
            .collect();
        fresh.sort_unstable();
        fresh.dedup();

        for id in &fresh {
            self.index.insert(*id, self.ids.len());
            self.ids.push(*id);
        }
        fresh.len()
    }

    #[inline]
    #[must_use]
    pub fn index_of(&self, id: i64) -> Option<usize> {
        self.index.get(&id).copied()
    }

    #[inline]
    #[must_use]
    pub fn id_at(&self, index: usize) -> Option<i64> {
        self.ids.get(index).copied()
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, id: i64) -> bool {
        self.index.contains_key(&id)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in index order
    #[inline]
    #[must_use]
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }
}

impl From<Vec<i64>> for Vocabulary {
    /// Ids are taken in the given order; duplicates keep their first index.
    fn from(raw: Vec<i64>) -> Self {
        let mut vocab = Vocabulary::new();
        for id in raw {
            if !vocab.index.contains_key(&id) {
                vocab.index.insert(id, vocab.ids.len());
                vocab.ids.push(id);
            }
        }
        vocab
    }
}

impl From<Vocabulary> for Vec<i64> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.ids
    }
}
