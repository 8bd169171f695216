use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use super::chunker::KnowledgeChunk;
use super::embedding::cosine_similarity;
use super::Metadata;

/// An indexed chunk with its vector.
#[derive(Debug)]
struct IndexEntry {
    chunk: KnowledgeChunk,
    vector: Vec<f32>,
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: KnowledgeChunk,
    pub score: f32,
}

/// In-memory cosine-similarity index.
///
/// Readers clone an `Arc` snapshot and rank without holding the lock, so a
/// concurrent delete or clear never stalls a search. Writers replace the
/// snapshot under an exclusive lock, which serializes them.
#[derive(Debug, Default)]
pub struct VectorIndex {
    entries: RwLock<Arc<Vec<Arc<IndexEntry>>>>,
}

impl VectorIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<Vec<Arc<IndexEntry>>> {
        match self.entries.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut Vec<Arc<IndexEntry>>) -> R) -> R {
        let mut guard = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = guard.as_ref().clone();
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    /// Append chunks with their vectors, preserving order.
    pub fn insert(&self, items: Vec<(KnowledgeChunk, Vec<f32>)>) {
        if items.is_empty() {
            return;
        }
        self.update(|entries| {
            entries.extend(
                items
                    .into_iter()
                    .map(|(chunk, vector)| Arc::new(IndexEntry { chunk, vector })),
            );
        });
    }

    /// Rank entries against `query`. Ties keep insertion order.
    pub fn search(&self, query: &[f32], top_k: usize, filter: Option<&Metadata>) -> Vec<SearchHit> {
        let snapshot = self.snapshot();
        if snapshot.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = snapshot
            .iter()
            .enumerate()
            .filter(|(_, entry)| filter.map_or(true, |f| matches_filter(&entry.chunk.metadata, f)))
            .map(|(position, entry)| (position, cosine_similarity(query, &entry.vector)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(position, score)| SearchHit {
                chunk: snapshot[position].chunk.clone(),
                score,
            })
            .collect()
    }

    /// Remove chunks by id; returns how many were removed.
    pub fn delete(&self, ids: &[String]) -> usize {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.update(|entries| {
            let before = entries.len();
            entries.retain(|e| !ids.contains(e.chunk.id.as_str()));
            before - entries.len()
        })
    }

    /// Remove every chunk.
    pub fn clear(&self) {
        self.update(|entries| entries.clear());
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether the index holds no chunks
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

/// Every filter key must be present with an equal value.
fn matches_filter(metadata: &Metadata, filter: &Metadata) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str, kind: &str) -> KnowledgeChunk {
        let mut metadata = Metadata::new();
        metadata.insert("kind".to_string(), kind.into());
        KnowledgeChunk::new(content).with_metadata(metadata)
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = VectorIndex::new();
        assert!(index.search(&[1.0, 0.0], 5, None).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_search_ranks_by_similarity() {
        let index = VectorIndex::new();
        index.insert(vec![
            (chunk("x-axis", "a"), vec![1.0, 0.0]),
            (chunk("y-axis", "a"), vec![0.0, 1.0]),
            (chunk("diagonal", "b"), vec![0.7, 0.7]),
        ]);

        let hits = index.search(&[1.0, 0.1], 2, None);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.content, "x-axis");
        assert_eq!(hits[1].chunk.content, "diagonal");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = VectorIndex::new();
        index.insert(vec![
            (chunk("first", "a"), vec![1.0, 0.0]),
            (chunk("second", "a"), vec![1.0, 0.0]),
        ]);
        let hits = index.search(&[1.0, 0.0], 2, None);
        assert_eq!(hits[0].chunk.content, "first");
        assert_eq!(hits[1].chunk.content, "second");
    }

    #[test]
    fn test_filter_and_delete() {
        let index = VectorIndex::new();
        let keep = chunk("keep", "a");
        let drop = chunk("drop", "b");
        let drop_id = drop.id.clone();
        index.insert(vec![(keep, vec![1.0]), (drop, vec![1.0])]);

        let mut filter = Metadata::new();
        filter.insert("kind".to_string(), "b".into());
        let hits = index.search(&[1.0], 5, Some(&filter));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.content, "drop");

        assert_eq!(index.delete(&[drop_id]), 1);
        assert_eq!(index.len(), 1);
        assert!(index.search(&[1.0], 5, Some(&filter)).is_empty());

        index.clear();
        assert!(index.is_empty());
    }

    #[test]
    fn test_snapshot_survives_clear() {
        let index = VectorIndex::new();
        index.insert(vec![(chunk("held", "a"), vec![1.0])]);
        let snapshot = index.snapshot();
        index.clear();
        assert_eq!(snapshot.len(), 1);
        assert!(index.is_empty());
    }
}
