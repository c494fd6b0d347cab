//! Embedding-based retrieval over the card-knowledge store.
//!
//! The retriever either delegates ranking to the store's native
//! nearest-neighbor operator (pgvector, when the server runs against
//! Postgres) or fetches all candidates and ranks in-process by cosine
//! similarity. Either way the ordering contract is the same:
//! descending score, ties broken by ascending document id.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::embedding::SharedEmbedder;
use crate::error::Result;
use crate::models::{KnowledgeDocument, RetrievalHit};

/// Read-only access to the knowledge store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All candidate documents, embeddings included.
    async fn fetch_all(&self) -> Result<Vec<KnowledgeDocument>>;

    /// Native nearest-neighbor ranking, when the store supports it.
    /// `Ok(None)` means "no native operator, rank in-process".
    async fn nearest(&self, _query: &[f32], _k: usize) -> Result<Option<Vec<RetrievalHit>>> {
        Ok(None)
    }
}

pub type SharedDocumentStore = Arc<dyn DocumentStore>;

/// Cosine similarity with a zero-magnitude guard.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

/// Ranks knowledge documents against a query embedding.
pub struct Retriever {
    embedder: SharedEmbedder,
    store: SharedDocumentStore,
}

impl Retriever {
    pub fn new(embedder: SharedEmbedder, store: SharedDocumentStore) -> Self {
        Self { embedder, store }
    }

    /// Top-k documents for `query`, at most `k` hits. An empty store
    /// (or `k == 0`) yields an empty result, not an error.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        if let Some(hits) = self.store.nearest(&query_vec, k).await? {
            debug!(hits = hits.len(), "retrieval via native operator");
            return Ok(hits);
        }

        let documents = self.store.fetch_all().await?;
        let mut hits: Vec<RetrievalHit> = documents
            .into_iter()
            // Documents without an embedding never rank; they are
            // skipped rather than failing the whole call.
            .filter_map(|doc| {
                let embedding = doc.embedding.as_deref()?;
                let score = cosine_similarity(&query_vec, embedding);
                Some(RetrievalHit {
                    document: doc,
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        hits.truncate(k);

        debug!(hits = hits.len(), k, "retrieval via in-process ranking");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, Embedding, EMBEDDING_DIM};
    use crate::store::InMemoryDocumentStore;
    use proptest::prelude::*;

    /// Embedder that returns a fixed basis vector, so document scores
    /// are exactly their first embedding component.
    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            Ok(texts
                .iter()
                .map(|_| {
                    let mut v = vec![0.0; EMBEDDING_DIM];
                    v[0] = 1.0;
                    v
                })
                .collect())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIM
        }
    }

    fn doc(id: i64, first_component: Option<f32>) -> KnowledgeDocument {
        KnowledgeDocument {
            id,
            card: format!("Card {id}"),
            issuer: "Issuer".to_string(),
            url: format!("https://example.com/{id}"),
            text: "perks".to_string(),
            embedding: first_component.map(|c| {
                let mut v = vec![0.0; EMBEDDING_DIM];
                v[0] = c;
                v
            }),
        }
    }

    fn retriever(docs: Vec<KnowledgeDocument>) -> Retriever {
        Retriever::new(
            Arc::new(FixedEmbedder),
            Arc::new(InMemoryDocumentStore::new(docs)),
        )
    }

    #[tokio::test]
    async fn ranks_by_descending_similarity() {
        let r = retriever(vec![
            doc(1, Some(0.2)),
            doc(2, Some(0.9)),
            doc(3, Some(0.5)),
        ]);
        let hits = r.retrieve("query", 3).await.unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.document.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn ties_break_by_ascending_id() {
        let r = retriever(vec![
            doc(7, Some(0.5)),
            doc(3, Some(0.5)),
            doc(5, Some(0.5)),
        ]);
        let hits = r.retrieve("query", 3).await.unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.document.id).collect();
        assert_eq!(ids, vec![3, 5, 7]);
    }

    #[tokio::test]
    async fn documents_without_embeddings_are_skipped() {
        let r = retriever(vec![doc(1, None), doc(2, Some(0.4)), doc(3, None)]);
        let hits = r.retrieve("query", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, 2);
    }

    #[tokio::test]
    async fn empty_store_returns_empty() {
        let r = retriever(vec![]);
        let hits = r.retrieve("query", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn k_zero_returns_empty() {
        let r = retriever(vec![doc(1, Some(0.9))]);
        let hits = r.retrieve("query", 0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_of_identical_unit_vectors_is_one() {
        let v = [0.6f32, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn retrieve_respects_k_and_ordering(
            components in proptest::collection::vec(
                proptest::option::of(-1.0f32..1.0), 0..20),
            k in 0usize..10,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            rt.block_on(async {
                let docs: Vec<KnowledgeDocument> = components
                    .iter()
                    .enumerate()
                    .map(|(i, c)| doc(i as i64, *c))
                    .collect();
                let with_embedding =
                    components.iter().filter(|c| c.is_some()).count();
                let hits = retriever(docs).retrieve("q", k).await.unwrap();

                prop_assert!(hits.len() <= k);
                prop_assert!(hits.len() <= with_embedding);
                for pair in hits.windows(2) {
                    prop_assert!(pair[0].score >= pair[1].score);
                    if pair[0].score == pair[1].score {
                        prop_assert!(pair[0].document.id < pair[1].document.id);
                    }
                }
                Ok(())
            })?;
        }
    }
}
