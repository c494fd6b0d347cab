//! Persistence collaborators: the knowledge store and the plan store.
//!
//! Postgres-backed implementations live behind the `database` feature
//! (pgvector column for document embeddings, JSONB payload for plan
//! records). In-memory implementations back SIM mode and tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{KnowledgeDocument, PersistedPlanRecord};
use crate::retrieval::DocumentStore;

/// Write access to the plan audit trail.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Persist one finalized record. Written once, never mutated.
    async fn save(&self, record: &PersistedPlanRecord) -> Result<()>;
}

pub type SharedPlanStore = Arc<dyn PlanStore>;

/// Fixed document set held in memory. Used by SIM mode and tests.
pub struct InMemoryDocumentStore {
    documents: Vec<KnowledgeDocument>,
}

impl InMemoryDocumentStore {
    pub fn new(documents: Vec<KnowledgeDocument>) -> Self {
        Self { documents }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn fetch_all(&self) -> Result<Vec<KnowledgeDocument>> {
        Ok(self.documents.clone())
    }
}

/// Plan store that appends to a vector. Used by SIM mode and tests.
#[derive(Default)]
pub struct InMemoryPlanStore {
    records: Mutex<Vec<PersistedPlanRecord>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything saved so far.
    pub fn saved(&self) -> Vec<PersistedPlanRecord> {
        self.records.lock().expect("plan store lock poisoned").clone()
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn save(&self, record: &PersistedPlanRecord) -> Result<()> {
        self.records
            .lock()
            .expect("plan store lock poisoned")
            .push(record.clone());
        Ok(())
    }
}

#[cfg(feature = "database")]
pub use postgres::{PgDocumentStore, PgPlanStore};

#[cfg(feature = "database")]
mod postgres {
    use super::*;
    use crate::error::OrchestratorError;
    use crate::models::RetrievalHit;
    use pgvector::Vector;
    use sqlx::{PgPool, Row};

    /// Knowledge store backed by Postgres with a pgvector column.
    pub struct PgDocumentStore {
        pool: PgPool,
    }

    impl PgDocumentStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    fn document_from_row(row: &sqlx::postgres::PgRow) -> std::result::Result<KnowledgeDocument, sqlx::Error> {
        let embedding: Option<Vector> = row.try_get("embedding")?;
        Ok(KnowledgeDocument {
            id: row.try_get("id")?,
            card: row.try_get("card")?,
            issuer: row.try_get("issuer")?,
            url: row.try_get("url")?,
            text: row.try_get("text")?,
            embedding: embedding.map(|v| v.to_vec()),
        })
    }

    #[async_trait]
    impl DocumentStore for PgDocumentStore {
        async fn fetch_all(&self) -> Result<Vec<KnowledgeDocument>> {
            let rows = sqlx::query("SELECT id, card, issuer, url, text, embedding FROM documents")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| OrchestratorError::UpstreamUnavailable {
                    service: "knowledge-store",
                    reason: e.to_string(),
                })?;

            rows.iter()
                .map(|row| {
                    document_from_row(row).map_err(|e| OrchestratorError::UpstreamUnavailable {
                        service: "knowledge-store",
                        reason: e.to_string(),
                    })
                })
                .collect()
        }

        /// Native ranking via the pgvector cosine-distance operator.
        /// Score is `1 - distance`, the same scale as the in-process
        /// cosine path; ties break on ascending id.
        async fn nearest(&self, query: &[f32], k: usize) -> Result<Option<Vec<RetrievalHit>>> {
            let query_vec = Vector::from(query.to_vec());
            let rows = sqlx::query(
                "SELECT id, card, issuer, url, text, embedding, \
                        1 - (embedding <=> $1) AS score \
                 FROM documents \
                 WHERE embedding IS NOT NULL \
                 ORDER BY embedding <=> $1, id \
                 LIMIT $2",
            )
            .bind(&query_vec)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OrchestratorError::UpstreamUnavailable {
                service: "knowledge-store",
                reason: e.to_string(),
            })?;

            let hits = rows
                .iter()
                .map(|row| {
                    let document = document_from_row(row)?;
                    let score: f64 = row.try_get("score")?;
                    Ok(RetrievalHit { document, score })
                })
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                .map_err(|e| OrchestratorError::UpstreamUnavailable {
                    service: "knowledge-store",
                    reason: e.to_string(),
                })?;

            Ok(Some(hits))
        }
    }

    /// Plan audit trail in Postgres, full record as JSONB.
    pub struct PgPlanStore {
        pool: PgPool,
    }

    impl PgPlanStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl PlanStore for PgPlanStore {
        async fn save(&self, record: &PersistedPlanRecord) -> Result<()> {
            let payload = serde_json::to_value(record)
                .map_err(|e| OrchestratorError::Persistence(e.to_string()))?;

            sqlx::query(
                "INSERT INTO plans (id, payload, created_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(record.id)
            .bind(payload)
            .bind(record.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| OrchestratorError::Persistence(e.to_string()))?;

            Ok(())
        }
    }
}
