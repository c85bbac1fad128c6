//! Memory port: tagged key/value persistence for cycle results.
//!
//! The coordinator writes each phase result under `(cycle_id, phase, key)`
//! and the team persists its communication history the same way. The
//! store is append-mostly: a later `put` for the same key shadows the
//! earlier one, which stays in the log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::edrr::Phase;

/// Well-known keys written by the orchestrator.
pub mod keys {
    pub const TASK: &str = "task";
    pub const PHASE_RESULT: &str = "phase_result";
    pub const COMMUNICATION_HISTORY: &str = "communication_history";
    pub const CYCLE_SUMMARY: &str = "cycle_summary";
}

/// Error type for memory operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum MemoryError {
    #[error("Memory backend unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected for {key}: {reason}")]
    WriteRejected { key: String, reason: String },

    #[error("Stored value could not be decoded: {0}")]
    Decode(String),
}

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Persistence interface used by the orchestrator.
#[async_trait]
pub trait MemoryPort: Send + Sync {
    /// Store `value` under `(cycle_id, phase, key)`.
    async fn put(&self, cycle_id: &str, phase: Phase, key: &str, value: Value)
        -> MemoryResult<()>;

    /// Fetch the latest value stored under `(cycle_id, phase, key)`.
    async fn get(&self, cycle_id: &str, phase: Phase, key: &str) -> MemoryResult<Option<Value>>;
}

/// One write recorded by the in-memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Monotonic sequence number.
    pub seq: u64,
    pub cycle_id: String,
    pub phase: Phase,
    pub key: String,
    pub value: Value,
    pub stored_at: DateTime<Utc>,
}

/// In-memory [`MemoryPort`] keeping the full write log.
pub struct InMemoryStore {
    records: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Every write in arrival order.
    pub async fn records(&self) -> Vec<MemoryRecord> {
        self.records.read().await.clone()
    }

    /// Writes for one cycle in arrival order.
    pub async fn records_for(&self, cycle_id: &str) -> Vec<MemoryRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.cycle_id == cycle_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryPort for InMemoryStore {
    async fn put(
        &self,
        cycle_id: &str,
        phase: Phase,
        key: &str,
        value: Value,
    ) -> MemoryResult<()> {
        let mut records = self.records.write().await;
        let seq = records.len() as u64;
        records.push(MemoryRecord {
            seq,
            cycle_id: cycle_id.to_string(),
            phase,
            key: key.to_string(),
            value,
            stored_at: Utc::now(),
        });
        Ok(())
    }

    async fn get(&self, cycle_id: &str, phase: Phase, key: &str) -> MemoryResult<Option<Value>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.cycle_id == cycle_id && r.phase == phase && r.key == key)
            .map(|r| r.value.clone()))
    }
}
