//! Persistence sink for finalized simulation records.

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use crate::domain::SimulationRecord;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("persistence queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("persistence queue closed")]
    Closed,
}

/// Durable store for finalized runs. Writes are best-effort: the simulator
/// logs and swallows any error returned here.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn persist(&self, record: SimulationRecord) -> Result<(), SinkError>;
}

/// Sink that discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl PersistenceSink for NullSink {
    async fn persist(&self, _record: SimulationRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<SimulationRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SimulationRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn persist(&self, record: SimulationRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}
