//! JSONL persistence for finalized simulation records.
//!
//! [`JsonlHistory`] appends one JSON object per line, which keeps the file
//! resilient to partial writes and easy to stream back for warm starts.
//! [`PersistenceQueue`] puts a bounded channel and a single blocking writer in
//! front of it, so runs never wait on disk.

use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use excursion_core::domain::SimulationRecord;
use excursion_core::{PersistenceSink, SinkError};

/// Append-only JSONL file of [`SimulationRecord`]s.
#[derive(Debug, Clone)]
pub struct JsonlHistory {
    path: PathBuf,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one record, creating the file and its parent directory if needed.
    pub fn append(&self, record: &SimulationRecord) -> Result<(), SinkError> {
        let json = serde_json::to_string(record)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "{json}")?;
        file.flush()?;
        Ok(())
    }

    /// Read every record in the file. A missing file reads as empty.
    ///
    /// Blank lines are ignored; malformed lines are skipped and counted in a
    /// single warning.
    pub fn read_all(&self) -> io::Result<Vec<SimulationRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.path)?;
        let reader = io::BufReader::new(file);
        let mut records = Vec::new();
        let mut malformed = 0usize;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SimulationRecord>(&line) {
                Ok(record) => records.push(record),
                Err(_) => malformed += 1,
            }
        }

        if malformed > 0 {
            warn!(
                path = %self.path.display(),
                malformed,
                "skipped malformed history lines"
            );
        }
        Ok(records)
    }

    pub fn file_size_bytes(&self) -> io::Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceSink for JsonlHistory {
    async fn persist(&self, record: SimulationRecord) -> Result<(), SinkError> {
        let history = self.clone();
        tokio::task::spawn_blocking(move || history.append(&record))
            .await
            .map_err(|e| SinkError::Io(io::Error::other(e)))?
    }
}

/// Totals reported by the queue's writer when it drains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub written: usize,
    pub failed: usize,
}

/// Bounded, non-blocking front for a [`JsonlHistory`].
///
/// `persist` never waits: a full queue is reported as
/// [`SinkError::QueueFull`] and the record is dropped by the caller.
#[derive(Debug)]
pub struct PersistenceQueue {
    sender: Mutex<Option<mpsc::Sender<SimulationRecord>>>,
    worker: Mutex<Option<JoinHandle<QueueReport>>>,
    capacity: usize,
}

impl PersistenceQueue {
    /// Start the writer. Must be called from within a tokio runtime.
    pub fn spawn(history: JsonlHistory, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, mut receiver) = mpsc::channel::<SimulationRecord>(capacity);

        let worker = tokio::task::spawn_blocking(move || {
            let mut report = QueueReport::default();
            while let Some(record) = receiver.blocking_recv() {
                match history.append(&record) {
                    Ok(()) => {
                        report.written += 1;
                        debug!(run_id = %record.run_id, "record persisted");
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            run_id = %record.run_id,
                            path = %history.path().display(),
                            error = %e,
                            "failed to persist record"
                        );
                    }
                }
            }
            report
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop accepting records and wait for everything queued to be written.
    ///
    /// Calling it again returns an empty report.
    pub async fn close(&self) -> QueueReport {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(worker) = worker else {
            return QueueReport::default();
        };
        match worker.await {
            Ok(report) => {
                info!(
                    written = report.written,
                    failed = report.failed,
                    "persistence queue drained"
                );
                report
            }
            Err(e) => {
                warn!(error = %e, "persistence writer did not finish cleanly");
                QueueReport::default()
            }
        }
    }
}

#[async_trait]
impl PersistenceSink for PersistenceQueue {
    async fn persist(&self, record: SimulationRecord) -> Result<(), SinkError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            return Err(SinkError::Closed);
        };
        sender.try_send(record).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::QueueFull {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use excursion_core::domain::{Direction, RunId, TradeSignal};
    use excursion_core::simulator::SimulationRun;
    use excursion_core::SimulatorConfig;
    use std::sync::Arc;

    fn record(id: &str) -> SimulationRecord {
        let opened = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let (signal, _) = TradeSignal::new("ETHUSDT", Direction::Short, 2_000.0, opened)
            .sanitize()
            .unwrap();
        let config = Arc::new(SimulatorConfig::default());
        let mut run = SimulationRun::new(RunId::new(id), signal.clone(), config);
        let exit = run.force_timeout(opened);
        let result = run.finalize(&exit);
        SimulationRecord::from_parts(&signal, &result)
    }

    #[test]
    fn append_then_read_all() {
        let dir = tempfile::tempdir().unwrap();
        let history = JsonlHistory::new(dir.path().join("nested/runs.jsonl"));

        history.append(&record("a")).unwrap();
        history.append(&record("b")).unwrap();

        let records = history.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].run_id.as_str(), "a");
        assert_eq!(records[1], record("b"));
        assert!(history.file_size_bytes().unwrap() > 0);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = JsonlHistory::new(dir.path().join("absent.jsonl"));
        assert!(history.read_all().unwrap().is_empty());
        assert_eq!(history.file_size_bytes().unwrap(), 0);
    }

    #[test]
    fn malformed_and_blank_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let history = JsonlHistory::new(&path);
        history.append(&record("a")).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{\"run_id\": truncated").unwrap();
        drop(file);
        history.append(&record("b")).unwrap();

        let ids: Vec<_> = history
            .read_all()
            .unwrap()
            .into_iter()
            .map(|r| r.run_id.0)
            .collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn direct_sink_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let history = JsonlHistory::new(dir.path().join("runs.jsonl"));
        history.persist(record("x")).await.unwrap();
        assert_eq!(history.read_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn queue_drains_everything_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let history = JsonlHistory::new(dir.path().join("runs.jsonl"));
        let queue = PersistenceQueue::spawn(history.clone(), 64);

        for i in 0..20 {
            queue.persist(record(&format!("r{i}"))).await.unwrap();
        }
        let report = queue.close().await;

        assert_eq!(report, QueueReport { written: 20, failed: 0 });
        assert_eq!(history.read_all().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn closed_queue_refuses_records() {
        let dir = tempfile::tempdir().unwrap();
        let queue = PersistenceQueue::spawn(JsonlHistory::new(dir.path().join("runs.jsonl")), 4);
        queue.close().await;

        let err = queue.persist(record("late")).await.unwrap_err();
        assert!(matches!(err, SinkError::Closed));
        assert_eq!(queue.close().await, QueueReport::default());
    }

    #[tokio::test]
    async fn write_failures_are_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // The history path is a directory, so every append fails.
        let queue = PersistenceQueue::spawn(JsonlHistory::new(dir.path()), 4);
        queue.persist(record("a")).await.unwrap();
        queue.persist(record("b")).await.unwrap();

        let report = queue.close().await;
        assert_eq!(report, QueueReport { written: 0, failed: 2 });
    }
}
