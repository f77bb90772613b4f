//! # Offline Queue
//!
//! SQLite-backed FIFO of readings that could not be delivered directly.
//!
//! This module handles:
//! - Insert-if-absent on the `(deviceId, ts_min)` key
//! - A hard row cap, evicting the oldest entries first
//! - Oldest-first replay ordered by `(ts_min, id)`
//! - Best-effort flushing that stops at the first failed send
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE queue (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     deviceId TEXT NOT NULL,
//!     ts_min INTEGER NOT NULL,
//!     payload_json TEXT NOT NULL,
//!     created_at INTEGER NOT NULL
//! );
//! CREATE UNIQUE INDEX idx_queue_unique ON queue(deviceId, ts_min);
//! CREATE INDEX idx_queue_order ON queue(ts_min, id);
//! ```
//!
//! The queue has one owner: the publish loop both writes and replays it.
//! Entries leave either by acknowledged delivery or by cap eviction, and
//! never come back.

use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::reading::Reading;
use crate::sender::{is_success, Transport};

/// A live queue row
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Local monotonic identifier
    pub id: i64,
    pub reading: Reading,
    /// Enqueue time, seconds since epoch
    pub created_at: i64,
}

/// Durable, bounded, deduplicating FIFO of readings
pub struct OfflineQueue {
    conn: Connection,
    max_rows: usize,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("path", &self.conn.path())
            .field("max_rows", &self.max_rows)
            .finish_non_exhaustive()
    }
}

impl OfflineQueue {
    /// Open (or create) the queue database at `path`
    ///
    /// Missing parent directories are created. Opening the same file again
    /// after a close picks up the entries left behind.
    ///
    /// # Errors
    ///
    /// Returns error if the directory or database cannot be created
    pub fn open<P: AsRef<Path>>(path: P, max_rows: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let queue = Self { conn, max_rows };
        queue.init_schema()?;

        debug!("Opened offline queue at {} (max_rows={})", path.display(), max_rows);
        Ok(queue)
    }

    /// In-memory queue (for testing)
    pub fn in_memory(max_rows: usize) -> Result<Self> {
        let queue = Self {
            conn: Connection::open_in_memory()?,
            max_rows,
        };
        queue.init_schema()?;
        Ok(queue)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                deviceId TEXT NOT NULL,
                ts_min INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_unique ON queue(deviceId, ts_min);
            CREATE INDEX IF NOT EXISTS idx_queue_order ON queue(ts_min, id);",
        )?;
        Ok(())
    }

    /// Configured row cap
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Insert `reading` unless its `(deviceId, ts_min)` is already queued,
    /// then evict down to the row cap.
    ///
    /// Returns `true` when a new row was inserted. A duplicate leaves the
    /// first stored payload untouched.
    pub fn enqueue(&self, reading: &Reading) -> Result<bool> {
        let payload_json = serde_json::to_string(reading)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO queue (deviceId, ts_min, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                reading.device_id,
                reading.ts_min,
                payload_json,
                Utc::now().timestamp()
            ],
        )?;

        self.prune_to_row_cap(self.max_rows)?;
        Ok(inserted > 0)
    }

    /// Up to `limit` oldest entries, ordered by `(ts_min, id)`. Nothing is removed.
    pub fn dequeue_batch(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, payload_json, created_at FROM queue
             ORDER BY ts_min ASC, id ASC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map([clamp_limit(limit)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, payload_json, created_at)| -> Result<QueueEntry> {
                Ok(QueueEntry {
                    id,
                    reading: serde_json::from_str(&payload_json)?,
                    created_at,
                })
            })
            .collect()
    }

    /// Remove entries by local id. Returns how many were actually removed.
    pub fn delete(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let removed = self.conn.execute(
            &format!("DELETE FROM queue WHERE id IN ({placeholders})"),
            params_from_iter(ids.iter()),
        )?;
        Ok(removed)
    }

    /// Number of live entries
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(1) FROM queue", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Entry count for status reporting. A storage error is logged and
    /// yields `None`.
    pub fn backlog(&self) -> Option<usize> {
        match self.count() {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Failed to count offline queue entries: {}", e);
                None
            }
        }
    }

    /// Evict the oldest entries until at most `max_rows` remain.
    ///
    /// Returns the number of evicted entries.
    pub fn prune_to_row_cap(&self, max_rows: usize) -> Result<usize> {
        let total = self.count()?;
        if total <= max_rows {
            return Ok(0);
        }

        let to_remove = total - max_rows;
        let removed = self.conn.execute(
            "DELETE FROM queue WHERE id IN (
                 SELECT id FROM queue ORDER BY ts_min ASC, id ASC LIMIT ?1
             )",
            [clamp_limit(to_remove)],
        )?;

        info!("Offline queue over cap; evicted {} oldest entries", removed);
        Ok(removed)
    }

    /// Try to deliver up to `max_batch` oldest entries, in order.
    ///
    /// Each acknowledged (2xx) entry is deleted. The first non-2xx status or
    /// transport error ends the pass; that entry and everything after it stay
    /// queued for the next call. Returns the number delivered.
    ///
    /// # Errors
    ///
    /// Only storage errors (reading the batch, deleting a delivered entry)
    /// are returned. Send failures are part of the normal result.
    pub async fn flush_once<T>(&self, max_batch: usize, transport: &T) -> Result<usize>
    where
        T: Transport + ?Sized,
    {
        let batch = self.dequeue_batch(max_batch)?;
        let mut flushed = 0;

        for entry in batch {
            match transport.send(&entry.reading).await {
                Ok(code) if is_success(code) => {
                    self.delete(&[entry.id])?;
                    flushed += 1;
                }
                Ok(code) => {
                    debug!(status = code, ts_min = entry.reading.ts_min, "Flush stopped on non-success status");
                    break;
                }
                Err(e) => {
                    debug!(error = %e, ts_min = entry.reading.ts_min, "Flush stopped on send error");
                    break;
                }
            }
        }

        Ok(flushed)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Close the underlying database
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::mocks::{MockOutcome, MockTransport};
    use tempfile::TempDir;

    fn payload(device_id: &str, ts_min: i64) -> Reading {
        Reading {
            day: crate::reading::day_from_epoch_minutes(ts_min),
            ts_min,
            device_id: device_id.to_string(),
            temp_c: Some(21.5),
            humidity_pct: None,
            pressure_hpa: None,
            ambient_lux: None,
            iaq: None,
            noise_db: None,
        }
    }

    fn ts_mins(entries: &[QueueEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.reading.ts_min).collect()
    }

    fn spool(dir: &TempDir, max_rows: usize) -> OfflineQueue {
        OfflineQueue::open(dir.path().join("spool.db"), max_rows).unwrap()
    }

    #[test]
    fn test_enqueue_dedupe_and_prune() {
        let dir = TempDir::new().unwrap();
        let q = spool(&dir, 3);

        for i in 0..5 {
            q.enqueue(&payload("dev1", 100 + i)).unwrap();
        }

        assert_eq!(q.count().unwrap(), 3);
        assert_eq!(ts_mins(&q.dequeue_batch(10).unwrap()), vec![102, 103, 104]);

        // Same (deviceId, ts_min) again: no growth
        assert!(!q.enqueue(&payload("dev1", 104)).unwrap());
        assert_eq!(q.count().unwrap(), 3);
    }

    #[test]
    fn test_duplicate_keeps_first_payload() {
        let q = OfflineQueue::in_memory(10).unwrap();
        let first = payload("dev1", 500);
        let mut second = payload("dev1", 500);
        second.temp_c = Some(99.0);

        assert!(q.enqueue(&first).unwrap());
        assert!(!q.enqueue(&second).unwrap());

        let entries = q.dequeue_batch(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reading, first);
    }

    #[test]
    fn test_same_minute_different_devices_are_distinct() {
        let q = OfflineQueue::in_memory(10).unwrap();
        q.enqueue(&payload("dev1", 42)).unwrap();
        q.enqueue(&payload("dev2", 42)).unwrap();
        assert_eq!(q.count().unwrap(), 2);
    }

    #[test]
    fn test_replay_order_is_ts_min_then_id() {
        let q = OfflineQueue::in_memory(10).unwrap();
        q.enqueue(&payload("dev1", 300)).unwrap();
        q.enqueue(&payload("dev2", 100)).unwrap();
        q.enqueue(&payload("dev1", 100)).unwrap();
        q.enqueue(&payload("dev1", 200)).unwrap();

        let entries = q.dequeue_batch(10).unwrap();
        assert_eq!(ts_mins(&entries), vec![100, 100, 200, 300]);
        // Tie on ts_min broken by insertion id
        assert_eq!(entries[0].reading.device_id, "dev2");
        assert_eq!(entries[1].reading.device_id, "dev1");
        assert!(entries[0].id < entries[1].id);

        // Peek is a pure read
        assert_eq!(q.count().unwrap(), 4);
        assert_eq!(ts_mins(&q.dequeue_batch(2).unwrap()), vec![100, 100]);
    }

    #[test]
    fn test_eviction_keeps_most_recent_by_ts_min() {
        let q = OfflineQueue::in_memory(2).unwrap();
        q.enqueue(&payload("dev1", 50)).unwrap();
        q.enqueue(&payload("dev1", 10)).unwrap();
        q.enqueue(&payload("dev1", 30)).unwrap();

        assert_eq!(ts_mins(&q.dequeue_batch(10).unwrap()), vec![30, 50]);
    }

    #[test]
    fn test_backlog_reports_storage_error_as_none() {
        let queue = OfflineQueue::in_memory(10).unwrap();
        queue.enqueue(&payload("dev1", 1)).unwrap();
        assert_eq!(queue.backlog(), Some(1));

        queue.connection().execute_batch("DROP TABLE queue;").unwrap();
        assert!(queue.count().is_err());
        assert_eq!(queue.backlog(), None);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let q = OfflineQueue::in_memory(10).unwrap();
        q.enqueue(&payload("dev1", 1)).unwrap();
        q.enqueue(&payload("dev1", 2)).unwrap();
        let ids: Vec<i64> = q.dequeue_batch(10).unwrap().iter().map(|e| e.id).collect();

        assert_eq!(q.delete(&ids).unwrap(), 2);
        assert_eq!(q.delete(&ids).unwrap(), 0);
        assert_eq!(q.delete(&[]).unwrap(), 0);
        assert_eq!(q.count().unwrap(), 0);
    }

    #[test]
    fn test_prune_to_smaller_cap() {
        let q = OfflineQueue::in_memory(10).unwrap();
        for i in 0..6 {
            q.enqueue(&payload("dev1", i)).unwrap();
        }

        assert_eq!(q.prune_to_row_cap(4).unwrap(), 2);
        assert_eq!(q.prune_to_row_cap(4).unwrap(), 0);
        assert_eq!(ts_mins(&q.dequeue_batch(10).unwrap()), vec![2, 3, 4, 5]);
        assert_eq!(q.prune_to_row_cap(0).unwrap(), 4);
        assert_eq!(q.count().unwrap(), 0);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let q = spool(&dir, 10);
            q.enqueue(&payload("dev1", 7)).unwrap();
            q.enqueue(&payload("dev1", 8)).unwrap();
            q.close().unwrap();
        }

        let q = spool(&dir, 10);
        assert_eq!(ts_mins(&q.dequeue_batch(10).unwrap()), vec![7, 8]);

        // Ids keep increasing across restarts
        let last_id = q.dequeue_batch(10).unwrap()[1].id;
        q.enqueue(&payload("dev1", 9)).unwrap();
        assert!(q.dequeue_batch(10).unwrap()[2].id > last_id);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("spool.db");
        let q = OfflineQueue::open(&path, 5).unwrap();
        assert_eq!(q.max_rows(), 5);
        assert!(path.exists());
    }

    #[test]
    fn test_corrupt_payload_is_surfaced() {
        let q = OfflineQueue::in_memory(10).unwrap();
        q.connection()
            .execute(
                "INSERT INTO queue (deviceId, ts_min, payload_json, created_at)
                 VALUES ('dev1', 1, 'not json', 0)",
                [],
            )
            .unwrap();

        assert!(q.dequeue_batch(10).is_err());
    }

    #[tokio::test]
    async fn test_flush_once_stops_on_failure_and_deletes_success() {
        let dir = TempDir::new().unwrap();
        let q = spool(&dir, 10);
        for i in 0..3 {
            q.enqueue(&payload("dev1", 200 + i)).unwrap();
        }

        let transport = MockTransport::with_responder(|reading| {
            if reading.ts_min < 202 {
                MockOutcome::Status(200)
            } else {
                MockOutcome::Fail
            }
        });

        assert_eq!(q.flush_once(10, &transport).await.unwrap(), 2);
        assert_eq!(q.count().unwrap(), 1);
        assert_eq!(ts_mins(&q.dequeue_batch(10).unwrap()), vec![202]);
        assert_eq!(transport.sent_ts_mins(), vec![200, 201, 202]);

        // Endpoint recovered: backlog drains
        transport.set_responder(|_| MockOutcome::Status(201));
        assert_eq!(q.flush_once(10, &transport).await.unwrap(), 1);
        assert_eq!(q.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_flush_once_stops_on_non_success_status() {
        let q = OfflineQueue::in_memory(10).unwrap();
        for i in 0..4 {
            q.enqueue(&payload("dev1", i)).unwrap();
        }

        let transport = MockTransport::with_responder(|reading| {
            if reading.ts_min == 0 {
                MockOutcome::Status(204)
            } else {
                MockOutcome::Status(429)
            }
        });

        assert_eq!(q.flush_once(10, &transport).await.unwrap(), 1);
        // Nothing after the rejected entry was attempted
        assert_eq!(transport.sent_ts_mins(), vec![0, 1]);
        assert_eq!(ts_mins(&q.dequeue_batch(10).unwrap()), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_flush_once_respects_batch_size() {
        let q = OfflineQueue::in_memory(10).unwrap();
        for i in 0..5 {
            q.enqueue(&payload("dev1", i)).unwrap();
        }
        let transport = MockTransport::with_status(200);

        assert_eq!(q.flush_once(2, &transport).await.unwrap(), 2);
        assert_eq!(ts_mins(&q.dequeue_batch(10).unwrap()), vec![2, 3, 4]);

        assert_eq!(q.flush_once(10, &transport).await.unwrap(), 3);
        assert_eq!(q.count().unwrap(), 0);
        assert_eq!(transport.sent_ts_mins(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_flush_once_on_empty_queue() {
        let q = OfflineQueue::in_memory(10).unwrap();
        let transport = MockTransport::failing();

        let flushed = tokio_test::block_on(q.flush_once(10, &transport)).unwrap();
        assert_eq!(flushed, 0);
        assert_eq!(transport.sent_count(), 0);
    }
}
