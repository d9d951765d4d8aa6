// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

/// On-disk checkpoint schema.  `version` gates compatibility; readers skip
/// files whose version or session does not match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointFile {
    version: u32,
    session_id: String,
    turns: Value,
    metadata: Value,
    timestamp: i64,
}

const CHECKPOINT_VERSION: u32 = 1;

/// Metadata about one stored checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub session_id: String,
    pub timestamp_ms: i64,
    pub size_bytes: u64,
    pub path: PathBuf,
}

/// Session snapshots under `<dir>/<session-id>/<timestamp-ms>-<uuid8>.json`.
///
/// Writes are atomic (temp file + rename), so two writers to the same
/// session can never interleave bytes, and their final names differ by the
/// uuid suffix.
pub struct CheckpointManager {
    dir: PathBuf,
    max_checkpoints: usize,
    auto: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, max_checkpoints: usize) -> Self {
        Self {
            dir: dir.into(),
            max_checkpoints: max_checkpoints.max(1),
            auto: Mutex::new(None),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.dir.join(session_id)
    }

    /// Write a checkpoint; older entries beyond `max_checkpoints` are pruned.
    pub fn save(&self, session_id: &str, turns: Value, metadata: Value) -> anyhow::Result<Checkpoint> {
        let dir = self.session_dir(session_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating checkpoint dir {}", dir.display()))?;

        let timestamp = Utc::now().timestamp_millis();
        let short: String = Uuid::new_v4().simple().to_string()[..8].to_string();
        let name = format!("{timestamp}-{short}.json");
        let path = dir.join(&name);
        let tmp = dir.join(format!("{name}.tmp"));

        let file = CheckpointFile {
            version: CHECKPOINT_VERSION,
            session_id: session_id.to_string(),
            turns,
            metadata,
            timestamp,
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        std::fs::write(&tmp, &bytes)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming into {}", path.display()))?;
        debug!(session = session_id, file = %path.display(), "checkpoint saved");

        self.prune(session_id);

        Ok(Checkpoint {
            id: short,
            session_id: session_id.to_string(),
            timestamp_ms: timestamp,
            size_bytes: bytes.len() as u64,
            path,
        })
    }

    /// Load the newest readable checkpoint for the session, skipping
    /// corrupted or mismatched files.
    pub fn load(&self, session_id: &str) -> Option<Value> {
        for cp in self.list(session_id) {
            match Self::read_file(&cp.path, session_id) {
                Some(file) => return Some(file.turns),
                None => {
                    warn!(file = %cp.path.display(), "skipping unreadable checkpoint");
                }
            }
        }
        None
    }

    fn read_file(path: &Path, session_id: &str) -> Option<CheckpointFile> {
        let text = std::fs::read_to_string(path).ok()?;
        let file: CheckpointFile = serde_json::from_str(&text).ok()?;
        (file.version == CHECKPOINT_VERSION && file.session_id == session_id).then_some(file)
    }

    /// All checkpoints, newest first, ordered by the timestamp encoded in
    /// the filename.
    pub fn list(&self, session_id: &str) -> Vec<Checkpoint> {
        let dir = self.session_dir(session_id);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut found: Vec<Checkpoint> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let stem = name.strip_suffix(".json")?;
                let (ts, id) = stem.split_once('-')?;
                let timestamp_ms: i64 = ts.parse().ok()?;
                let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
                Some(Checkpoint {
                    id: id.to_string(),
                    session_id: session_id.to_string(),
                    timestamp_ms,
                    size_bytes,
                    path: entry.path(),
                })
            })
            .collect();
        found.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms).then(b.id.cmp(&a.id)));
        found
    }

    /// Delete everything beyond `max_checkpoints`; returns how many were
    /// removed.  Per-file removal errors are non-fatal.
    pub fn prune(&self, session_id: &str) -> usize {
        let all = self.list(session_id);
        let mut removed = 0;
        for cp in all.iter().skip(self.max_checkpoints) {
            match std::fs::remove_file(&cp.path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %cp.path.display(), error = %e, "prune failed"),
            }
        }
        removed
    }

    pub fn delete_all(&self, session_id: &str) {
        let dir = self.session_dir(session_id);
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %dir.display(), error = %e, "delete_all failed");
            }
        }
    }

    /// Periodically snapshot whatever `capture` returns.  Save errors during
    /// auto-checkpointing are swallowed (explicit `save` still surfaces
    /// them).  The task dies with the runtime and never blocks process exit.
    pub fn start_auto_checkpoint<F>(&self, session_id: &str, interval: Duration, capture: F)
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.stop_auto_checkpoint();
        // The task gets its own writer over the same directory; `save` is
        // stateless apart from the filesystem.
        let writer = CheckpointManager::new(self.dir.clone(), self.max_checkpoints);
        let session = session_id.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if let Err(e) = writer.save(&session, capture(), Value::Null) {
                    warn!(error = %e, "auto-checkpoint failed");
                }
            }
        });
        *self.auto.lock().unwrap() = Some(handle);
    }

    pub fn stop_auto_checkpoint(&self) {
        if let Some(handle) = self.auto.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for CheckpointManager {
    fn drop(&mut self) {
        if let Some(handle) = self.auto.lock().unwrap().take() {
            handle.abort();
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager(max: usize) -> (tempfile::TempDir, CheckpointManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), max);
        (dir, mgr)
    }

    #[test]
    fn save_then_load_round_trips_exactly() {
        let (_t, mgr) = manager(5);
        let data = json!({"turns": [{"role": "user", "text": "hi"}], "n": 3});
        mgr.save("s1", data.clone(), json!({"k": "v"})).unwrap();
        assert_eq!(mgr.load("s1"), Some(data));
    }

    #[test]
    fn load_missing_session_is_none() {
        let (_t, mgr) = manager(5);
        assert!(mgr.load("nope").is_none());
    }

    #[test]
    fn list_is_newest_first_and_bounded_by_prune() {
        let (_t, mgr) = manager(3);
        for i in 0..6 {
            mgr.save("s1", json!({ "i": i }), Value::Null).unwrap();
            // Distinct millisecond timestamps keep the order unambiguous.
            std::thread::sleep(Duration::from_millis(2));
        }
        let list = mgr.list("s1");
        assert!(list.len() <= 3, "prune keeps at most max: {}", list.len());
        assert!(
            list.windows(2).all(|w| w[0].timestamp_ms >= w[1].timestamp_ms),
            "descending timestamps"
        );
        // The newest stored checkpoint is the most recent save.
        assert_eq!(mgr.load("s1"), Some(json!({ "i": 5 })));
    }

    #[test]
    fn corrupted_newest_file_is_skipped() {
        let (_t, mgr) = manager(5);
        mgr.save("s1", json!("good"), Value::Null).unwrap();
        // Plant a newer, corrupt file.
        let dir = mgr.session_dir("s1");
        let future = Utc::now().timestamp_millis() + 60_000;
        std::fs::write(dir.join(format!("{future}-deadbeef.json")), "{not json").unwrap();
        assert_eq!(mgr.load("s1"), Some(json!("good")));
    }

    #[test]
    fn wrong_session_id_in_file_is_skipped() {
        let (_t, mgr) = manager(5);
        mgr.save("other", json!("theirs"), Value::Null).unwrap();
        // Copy the other session's file into s1's directory.
        let theirs = mgr.list("other")[0].path.clone();
        let dir = mgr.session_dir("s1");
        std::fs::create_dir_all(&dir).unwrap();
        let future = Utc::now().timestamp_millis() + 60_000;
        std::fs::copy(&theirs, dir.join(format!("{future}-aaaaaaaa.json"))).unwrap();
        assert!(mgr.load("s1").is_none(), "session mismatch must be skipped");
    }

    #[test]
    fn filenames_have_timestamp_and_short_uuid() {
        let (_t, mgr) = manager(5);
        let cp = mgr.save("s1", Value::Null, Value::Null).unwrap();
        let name = cp.path.file_name().unwrap().to_string_lossy().into_owned();
        let stem = name.strip_suffix(".json").unwrap();
        let (ts, id) = stem.split_once('-').unwrap();
        assert!(ts.parse::<i64>().is_ok());
        assert_eq!(id.len(), 8);
    }

    #[test]
    fn no_tmp_files_left_behind() {
        let (_t, mgr) = manager(5);
        mgr.save("s1", json!({"x": 1}), Value::Null).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(mgr.session_dir("s1"))
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn delete_all_removes_the_session() {
        let (_t, mgr) = manager(5);
        mgr.save("s1", json!(1), Value::Null).unwrap();
        mgr.delete_all("s1");
        assert!(mgr.list("s1").is_empty());
        mgr.delete_all("s1"); // idempotent
    }

    #[tokio::test]
    async fn auto_checkpoint_writes_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = std::sync::Arc::new(CheckpointManager::new(dir.path(), 5));
        mgr.start_auto_checkpoint("s1", Duration::from_millis(20), || json!("tick"));
        tokio::time::sleep(Duration::from_millis(90)).await;
        mgr.stop_auto_checkpoint();
        let count = mgr.list("s1").len();
        assert!(count >= 1, "at least one auto checkpoint, got {count}");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(mgr.list("s1").len(), count, "no writes after stop");
    }
}
