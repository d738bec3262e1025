//! Persisted question/answer history, keyed by Unix timestamp.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use dockchat_types::{HistoryRecord, HistorySummary};

use crate::config::paths;

/// Storage for finished exchanges.
///
/// Records are immutable once stored and timestamps are unique.
pub trait HistoryStore: Send + Sync {
    /// Stores one exchange.
    ///
    /// # Errors
    /// Fails if `timestamp` is already taken or the store cannot be written.
    fn put(&self, timestamp: i64, question: &str, answer: &str) -> Result<()>;

    /// All entries, oldest first.
    ///
    /// # Errors
    /// Fails if the store cannot be read.
    fn list(&self) -> Result<Vec<HistorySummary>>;

    /// # Errors
    /// Fails if the store cannot be read.
    fn get(&self, timestamp: i64) -> Result<Option<HistoryRecord>>;

    /// Newest stored timestamp, if any.
    ///
    /// # Errors
    /// Fails if the store cannot be read.
    fn latest_timestamp(&self) -> Result<Option<i64>> {
        Ok(self.list()?.last().map(|s| s.timestamp))
    }
}

/// One JSON record per line, append-only.
pub struct JsonlHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at the default location under `DOCKCHAT_HOME`.
    pub fn open_default() -> Self {
        Self::new(paths::history_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_records(&self) -> Result<Vec<HistoryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.path)
            .with_context(|| format!("open history {}", self.path.display()))?;
        let mut records = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.context("read history line")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryRecord>(&line) {
                Ok(record) => records.push(record),
                // A torn last line from a crash should not hide the rest.
                Err(err) => tracing::warn!(line = lineno + 1, error = %err, "skipping bad history line"),
            }
        }
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

impl HistoryStore for JsonlHistoryStore {
    fn put(&self, timestamp: i64, question: &str, answer: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.read_records()?.iter().any(|r| r.timestamp == timestamp) {
            bail!("history already has an entry at {timestamp}");
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create history directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open history {}", self.path.display()))?;
        let prefix = if ends_with_newline(&mut file)? { "" } else { "\n" };

        let record = HistoryRecord {
            timestamp,
            question: question.to_string(),
            answer: answer.to_string(),
        };
        let json = serde_json::to_string(&record).context("serialize history record")?;
        file.write_all(format!("{prefix}{json}\n").as_bytes())
            .context("write history record")?;
        tracing::info!(timestamp, "history record stored");
        Ok(())
    }

    fn list(&self) -> Result<Vec<HistorySummary>> {
        Ok(self.read_records()?.iter().map(HistoryRecord::summary).collect())
    }

    fn get(&self, timestamp: i64) -> Result<Option<HistoryRecord>> {
        Ok(self
            .read_records()?
            .into_iter()
            .find(|r| r.timestamp == timestamp))
    }
}

/// Process-local store, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: Mutex<BTreeMap<i64, HistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn put(&self, timestamp: i64, question: &str, answer: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(&timestamp) {
            bail!("history already has an entry at {timestamp}");
        }
        records.insert(
            timestamp,
            HistoryRecord {
                timestamp,
                question: question.to_string(),
                answer: answer.to_string(),
            },
        );
        Ok(())
    }

    fn list(&self) -> Result<Vec<HistorySummary>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.values().map(HistoryRecord::summary).collect())
    }

    fn get(&self, timestamp: i64) -> Result<Option<HistoryRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(&timestamp).cloned())
    }
}

/// True for an empty file or one whose last byte ends a line.
fn ends_with_newline(file: &mut fs::File) -> Result<bool> {
    let len = file.metadata().context("stat history")?.len();
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))
        .and_then(|_| file.read_exact(&mut last))
        .context("read history tail")?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn exercise(store: &dyn HistoryStore) {
        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.latest_timestamp().unwrap(), None);

        store.put(200, "Second question", "answer b").unwrap();
        store.put(100, "First question\nwith detail", "answer a").unwrap();

        let list = store.list().unwrap();
        assert_eq!(
            list.iter().map(|s| s.timestamp).collect::<Vec<_>>(),
            vec![100, 200]
        );
        assert_eq!(list[0].question_preview, "First question");
        assert_eq!(store.latest_timestamp().unwrap(), Some(200));

        let record = store.get(100).unwrap().unwrap();
        assert_eq!(record.answer, "answer a");
        assert!(store.get(150).unwrap().is_none());

        let err = store.put(100, "again", "dup").unwrap_err();
        assert!(err.to_string().contains("already has an entry at 100"));
        assert_eq!(store.get(100).unwrap().unwrap().question, "First question\nwith detail");
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryHistoryStore::new());
    }

    #[test]
    fn jsonl_store_contract() {
        let dir = tempdir().unwrap();
        exercise(&JsonlHistoryStore::new(dir.path().join("nested/history.jsonl")));
    }

    #[test]
    fn jsonl_store_survives_reopen_and_bad_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        JsonlHistoryStore::new(&path)
            .put(42, "q", "**Answer:**\n\nraw")
            .unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"timestamp\": 43, \"question\"").unwrap();

        let reopened = JsonlHistoryStore::new(&path);
        let list = reopened.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(
            reopened.get(42).unwrap().unwrap().answer,
            "**Answer:**\n\nraw"
        );
    }

    #[test]
    fn put_after_torn_line_starts_a_new_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let store = JsonlHistoryStore::new(&path);
        store.put(6, "q", "a").unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"timestamp\": 7, \"quest").unwrap();
        drop(file);

        store.put(8, "next", "kept").unwrap();

        let reopened = JsonlHistoryStore::new(&path);
        let list = reopened.list().unwrap();
        assert_eq!(list.iter().map(|s| s.timestamp).collect::<Vec<_>>(), [6, 8]);
        assert_eq!(reopened.get(8).unwrap().unwrap().answer, "kept");
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonlHistoryStore::new(dir.path().join("none.jsonl"));
        assert!(store.list().unwrap().is_empty());
        assert!(store.get(1).unwrap().is_none());
    }
}
