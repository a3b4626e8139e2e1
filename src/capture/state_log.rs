//! # Append-only per-target state log (`states.json`).
//!
//! The file is a JSON array of objects, one per persisted tick, and is a valid
//! document after every append. Appends overwrite the closing bracket in place:
//!
//! ```text
//! [                     [
//! {"x":1,"time":0.1}    {"x":1,"time":0.1},
//! ]              ──►    {"x":2,"time":0.2}
//!                       ]
//! ```
//!
//! Opening an existing log validates it and continues after its last entry. A failed
//! append restores the closing bracket, and the most recent append can be taken back
//! with [`StateLog::pop_last`].

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::PersistenceError;

pub const STATE_LOG_FILE: &str = "states.json";

pub struct StateLog {
    path: PathBuf,
    file: File,
    /// Byte offset of the closing `]`.
    end: u64,
    /// `end` before the most recent append, until it is popped.
    last: Option<u64>,
    entries: usize,
}

impl StateLog {
    /// Opens (or creates) `dir/states.json`.
    pub fn open(dir: &Path) -> Result<Self, PersistenceError> {
        let path = dir.join(STATE_LOG_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| PersistenceError::io(&path, e))?;

        let mut text = String::new();
        file.read_to_string(&mut text)
            .map_err(|e| PersistenceError::io(&path, e))?;

        if text.trim().is_empty() {
            file.set_len(0)
                .and_then(|_| file.seek(SeekFrom::Start(0)))
                .and_then(|_| file.write_all(b"[\n]"))
                .map_err(|e| PersistenceError::io(&path, e))?;
            return Ok(Self {
                path,
                file,
                end: 2,
                last: None,
                entries: 0,
            });
        }

        let existing: Vec<Value> =
            serde_json::from_str(&text).map_err(|source| PersistenceError::Json {
                path: path.clone(),
                source,
            })?;
        // The document parsed as an array, so a closing bracket exists.
        let end = text.rfind(']').unwrap_or(text.len()) as u64;
        Ok(Self {
            path,
            file,
            end,
            last: None,
            entries: existing.len(),
        })
    }

    /// Appends one record: `state` (wrapped as `{"state": ..}` unless it is an
    /// object) with a `time` field set to `timestamp`.
    pub fn append(&mut self, state: &Value, timestamp: f64) -> Result<(), PersistenceError> {
        let record = Self::record(state, timestamp);
        let encoded = serde_json::to_string(&record).map_err(|source| PersistenceError::Json {
            path: self.path.clone(),
            source,
        })?;

        let sep = if self.entries == 0 { "" } else { ",\n" };
        let chunk = format!("{sep}{encoded}\n]");
        let new_end = self.end + (chunk.len() as u64) - 1;

        let written = self
            .file
            .seek(SeekFrom::Start(self.end))
            .and_then(|_| self.file.write_all(chunk.as_bytes()))
            .and_then(|_| self.file.set_len(new_end + 1));
        if let Err(e) = written {
            // Restore the closing bracket; the write error is what gets reported.
            let _ = self.close_at(self.end);
            return Err(PersistenceError::io(&self.path, e));
        }

        self.last = Some(self.end);
        self.end = new_end;
        self.entries += 1;
        Ok(())
    }

    /// Removes the record written by the most recent [`append`](Self::append).
    ///
    /// Returns `false` when there is nothing to take back (no append since opening,
    /// or it was already popped).
    pub fn pop_last(&mut self) -> Result<bool, PersistenceError> {
        let Some(prev) = self.last.take() else {
            return Ok(false);
        };
        self.close_at(prev)
            .map_err(|e| PersistenceError::io(&self.path, e))?;
        self.end = prev;
        self.entries -= 1;
        Ok(true)
    }

    /// Writes the closing bracket at `end` and cuts everything after it.
    fn close_at(&mut self, end: u64) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(end))?;
        self.file.write_all(b"]")?;
        self.file.set_len(end + 1)
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record(state: &Value, timestamp: f64) -> Value {
        let mut obj = match state {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("state".to_owned(), other.clone());
                map
            }
        };
        obj.insert("time".to_owned(), Value::from(timestamp));
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read(dir: &Path) -> Vec<Value> {
        let text = std::fs::read_to_string(dir.join(STATE_LOG_FILE)).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn fresh_log_is_an_empty_array() {
        let tmp = tempfile::tempdir().unwrap();
        let log = StateLog::open(tmp.path()).unwrap();
        assert!(log.is_empty());
        assert!(read(tmp.path()).is_empty());
    }

    #[test]
    fn appends_keep_document_valid_and_ordered() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = StateLog::open(tmp.path()).unwrap();
        for i in 0..4 {
            log.append(&json!({"x": i, "claw": [0.1, 0.2]}), i as f64 * 0.1)
                .unwrap();
            assert_eq!(read(tmp.path()).len(), i + 1);
        }

        let entries = read(tmp.path());
        let times: Vec<f64> = entries.iter().map(|e| e["time"].as_f64().unwrap()).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(entries[3]["x"], 3);
    }

    #[test]
    fn scalar_state_is_wrapped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = StateLog::open(tmp.path()).unwrap();
        log.append(&json!([1, 2, 3]), 5.0).unwrap();
        assert_eq!(read(tmp.path()), vec![json!({"state": [1, 2, 3], "time": 5.0})]);
    }

    #[test]
    fn reopening_continues_existing_log() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(STATE_LOG_FILE),
            "[\n    {\n        \"time\": 1.0\n    }\n]\n",
        )
        .unwrap();

        let mut log = StateLog::open(tmp.path()).unwrap();
        assert_eq!(log.len(), 1);
        log.append(&json!({}), 2.0).unwrap();

        let entries = read(tmp.path());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["time"], 2.0);
    }

    #[test]
    fn pop_last_takes_back_one_record() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = StateLog::open(tmp.path()).unwrap();
        assert!(!log.pop_last().unwrap());

        log.append(&json!({"x": 1}), 0.1).unwrap();
        log.append(&json!({"x": 2}), 0.2).unwrap();
        assert!(log.pop_last().unwrap());
        assert!(!log.pop_last().unwrap());
        assert_eq!(log.len(), 1);
        assert_eq!(read(tmp.path()), vec![json!({"x": 1, "time": 0.1})]);

        log.append(&json!({"x": 3}), 0.3).unwrap();
        let entries = read(tmp.path());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["x"], 3);
    }

    #[test]
    fn popping_the_only_record_leaves_an_empty_array() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = StateLog::open(tmp.path()).unwrap();
        log.append(&json!({"x": 1}), 0.1).unwrap();
        assert!(log.pop_last().unwrap());
        assert!(log.is_empty());
        assert!(read(tmp.path()).is_empty());

        drop(log);
        let mut log = StateLog::open(tmp.path()).unwrap();
        log.append(&json!({"x": 2}), 0.2).unwrap();
        assert_eq!(read(tmp.path()).len(), 1);
    }

    #[test]
    fn corrupt_log_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(STATE_LOG_FILE), "{not json").unwrap();
        let err = StateLog::open(tmp.path()).err().unwrap();
        assert_eq!(err.as_label(), "persistence_json");
    }
}
