//! JSON-lines file journal.
//!
//! One [`EventRecord`] per line. Every append is followed by `sync_data`, so
//! an acknowledged record survives a crash. A crash mid-append leaves at most
//! one torn final line, which is cut off on the next open.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::event::{Event, EventRecord};
use crate::store::EventStore;

#[derive(Debug)]
struct Journal {
    file: File,
    records: Vec<EventRecord>,
    next_seq: u64,
}

/// File-backed journal for one underlying.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    symbol: String,
    journal: Mutex<Journal>,
}

impl JsonlStore {
    /// Opens (or creates) the journal at `path`.
    ///
    /// Creates parent directories if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if any line but the last is unreadable
    /// or sequence numbers do not increase, and IO errors from the file.
    pub fn open(path: impl Into<PathBuf>, symbol: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let parsed = parse(&bytes)?;
        if parsed.valid_len < bytes.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = bytes.len() - parsed.valid_len,
                "Torn final journal line, truncating"
            );
            file.set_len(parsed.valid_len as u64)?;
            file.sync_data()?;
        }
        if parsed.missing_newline {
            file.write_all(b"\n")?;
            file.sync_data()?;
        }

        let next_seq = parsed.records.last().map_or(1, |r| r.seq + 1);
        info!(
            path = %path.display(),
            records = parsed.records.len(),
            next_seq,
            "Opened journal"
        );

        Ok(Self {
            path,
            symbol: symbol.into(),
            journal: Mutex::new(Journal {
                file,
                records: parsed.records,
                next_seq,
            }),
        })
    }

    /// Reads a journal without opening it for writing.
    ///
    /// A torn final line is ignored, not truncated.
    ///
    /// # Errors
    ///
    /// Same as [`JsonlStore::open`].
    pub fn read(path: impl AsRef<Path>) -> Result<Vec<EventRecord>, StoreError> {
        let bytes = fs::read(path.as_ref())?;
        Ok(parse(&bytes)?.records)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventStore for JsonlStore {
    fn record(&self, event: Event) -> Result<u64, StoreError> {
        let mut journal = self.journal.lock();
        let record = EventRecord {
            seq: journal.next_seq,
            recorded_at: Utc::now(),
            symbol: self.symbol.clone(),
            event,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        journal.file.write_all(&line)?;
        journal.file.sync_data()?;

        debug!(seq = record.seq, kind = record.event.kind(), "Journaled");
        let seq = record.seq;
        journal.next_seq += 1;
        journal.records.push(record);
        Ok(seq)
    }

    fn records(&self) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self.journal.lock().records.clone())
    }
}

struct Parsed {
    records: Vec<EventRecord>,
    /// Bytes up to and including the last complete record.
    valid_len: usize,
    /// The last complete record has no trailing newline.
    missing_newline: bool,
}

fn parse(bytes: &[u8]) -> Result<Parsed, StoreError> {
    let segments: Vec<&[u8]> = bytes.split(|b| *b == b'\n').collect();
    let last_content = segments
        .iter()
        .rposition(|s| !s.iter().all(u8::is_ascii_whitespace));

    let mut records: Vec<EventRecord> = Vec::new();
    let mut valid_len = 0;
    let mut missing_newline = false;
    let mut offset = 0;

    for (i, segment) in segments.iter().enumerate() {
        let end = offset + segment.len();
        let has_newline = i + 1 < segments.len();

        if !segment.iter().all(u8::is_ascii_whitespace) {
            match serde_json::from_slice::<EventRecord>(segment) {
                Ok(record) => {
                    if let Some(previous) = records.last() {
                        if record.seq <= previous.seq {
                            return Err(StoreError::Corrupt {
                                line: i + 1,
                                reason: format!(
                                    "sequence {} does not follow {}",
                                    record.seq, previous.seq
                                ),
                            });
                        }
                    }
                    records.push(record);
                    valid_len = if has_newline { end + 1 } else { end };
                    missing_newline = !has_newline;
                }
                Err(_) if Some(i) == last_content => break,
                Err(e) => {
                    return Err(StoreError::Corrupt {
                        line: i + 1,
                        reason: e.to_string(),
                    });
                }
            }
        } else if has_newline && valid_len == offset {
            valid_len = end + 1;
        }

        offset = end + 1;
    }

    Ok(Parsed {
        records,
        valid_len,
        missing_newline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::order;
    use oi_strangle_core::{LegStatus, OptionType};
    use tempfile::TempDir;

    fn temp_path() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal").join("NIFTY.jsonl");
        (dir, path)
    }

    fn transition(status: LegStatus) -> Event {
        Event::OrderTransition(order(OptionType::Call, status))
    }

    #[test]
    fn reopen_replays_every_record() {
        let (_dir, path) = temp_path();
        {
            let store = JsonlStore::open(&path, "NIFTY").unwrap();
            store.record(transition(LegStatus::Pending)).unwrap();
            store.record(transition(LegStatus::Submitted)).unwrap();
        }

        let store = JsonlStore::open(&path, "NIFTY").unwrap();
        let records = store.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].seq, 2);
        assert_eq!(records[1].event, transition(LegStatus::Submitted));

        let key = order(OptionType::Call, LegStatus::Pending).key();
        let latest = store.latest_state(&key).unwrap().unwrap();
        assert_eq!(latest.status, LegStatus::Submitted);
    }

    #[test]
    fn torn_final_line_is_dropped_and_sequence_continues() {
        let (_dir, path) = temp_path();
        {
            let store = JsonlStore::open(&path, "NIFTY").unwrap();
            store.record(transition(LegStatus::Pending)).unwrap();
            store.record(transition(LegStatus::Submitted)).unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(br#"{"seq":3,"recorded_at":"2024-01-"#).unwrap();
        }

        let store = JsonlStore::open(&path, "NIFTY").unwrap();
        assert_eq!(store.records().unwrap().len(), 2);

        let seq = store.record(transition(LegStatus::Acknowledged)).unwrap();
        assert_eq!(seq, 3);

        let reread = JsonlStore::read(&path).unwrap();
        let seqs: Vec<u64> = reread.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn complete_line_without_newline_is_kept() {
        let (_dir, path) = temp_path();
        {
            let store = JsonlStore::open(&path, "NIFTY").unwrap();
            store.record(transition(LegStatus::Pending)).unwrap();
        }
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.trim_end()).unwrap();

        let store = JsonlStore::open(&path, "NIFTY").unwrap();
        store.record(transition(LegStatus::Submitted)).unwrap();

        assert_eq!(JsonlStore::read(&path).unwrap().len(), 2);
    }

    #[test]
    fn bad_final_line_with_newline_is_treated_as_torn() {
        let (_dir, path) = temp_path();
        {
            let store = JsonlStore::open(&path, "NIFTY").unwrap();
            store.record(transition(LegStatus::Pending)).unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"not json\n").unwrap();
        }

        let store = JsonlStore::open(&path, "NIFTY").unwrap();
        assert_eq!(store.records().unwrap().len(), 1);
        assert_eq!(store.record(transition(LegStatus::Submitted)).unwrap(), 2);
    }

    #[test]
    fn corrupt_middle_line_is_an_error() {
        let (_dir, path) = temp_path();
        {
            let store = JsonlStore::open(&path, "NIFTY").unwrap();
            store.record(transition(LegStatus::Pending)).unwrap();
            store.record(transition(LegStatus::Submitted)).unwrap();
        }
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        fs::write(&path, format!("{}\ngarbage\n{}\n", lines[0], lines[1])).unwrap();

        let err = JsonlStore::open(&path, "NIFTY").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { line: 2, .. }));
    }

    #[test]
    fn snapshot_survives_reopen() {
        let (_dir, path) = temp_path();
        {
            let store = JsonlStore::open(&path, "NIFTY").unwrap();
            store
                .record(Event::OrderTransition(order(OptionType::Call, LegStatus::Submitted)))
                .unwrap();
            store
                .record(Event::OrderTransition(order(OptionType::Put, LegStatus::Filled)))
                .unwrap();
        }
        let store = JsonlStore::open(&path, "NIFTY").unwrap();
        let open = store.snapshot().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].status, LegStatus::Submitted);
        assert_eq!(open[0].sequence_no, 1);
    }
}
