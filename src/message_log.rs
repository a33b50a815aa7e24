//! Append-only CSV log of every inbound and outbound message.
//!
//! Writers serialize on one mutex per log; each append opens the file in
//! append mode, writes the header if the file is still empty, then the row.
//! A file whose header differs from [`HEADER`] is never appended to.
//! Readers take no lock.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::BridgeError;

/// Header row written once at the top of a fresh log
pub const HEADER: [&str; 5] = ["id", "phone", "type", "text", "datetime"];

/// Sender recorded for messages this bridge sent
pub const OUTBOUND_SENDER: &str = "me";
/// Type recorded for messages this bridge sent
pub const OUTBOUND_KIND: &str = "sent";

/// One row of the log, before the id column is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub sender: String,
    pub kind: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn outbound(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender: OUTBOUND_SENDER.to_string(),
            kind: OUTBOUND_KIND.to_string(),
            text: text.into(),
            timestamp,
        }
    }

    /// RFC3339 form used in the `datetime` column
    pub fn datetime(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

pub struct MessageLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl MessageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, returning the full row as written.
    pub fn append(&self, record: &LogRecord) -> Result<Vec<String>, BridgeError> {
        if record.sender.is_empty() {
            return Err(BridgeError::InvalidRecord("sender is empty"));
        }

        // The guard protects no in-memory state, so poisoning is harmless
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let is_empty = file.metadata()?.len() == 0;
        if !is_empty && !self.header_matches()? {
            return Err(BridgeError::InvalidRecord("log header does not match schema"));
        }

        let mut writer = csv::Writer::from_writer(file);
        if is_empty {
            writer.write_record(HEADER)?;
        }

        let id = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string();
        let row = vec![
            id,
            record.sender.clone(),
            record.kind.clone(),
            record.text.clone(),
            record.datetime(),
        ];
        writer.write_record(&row)?;
        writer.flush()?;

        Ok(row)
    }

    /// Whether the first row of an existing log is exactly [`HEADER`].
    fn header_matches(&self) -> Result<bool, BridgeError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(fs::File::open(&self.path)?);
        match reader.records().next() {
            Some(first) => Ok(first?.iter().eq(HEADER)),
            None => Ok(false),
        }
    }

    /// Read every row, header included, in file order.
    pub fn read_all(&self) -> Result<Vec<Vec<String>>, BridgeError> {
        let file = fs::File::open(&self.path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(file);

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(sender: &str, text: &str) -> LogRecord {
        LogRecord {
            sender: sender.to_string(),
            kind: "text".to_string(),
            text: text.to_string(),
            timestamp: "2026-02-07T10:30:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = MessageLog::new(dir.path().join("messages.csv"));

        log.append(&record("alice@s.whatsapp.net", "hi")).unwrap();
        log.append(&record("bob@s.whatsapp.net", "hello")).unwrap();

        let rows = log.read_all().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], HEADER.to_vec());
        assert_eq!(rows.iter().filter(|r| r[0] == "id").count(), 1);
    }

    #[test]
    fn test_appended_row_reads_back_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let log = MessageLog::new(dir.path().join("messages.csv"));

        // Commas, quotes and newlines must survive the round trip
        let rec = record("alice@s.whatsapp.net", "line one, \"quoted\"\nline two");
        let written = log.append(&rec).unwrap();

        let rows = log.read_all().unwrap();
        assert!(rows.contains(&written));
        assert_eq!(written[1], "alice@s.whatsapp.net");
        assert_eq!(written[2], "text");
        assert_eq!(written[3], "line one, \"quoted\"\nline two");
        assert_eq!(written[4], "2026-02-07T10:30:00Z");
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MessageLog::new(dir.path().join("messages.csv")));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        log.append(&record(&format!("sender-{i}"), &format!("msg {j}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let rows = log.read_all().unwrap();
        assert_eq!(rows.len(), 1 + 16 * 10);
        assert_eq!(rows[0], HEADER.to_vec());
        assert!(rows[1..].iter().all(|r| r.len() == 5 && r[0] != "id"));
    }

    #[test]
    fn test_empty_sender_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let log = MessageLog::new(dir.path().join("messages.csv"));

        let err = log.append(&record("", "hi")).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidRecord(_)));
        assert!(!log.path().exists());
    }

    #[test]
    fn test_missing_log_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = MessageLog::new(dir.path().join("absent.csv"));
        assert!(matches!(log.read_all(), Err(BridgeError::Io(_))));
    }

    #[test]
    fn test_append_refuses_foreign_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.csv");
        let legacy = "id,phone,text,datetime\n1,alice,hi,2026-02-07T10:30:00Z\n";
        fs::write(&path, legacy).unwrap();
        let log = MessageLog::new(&path);

        let err = log.append(&LogRecord::outbound("ping", Utc::now())).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidRecord(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), legacy);
        assert_eq!(log.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_outbound_record() {
        let rec = LogRecord::outbound("ping", "2026-02-07T10:30:00Z".parse().unwrap());
        assert_eq!(rec.sender, OUTBOUND_SENDER);
        assert_eq!(rec.kind, OUTBOUND_KIND);
        assert_eq!(rec.datetime(), "2026-02-07T10:30:00Z");
    }
}
