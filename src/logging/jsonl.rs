//! JSONL journal of daemon sessions and inactivity events.

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::decode_section;
use crate::error::HandlerError;
use crate::event::{Event, EventHandler};

const SECTION: &str = "journal";

/// One line of the journal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum JournalEntry {
    #[serde(rename = "session_start")]
    SessionStart {
        timestamp: DateTime<Utc>,
        version: String,
    },
    #[serde(rename = "session_end")]
    SessionEnd {
        timestamp: DateTime<Utc>,
        cycles: u64,
    },
    #[serde(rename = "inactive_timeout")]
    InactiveTimeout {
        timestamp: DateTime<Utc>,
        idle_seconds: u64,
    },
    #[serde(rename = "activity_resumed")]
    ActivityResumed {
        timestamp: DateTime<Utc>,
        idle_seconds: u64,
    },
}

impl From<&Event> for JournalEntry {
    fn from(event: &Event) -> Self {
        let timestamp = Utc::now();
        match event {
            Event::InactiveTimeout { idle_for } => JournalEntry::InactiveTimeout {
                timestamp,
                idle_seconds: idle_for.as_secs(),
            },
            Event::ActivityResumed { idle_for } => JournalEntry::ActivityResumed {
                timestamp,
                idle_seconds: idle_for.as_secs(),
            },
        }
    }
}

/// Append-only JSONL writer, one file per local day.
pub struct JsonlJournal {
    logs_dir: PathBuf,
    current_file: Option<BufWriter<File>>,
    current_date: Option<String>,
}

impl JsonlJournal {
    pub fn new(logs_dir: PathBuf) -> Self {
        Self {
            logs_dir,
            current_file: None,
            current_date: None,
        }
    }

    /// Get or create the journal file for today.
    fn get_writer(&mut self) -> Result<&mut BufWriter<File>, HandlerError> {
        let today = Local::now().format("%Y-%m-%d").to_string();

        if self.current_date.as_ref() != Some(&today) || self.current_file.is_none() {
            std::fs::create_dir_all(&self.logs_dir)?;
            let log_path = self.logs_dir.join(format!("{}.jsonl", today));

            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

            self.current_file = Some(BufWriter::new(file));
            self.current_date = Some(today);

            debug!("Opened journal file: {:?}", log_path);
        }

        self.current_file
            .as_mut()
            .ok_or_else(|| HandlerError::Io(std::io::Error::other("no journal file available")))
    }

    /// Write one entry and flush it.
    pub fn write(&mut self, entry: &JournalEntry) -> Result<(), HandlerError> {
        let line = serde_json::to_string(entry)?;
        let writer = self.get_writer()?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }

    pub fn log_session_start(&mut self, version: &str) -> Result<(), HandlerError> {
        info!("Session started");
        self.write(&JournalEntry::SessionStart {
            timestamp: Utc::now(),
            version: version.to_string(),
        })
    }

    pub fn log_session_end(&mut self, cycles: u64) -> Result<(), HandlerError> {
        info!("Session ended after {} cycles", cycles);
        self.write(&JournalEntry::SessionEnd {
            timestamp: Utc::now(),
            cycles,
        })
    }
}

impl Drop for JsonlJournal {
    fn drop(&mut self) {
        if let Some(ref mut writer) = self.current_file {
            let _ = writer.flush();
        }
    }
}

#[derive(Debug, Deserialize)]
struct JournalSection {
    #[serde(default)]
    enabled: bool,
}

/// Whether `eventhandler.journal.enabled` is set.
pub fn journal_enabled(eventhandler: &toml::Table) -> bool {
    match decode_section::<JournalSection>(eventhandler, SECTION) {
        Ok(section) => section.enabled,
        Err(e) => {
            debug!("Journal disabled: {}", e);
            false
        }
    }
}

/// Event handler that records every event in the journal.
pub struct JournalHandler {
    journal: JsonlJournal,
}

impl JournalHandler {
    pub fn new(logs_dir: PathBuf) -> Self {
        Self {
            journal: JsonlJournal::new(logs_dir),
        }
    }
}

#[async_trait]
impl EventHandler for JournalHandler {
    fn name(&self) -> &str {
        SECTION
    }

    fn configure(&mut self, eventhandler: &toml::Table) -> bool {
        if !journal_enabled(eventhandler) {
            return false;
        }
        info!("journal handler config: dir={:?}", self.journal.logs_dir);
        true
    }

    async fn handle(&mut self, event: &Event) -> Result<(), HandlerError> {
        self.journal.write(&JournalEntry::from(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn read_entries(dir: &std::path::Path) -> Vec<JournalEntry> {
        let mut entries = Vec::new();
        for file in std::fs::read_dir(dir).unwrap() {
            let content = std::fs::read_to_string(file.unwrap().path()).unwrap();
            for line in content.lines() {
                entries.push(serde_json::from_str(line).unwrap());
            }
        }
        entries
    }

    #[test]
    fn test_session_lines_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let logs_dir = dir.path().join("logs");
        {
            let mut journal = JsonlJournal::new(logs_dir.clone());
            journal.log_session_start("1.2.3").unwrap();
            journal.log_session_end(7).unwrap();
        }

        let entries = read_entries(&logs_dir);
        assert_eq!(entries.len(), 2);
        assert!(matches!(&entries[0], JournalEntry::SessionStart { version, .. } if version == "1.2.3"));
        assert!(matches!(entries[1], JournalEntry::SessionEnd { cycles: 7, .. }));
    }

    #[tokio::test]
    async fn test_handler_writes_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = JournalHandler::new(dir.path().to_path_buf());
        assert!(handler.configure(&"[journal]\nenabled = true\n".parse().unwrap()));

        handler
            .handle(&Event::InactiveTimeout {
                idle_for: Duration::from_secs(1800),
            })
            .await
            .unwrap();

        let entries = read_entries(dir.path());
        assert!(matches!(
            entries[0],
            JournalEntry::InactiveTimeout { idle_seconds: 1800, .. }
        ));
    }

    #[test]
    fn test_disabled_by_default() {
        let mut handler = JournalHandler::new(PathBuf::from("unused"));
        assert!(!handler.configure(&toml::Table::new()));
        assert!(!handler.configure(&"[journal]\nenabled = false\n".parse().unwrap()));
    }
}
