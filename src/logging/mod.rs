//! Persistent event journal.

mod jsonl;

pub use jsonl::{journal_enabled, JournalHandler, JsonlJournal};
