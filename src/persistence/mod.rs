//! Persistence layer for crash recovery
//!
//! - Durable append-only log (file-backed or in-memory)
//! - Trade intent journal and series snapshots on top of it

pub mod journal;
pub mod wal;

pub use journal::{intent_key, series_key, TradeJournal, INTENT_KEY_PREFIX, SERIES_KEY_PREFIX};
pub use wal::{DurableLog, FileLog, LogEntry, MemoryLog};
