//! Timeline persistence: session state objects, the snapshot store and the
//! key-value substrate underneath them.

mod kv;
mod migrations;
mod session;
mod snapshot_store;

use thiserror::Error;

pub use kv::{read_json, write_json, KvStore, MemoryKvStore, SqliteKvStore};
pub use session::{assets_key, snapshots_key, Session};
pub use snapshot_store::{SessionSummary, SnapshotStore, DEFAULT_CHECKPOINT_EVERY};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to create data directory: {0}")]
    CreateDir(std::io::Error),
    #[error("Lock poisoned")]
    LockPoisoned,
    #[error("corrupt value under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("index {index} out of range for session {session} ({len} snapshots)")]
    IndexOutOfRange {
        session: String,
        index: usize,
        len: usize,
    },
}
