//! vigil-store: SQLite persistence for subjects, signatures and emotion records.
//!
//! A single [`Database`] is opened per process and shared (via `Arc`) by the
//! [`SignatureStore`] and the [`EmotionLog`].

pub mod db;
pub mod emotions;
pub mod subjects;

pub use db::Database;
pub use emotions::EmotionLog;
pub use subjects::SignatureStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("subject already enrolled: {0}")]
    Duplicate(String),
    #[error("subject not found: {0}")]
    NotFound(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] vigil_core::SignatureError),
    #[error(transparent)]
    InvalidLabel(#[from] vigil_core::LabelError),
    #[error("out-of-order record for {subject} in session {session}: {attempted_us} precedes {last_us}")]
    OutOfOrder {
        subject: String,
        session: String,
        last_us: i64,
        attempted_us: i64,
    },
    #[error("stored session id is not a UUID: {0}")]
    InvalidSessionId(String),
    #[error("stored timestamp out of range: {0}")]
    InvalidTimestamp(i64),
    #[error("database lock poisoned")]
    Poisoned,
}
