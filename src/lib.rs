//! Write-ahead logger for a transactional storage engine.
//!
//! Every state-changing operation is recorded here before any page is
//! mutated, so that a crashed engine can rebuild a consistent state by
//! replay and rollback. Appends from many threads are serialized onto one
//! monotonically increasing LSN sequence, filled into an in-memory buffer
//! that is swapped against a second buffer being written out, and made
//! durable with group commit: concurrent commits share a single fsync.

pub mod checksum;
pub mod codec;
pub mod cursor;
pub mod error;
pub mod file_mgr;
pub mod io;
pub mod logger;
pub mod records;
pub mod rollback;
pub mod txn;
pub mod types;

pub use error::{Error, Result};
pub use logger::{Logger, LoggerStatus};
pub use records::LogEntry;
pub use types::{BlockNum, DictId, FileNum, Lsn, TxnId, TXNID_NONE};
