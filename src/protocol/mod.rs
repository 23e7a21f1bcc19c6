//! PostgreSQL wire protocol, version 3.0.
//!
//! - `backend`: parsers for server messages, one per message kind
//! - `frontend`: writers for client messages, each appending one frame
//! - `codec`: big-endian integers, C strings and frame helpers
//! - `types`: OIDs, format codes and transaction status

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod types;

pub use backend::RawMessage;
pub use types::{FormatCode, Oid, TransactionStatus};
