//! A PostgreSQL wire protocol (v3) client.
//!
//! # Features
//!
//! - **Sans-I/O state machines**: startup, simple query and extended query
//!   logic never touch a socket; the `sync` and `tokio` drivers run them
//! - **Authentication**: trust, cleartext, MD5 and SCRAM-SHA-256
//! - **Any transport**: connections are generic over the byte stream, so TLS
//!   or in-memory streams plug in through `Conn::new_with_stream`
//! - **Bounded reads**: every read loop stops after [`Opts::message_limit`]
//!   frames that are not data rows
//!
//! # Example
//!
//! ```no_run
//! use wirepg::sync::Conn;
//! use wirepg::{Opts, ParameterValue};
//!
//! fn main() -> wirepg::Result<()> {
//!     let opts = Opts {
//!         host: "localhost".into(),
//!         user: "postgres".into(),
//!         database: Some("mydb".into()),
//!         password: Some("secret".into()),
//!         ..Default::default()
//!     };
//!
//!     let mut conn = Conn::new(opts)?;
//!
//!     for response in conn.simple_query("SELECT 1 AS num; SELECT 'two' AS word")? {
//!         println!("{}: {:?}", response.command_tag, response.rows);
//!     }
//!
//!     conn.prepare_statement("", "SELECT $1::int4 + 1", &[])?;
//!     conn.bind("", "", &[ParameterValue::Integer(41)])?;
//!     let result = conn.execute("")?;
//!     println!("{:?}", result.rows);
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

pub mod buffer_set;
pub mod conversion;
pub mod error;
pub mod opts;
pub mod protocol;
pub mod row;
pub mod scram;
pub mod state;
pub mod value;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use buffer_set::BufferSet;
pub use error::{Error, ErrorFields, Result};
pub use opts::Opts;
pub use protocol::backend::{BackendKeyData, ColumnDescriptor};
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use row::{
    PortalDescription, PortalResult, PreparedStatementDescription, SimpleQueryResponse, TextRow,
};
pub use value::ParameterValue;
