//! Asynchronous PostgreSQL client using Tokio.

mod conn;
mod stream;

pub use conn::Conn;
pub use stream::Stream;
