//! Sans-I/O state machines for the PostgreSQL protocol.
//!
//! The machines never touch a socket. Each `step()` inspects the last frame
//! in the [`BufferSet`] and returns the [`Action`] the driver must perform.

pub mod action;
pub mod connection;
pub mod extended;
pub mod simple_query;

pub use action::{Action, AsyncMessage};
pub use connection::{ConnectionState, ConnectionStateMachine};
pub use extended::{ExtendedQueryStateMachine, ExtendedRequest, ExtendedResponse};
pub use simple_query::SimpleQueryStateMachine;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::msg_type;
use crate::protocol::types::TransactionStatus;

/// A protocol exchange driven by `sync::Conn` or `tokio::Conn`.
pub trait StateMachine {
    /// Advance using the frame currently in `buffer_set`.
    ///
    /// The first call happens before anything has been read.
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Status from the last ReadyForQuery, once finished.
    fn transaction_status(&self) -> TransactionStatus;
}

/// Caps the number of frames a read loop accepts.
///
/// DataRow frames are not counted, so large result sets never hit the cap.
#[derive(Debug, Clone)]
pub(crate) struct MessageBudget {
    operation: &'static str,
    limit: usize,
    seen: usize,
}

impl MessageBudget {
    pub(crate) fn new(operation: &'static str, limit: usize) -> Self {
        Self {
            operation,
            limit,
            seen: 0,
        }
    }

    pub(crate) fn count(&mut self, type_byte: u8) -> Result<()> {
        // Result payloads are unbounded; only protocol chatter is counted.
        if matches!(type_byte, msg_type::DATA_ROW | msg_type::COPY_DATA) {
            return Ok(());
        }
        self.seen += 1;
        if self.seen > self.limit {
            return Err(Error::LoopExhausted {
                operation: self.operation,
                limit: self.limit,
            });
        }
        Ok(())
    }
}
