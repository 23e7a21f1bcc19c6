//! Extended query protocol state machine.
//!
//! Parse and Bind are written by the driver without waiting for a reply.
//! Their ParseComplete/BindComplete (or the ErrorResponse that replaces
//! them) arrive in front of the response to the next synced request, which
//! this machine reads up to ReadyForQuery.

use crate::buffer_set::BufferSet;
use crate::error::{Error, ErrorFields, Result};
use crate::protocol::backend::{
    ColumnDescriptor, CommandComplete, DataRow, ErrorResponse, NoticeResponse,
    ParameterDescription, ParameterStatus, ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::frontend::{
    write_close_portal, write_close_statement, write_describe_portal, write_describe_statement,
    write_execute, write_sync,
};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::row::{PortalDescription, PortalResult, PreparedStatementDescription};

use super::{Action, AsyncMessage, MessageBudget, StateMachine};

/// A request that ends with Sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedRequest<'a> {
    /// Execute a bound portal. `max_rows == 0` fetches every row.
    Execute { portal: &'a str, max_rows: u32 },
    DescribeStatement(&'a str),
    DescribePortal(&'a str),
    CloseStatement(&'a str),
    ClosePortal(&'a str),
}

impl ExtendedRequest<'_> {
    fn operation(&self) -> &'static str {
        match self {
            Self::Execute { .. } => "execute",
            Self::DescribeStatement(_) => "describe statement",
            Self::DescribePortal(_) => "describe portal",
            Self::CloseStatement(_) => "close statement",
            Self::ClosePortal(_) => "close portal",
        }
    }

    fn write(&self, buf: &mut Vec<u8>) {
        match *self {
            Self::Execute { portal, max_rows } => write_execute(buf, portal, max_rows),
            Self::DescribeStatement(name) => write_describe_statement(buf, name),
            Self::DescribePortal(name) => write_describe_portal(buf, name),
            Self::CloseStatement(name) => write_close_statement(buf, name),
            Self::ClosePortal(name) => write_close_portal(buf, name),
        }
        write_sync(buf);
    }
}

/// Everything received up to ReadyForQuery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedResponse {
    /// From ParameterDescription
    pub parameters: Vec<Oid>,
    /// From RowDescription; empty after NoData
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Option<String>>>,
    pub command_tag: Option<String>,
    /// PortalSuspended was received
    pub suspended: bool,
    pub notices: Vec<ErrorFields>,
}

impl ExtendedResponse {
    pub fn into_portal_result(self) -> PortalResult {
        PortalResult {
            rows: self.rows,
            command_tag: self.command_tag,
            notices: self.notices,
            suspended: self.suspended,
        }
    }

    pub fn into_statement_description(self) -> PreparedStatementDescription {
        PreparedStatementDescription {
            parameters: self.parameters,
            columns: self.columns,
            notices: self.notices,
        }
    }

    pub fn into_portal_description(self) -> PortalDescription {
        PortalDescription {
            columns: self.columns,
            notices: self.notices,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Reading,
    Finished,
}

/// Extended query state machine.
pub struct ExtendedQueryStateMachine<'a> {
    state: State,
    request: ExtendedRequest<'a>,
    budget: MessageBudget,
    response: ExtendedResponse,
    error: Option<ErrorFields>,
    transaction_status: TransactionStatus,
}

impl<'a> ExtendedQueryStateMachine<'a> {
    pub fn new(request: ExtendedRequest<'a>, message_limit: usize) -> Self {
        Self {
            state: State::Initial,
            budget: MessageBudget::new(request.operation(), message_limit),
            request,
            response: ExtendedResponse::default(),
            error: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// The collected response, or the first server error seen.
    ///
    /// The error is only reported once ReadyForQuery has been read, so the
    /// connection is back in sync either way.
    pub fn finish(self) -> Result<ExtendedResponse> {
        match self.error {
            Some(fields) => Err(Error::Server(fields)),
            None => Ok(self.response),
        }
    }

    fn handle(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        self.budget.count(type_byte)?;
        let payload = &buffer_set.read_buffer;

        match type_byte {
            msg_type::ERROR_RESPONSE => {
                let error = ErrorResponse::parse(payload)?;
                tracing::debug!("{} failed: {}", self.request.operation(), error.0);
                // The server skips everything up to Sync, so only one error arrives
                if self.error.is_none() {
                    self.error = Some(error.0);
                }
            }
            msg_type::NOTICE_RESPONSE => {
                self.response
                    .notices
                    .push(NoticeResponse::parse(payload)?.0);
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(payload)?;
                return Ok(Action::HandleAsyncMessageAndReadMessage(
                    AsyncMessage::ParameterChanged {
                        name: param.name.to_string(),
                        value: param.value.to_string(),
                    },
                ));
            }
            msg_type::PARSE_COMPLETE | msg_type::BIND_COMPLETE | msg_type::CLOSE_COMPLETE => {}
            msg_type::PARAMETER_DESCRIPTION => {
                self.response.parameters = ParameterDescription::parse(payload)?.oids;
            }
            msg_type::ROW_DESCRIPTION => {
                self.response.columns = RowDescription::parse(payload)?.columns;
            }
            msg_type::NO_DATA => {
                self.response.columns.clear();
            }
            msg_type::DATA_ROW => {
                self.response
                    .rows
                    .push(DataRow::parse(payload)?.text_values()?);
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                self.response.command_tag = Some(complete.tag.to_string());
            }
            msg_type::PORTAL_SUSPENDED => {
                self.response.suspended = true;
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                tracing::debug!("portal holds an empty query");
            }
            msg_type::READY_FOR_QUERY => {
                self.transaction_status = ReadyForQuery::parse(payload)?.transaction_status()?;
                self.state = State::Finished;
                return Ok(Action::Finished);
            }
            other => {
                tracing::debug!(
                    "skipping message '{}' in {}",
                    other as char,
                    self.request.operation()
                );
            }
        }
        Ok(Action::ReadMessage)
    }
}

impl StateMachine for ExtendedQueryStateMachine<'_> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial => {
                buffer_set.write_buffer.clear();
                self.request.write(&mut buffer_set.write_buffer);
                self.state = State::Reading;
                Ok(Action::WriteAndReadMessage)
            }
            State::Reading => self.handle(buffer_set),
            State::Finished => Err(Error::Protocol(format!(
                "{} response already complete",
                self.request.operation()
            ))),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}
