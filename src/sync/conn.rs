//! Synchronous PostgreSQL connection.

use std::io::{BufReader, Read, Write};

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::backend::BackendKeyData;
use crate::protocol::codec::payload_len;
use crate::protocol::frontend::{write_bind, write_flush, write_parse, write_query, write_terminate};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::row::{PortalDescription, PortalResult, PreparedStatementDescription, SimpleQueryResponse};
use crate::state::connection::{ConnectionStateMachine, set_param};
use crate::state::{
    Action, AsyncMessage, ExtendedQueryStateMachine, ExtendedRequest, ExtendedResponse,
    SimpleQueryStateMachine, StateMachine,
};
use crate::value::ParameterValue;

use super::stream::Stream;

/// Read one frame into the buffer set.
fn read_message_into<R: Read>(reader: &mut R, buffer_set: &mut BufferSet) -> Result<()> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header)?;
    let len = payload_len(&header)?;

    buffer_set.type_byte = header[0];
    buffer_set.read_buffer.clear();
    buffer_set.read_buffer.resize(len, 0);
    reader.read_exact(&mut buffer_set.read_buffer)?;
    Ok(())
}

fn write_pending<S: Read + Write>(
    reader: &mut BufReader<S>,
    buffer_set: &mut BufferSet,
) -> Result<()> {
    let stream = reader.get_mut();
    stream.write_all(&buffer_set.write_buffer)?;
    stream.flush()?;
    buffer_set.write_buffer.clear();
    Ok(())
}

/// Drive a state machine to completion.
fn drive<S: Read + Write, M: StateMachine>(
    reader: &mut BufReader<S>,
    buffer_set: &mut BufferSet,
    server_params: &mut Vec<(String, String)>,
    state_machine: &mut M,
) -> Result<()> {
    loop {
        match state_machine.step(buffer_set)? {
            Action::ReadMessage => {
                read_message_into(reader, buffer_set)?;
            }
            Action::Write => {
                write_pending(reader, buffer_set)?;
            }
            Action::WriteAndReadMessage => {
                write_pending(reader, buffer_set)?;
                read_message_into(reader, buffer_set)?;
            }
            Action::HandleAsyncMessageAndReadMessage(AsyncMessage::ParameterChanged {
                name,
                value,
            }) => {
                tracing::debug!("server parameter {name} = {value}");
                set_param(server_params, &name, &value);
                read_message_into(reader, buffer_set)?;
            }
            Action::Finished => return Ok(()),
        }
    }
}

/// Synchronous PostgreSQL connection.
///
/// Generic over the transport so that any `Read + Write` byte stream can
/// carry the protocol. One request is in flight at a time.
pub struct Conn<S: Read + Write = Stream> {
    /// `None` once closed
    stream: Option<BufReader<S>>,
    buffer_set: BufferSet,
    message_limit: usize,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    is_broken: bool,
}

impl Conn<Stream> {
    /// Connect to a PostgreSQL server.
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        let stream = Stream::connect(&opts)?;
        Self::new_with_stream(stream, opts)
    }
}

impl<S: Read + Write> Conn<S> {
    /// Run the startup handshake over an existing stream.
    ///
    /// Any failure is returned as [`Error::Startup`] and the stream is dropped.
    pub fn new_with_stream(stream: S, opts: Opts) -> Result<Self> {
        let mut reader = BufReader::new(stream);
        let mut buffer_set = BufferSet::new();
        let mut state_machine = ConnectionStateMachine::new(&opts);

        let mut ignored = Vec::new();
        drive(&mut reader, &mut buffer_set, &mut ignored, &mut state_machine)
            .map_err(Error::startup)?;
        tracing::debug!("connected as {}", opts.user);

        Ok(Self {
            stream: Some(reader),
            buffer_set,
            message_limit: opts.message_limit,
            backend_key: state_machine.backend_key(),
            server_params: state_machine.take_server_params(),
            transaction_status: state_machine.transaction_status(),
            is_broken: false,
        })
    }

    /// Backend key data, needed to cancel a running query.
    pub fn backend_key(&self) -> Option<BackendKeyData> {
        self.backend_key
    }

    /// Server parameters in the order they were first reported.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Status from the most recent ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_status.in_transaction()
    }

    /// Check if the connection is broken.
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn check_usable(&self) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::ConnectionClosed);
        }
        if self.is_broken {
            return Err(Error::ConnectionBroken);
        }
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.as_ref().is_err_and(Error::is_connection_broken) {
            self.is_broken = true;
        }
        result
    }

    fn run<M: StateMachine>(&mut self, state_machine: &mut M) -> Result<()> {
        self.check_usable()?;
        let result = match self.stream.as_mut() {
            Some(reader) => drive(
                reader,
                &mut self.buffer_set,
                &mut self.server_params,
                state_machine,
            ),
            None => Err(Error::ConnectionClosed),
        };
        if result.is_ok() {
            self.transaction_status = state_machine.transaction_status();
        }
        self.track(result)
    }

    /// Write frames without reading a response.
    fn send<F: FnOnce(&mut Vec<u8>) -> Result<()>>(&mut self, write: F) -> Result<()> {
        self.check_usable()?;
        self.buffer_set.write_buffer.clear();
        write(&mut self.buffer_set.write_buffer)?;
        let result = match self.stream.as_mut() {
            Some(reader) => write_pending(reader, &mut self.buffer_set),
            None => Err(Error::ConnectionClosed),
        };
        self.track(result)
    }

    fn extended(&mut self, request: ExtendedRequest<'_>) -> Result<ExtendedResponse> {
        let mut state_machine = ExtendedQueryStateMachine::new(request, self.message_limit);
        self.run(&mut state_machine)?;
        state_machine.finish()
    }

    // === Simple Query Protocol ===

    /// Run one or more `;`-separated statements and collect one result per statement.
    ///
    /// A failing statement is reported in its entry's `error`; the call itself
    /// only fails on transport or protocol errors.
    pub fn simple_query(&mut self, sql: &str) -> Result<Vec<SimpleQueryResponse>> {
        let mut state_machine = SimpleQueryStateMachine::new(sql, self.message_limit);
        self.run(&mut state_machine)?;
        Ok(state_machine.into_results())
    }

    /// Send a Query message without reading the response.
    ///
    /// Follow with [`Conn::read_simple_query_response`].
    pub fn execute_simple_query(&mut self, sql: &str) -> Result<()> {
        self.send(|buf| {
            write_query(buf, sql);
            Ok(())
        })
    }

    /// Read the response to a Query sent with [`Conn::execute_simple_query`].
    pub fn read_simple_query_response(&mut self) -> Result<Vec<SimpleQueryResponse>> {
        let mut state_machine = SimpleQueryStateMachine::read_only(self.message_limit);
        self.run(&mut state_machine)?;
        Ok(state_machine.into_results())
    }

    // === Extended Query Protocol ===

    /// Send Parse. An empty `name` is the unnamed statement.
    ///
    /// Errors in the SQL surface from the next synced call
    /// (`execute`, `describe_*`, `close_*`).
    pub fn prepare_statement(&mut self, name: &str, sql: &str, param_types: &[Oid]) -> Result<()> {
        self.send(|buf| write_parse(buf, name, sql, param_types))
    }

    /// Send Bind for `statement` into `portal`. Every value is sent as text.
    pub fn bind(
        &mut self,
        statement: &str,
        portal: &str,
        params: &[ParameterValue],
    ) -> Result<()> {
        self.send(|buf| write_bind(buf, portal, statement, params))
    }

    /// Execute a bound portal to completion.
    pub fn execute(&mut self, portal: &str) -> Result<PortalResult> {
        self.execute_with_limit(portal, 0)
    }

    /// Execute a bound portal, fetching at most `max_rows` rows (0 = all).
    pub fn execute_with_limit(&mut self, portal: &str, max_rows: u32) -> Result<PortalResult> {
        self.extended(ExtendedRequest::Execute { portal, max_rows })
            .map(ExtendedResponse::into_portal_result)
    }

    pub fn describe_prepared_statement(
        &mut self,
        name: &str,
    ) -> Result<PreparedStatementDescription> {
        self.extended(ExtendedRequest::DescribeStatement(name))
            .map(ExtendedResponse::into_statement_description)
    }

    pub fn describe_portal(&mut self, name: &str) -> Result<PortalDescription> {
        self.extended(ExtendedRequest::DescribePortal(name))
            .map(ExtendedResponse::into_portal_description)
    }

    pub fn close_prepared_statement(&mut self, name: &str) -> Result<()> {
        self.extended(ExtendedRequest::CloseStatement(name)).map(drop)
    }

    pub fn close_portal(&mut self, name: &str) -> Result<()> {
        self.extended(ExtendedRequest::ClosePortal(name)).map(drop)
    }

    /// Send Flush, asking the server to deliver pending output.
    pub fn flush(&mut self) -> Result<()> {
        self.send(|buf| {
            write_flush(buf);
            Ok(())
        })
    }

    /// Send Terminate and release the transport.
    ///
    /// Only the first call writes anything; later calls return `Ok(())`.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut reader) = self.stream.take() else {
            return Ok(());
        };
        self.buffer_set.write_buffer.clear();
        write_terminate(&mut self.buffer_set.write_buffer);
        write_pending(&mut reader, &mut self.buffer_set)
    }

    /// Give back the transport without sending Terminate.
    pub fn into_inner(mut self) -> Option<S> {
        self.stream.take().map(BufReader::into_inner)
    }
}

impl<S: Read + Write> Drop for Conn<S> {
    fn drop(&mut self) {
        // Best effort: the server may already be gone.
        if let Err(e) = self.close() {
            tracing::debug!("Terminate on drop failed: {e}");
        }
    }
}
