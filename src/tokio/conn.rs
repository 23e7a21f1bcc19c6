//! Asynchronous PostgreSQL connection.

use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

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

async fn read_message_into<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer_set: &mut BufferSet,
) -> Result<()> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header).await?;
    let len = payload_len(&header)?;

    buffer_set.type_byte = header[0];
    buffer_set.read_buffer.clear();
    buffer_set.read_buffer.resize(len, 0);
    reader.read_exact(&mut buffer_set.read_buffer).await?;
    Ok(())
}

async fn write_pending<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    buffer_set: &mut BufferSet,
) -> Result<()> {
    let stream = reader.get_mut();
    stream.write_all(&buffer_set.write_buffer).await?;
    stream.flush().await?;
    buffer_set.write_buffer.clear();
    Ok(())
}

/// Drive a state machine to completion.
async fn drive<S: AsyncRead + AsyncWrite + Unpin, M: StateMachine>(
    reader: &mut BufReader<S>,
    buffer_set: &mut BufferSet,
    server_params: &mut Vec<(String, String)>,
    state_machine: &mut M,
) -> Result<()> {
    loop {
        match state_machine.step(buffer_set)? {
            Action::ReadMessage => {
                read_message_into(reader, buffer_set).await?;
            }
            Action::Write => {
                write_pending(reader, buffer_set).await?;
            }
            Action::WriteAndReadMessage => {
                write_pending(reader, buffer_set).await?;
                read_message_into(reader, buffer_set).await?;
            }
            Action::HandleAsyncMessageAndReadMessage(AsyncMessage::ParameterChanged {
                name,
                value,
            }) => {
                tracing::debug!("server parameter {name} = {value}");
                set_param(server_params, &name, &value);
                read_message_into(reader, buffer_set).await?;
            }
            Action::Finished => return Ok(()),
        }
    }
}

/// Asynchronous PostgreSQL connection.
///
/// Methods take `&mut self`: a connection carries one request at a time.
/// Share it between tasks behind a mutex or give it to a single owner task.
pub struct Conn<S: AsyncRead + AsyncWrite + Unpin = Stream> {
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
    pub async fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        let stream = Stream::connect(&opts).await?;
        Self::new_with_stream(stream, opts).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Conn<S> {
    /// Run the startup handshake over an existing stream.
    ///
    /// Any failure is returned as [`Error::Startup`] and the stream is dropped.
    pub async fn new_with_stream(stream: S, opts: Opts) -> Result<Self> {
        let mut reader = BufReader::new(stream);
        let mut buffer_set = BufferSet::new();
        let mut state_machine = ConnectionStateMachine::new(&opts);

        let mut ignored = Vec::new();
        drive(&mut reader, &mut buffer_set, &mut ignored, &mut state_machine)
            .await
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

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_status.in_transaction()
    }

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

    async fn run<M: StateMachine>(&mut self, state_machine: &mut M) -> Result<()> {
        self.check_usable()?;
        let result = match self.stream.as_mut() {
            Some(reader) => {
                drive(
                    reader,
                    &mut self.buffer_set,
                    &mut self.server_params,
                    state_machine,
                )
                .await
            }
            None => Err(Error::ConnectionClosed),
        };
        if result.is_ok() {
            self.transaction_status = state_machine.transaction_status();
        }
        self.track(result)
    }

    async fn send<F: FnOnce(&mut Vec<u8>) -> Result<()>>(&mut self, write: F) -> Result<()> {
        self.check_usable()?;
        self.buffer_set.write_buffer.clear();
        write(&mut self.buffer_set.write_buffer)?;
        let result = match self.stream.as_mut() {
            Some(reader) => write_pending(reader, &mut self.buffer_set).await,
            None => Err(Error::ConnectionClosed),
        };
        self.track(result)
    }

    async fn extended(&mut self, request: ExtendedRequest<'_>) -> Result<ExtendedResponse> {
        let mut state_machine = ExtendedQueryStateMachine::new(request, self.message_limit);
        self.run(&mut state_machine).await?;
        state_machine.finish()
    }

    /// Run one or more `;`-separated statements and collect one result per statement.
    pub async fn simple_query(&mut self, sql: &str) -> Result<Vec<SimpleQueryResponse>> {
        let mut state_machine = SimpleQueryStateMachine::new(sql, self.message_limit);
        self.run(&mut state_machine).await?;
        Ok(state_machine.into_results())
    }

    /// Send a Query message without reading the response.
    pub async fn execute_simple_query(&mut self, sql: &str) -> Result<()> {
        self.send(|buf| {
            write_query(buf, sql);
            Ok(())
        })
        .await
    }

    /// Read the response to a Query sent with [`Conn::execute_simple_query`].
    pub async fn read_simple_query_response(&mut self) -> Result<Vec<SimpleQueryResponse>> {
        let mut state_machine = SimpleQueryStateMachine::read_only(self.message_limit);
        self.run(&mut state_machine).await?;
        Ok(state_machine.into_results())
    }

    /// Send Parse. Errors surface from the next synced call.
    pub async fn prepare_statement(
        &mut self,
        name: &str,
        sql: &str,
        param_types: &[Oid],
    ) -> Result<()> {
        self.send(|buf| write_parse(buf, name, sql, param_types)).await
    }

    /// Send Bind for `statement` into `portal`.
    pub async fn bind(
        &mut self,
        statement: &str,
        portal: &str,
        params: &[ParameterValue],
    ) -> Result<()> {
        self.send(|buf| write_bind(buf, portal, statement, params)).await
    }

    pub async fn execute(&mut self, portal: &str) -> Result<PortalResult> {
        self.execute_with_limit(portal, 0).await
    }

    /// Execute a bound portal, fetching at most `max_rows` rows (0 = all).
    pub async fn execute_with_limit(
        &mut self,
        portal: &str,
        max_rows: u32,
    ) -> Result<PortalResult> {
        self.extended(ExtendedRequest::Execute { portal, max_rows })
            .await
            .map(ExtendedResponse::into_portal_result)
    }

    pub async fn describe_prepared_statement(
        &mut self,
        name: &str,
    ) -> Result<PreparedStatementDescription> {
        self.extended(ExtendedRequest::DescribeStatement(name))
            .await
            .map(ExtendedResponse::into_statement_description)
    }

    pub async fn describe_portal(&mut self, name: &str) -> Result<PortalDescription> {
        self.extended(ExtendedRequest::DescribePortal(name))
            .await
            .map(ExtendedResponse::into_portal_description)
    }

    pub async fn close_prepared_statement(&mut self, name: &str) -> Result<()> {
        self.extended(ExtendedRequest::CloseStatement(name))
            .await
            .map(drop)
    }

    pub async fn close_portal(&mut self, name: &str) -> Result<()> {
        self.extended(ExtendedRequest::ClosePortal(name))
            .await
            .map(drop)
    }

    /// Send Flush.
    pub async fn flush(&mut self) -> Result<()> {
        self.send(|buf| {
            write_flush(buf);
            Ok(())
        })
        .await
    }

    /// Send Terminate and release the transport. Later calls return `Ok(())`.
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut reader) = self.stream.take() else {
            return Ok(());
        };
        self.buffer_set.write_buffer.clear();
        write_terminate(&mut self.buffer_set.write_buffer);
        write_pending(&mut reader, &mut self.buffer_set).await
    }

    /// Give back the transport without sending Terminate.
    pub fn into_inner(mut self) -> Option<S> {
        self.stream.take().map(BufReader::into_inner)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Drop for Conn<S> {
    /// Offers Terminate to the transport once without waiting. A write that
    /// would block is abandoned; call [`Conn::close`] for a guaranteed send.
    fn drop(&mut self) {
        let Some(mut reader) = self.stream.take() else {
            return;
        };
        self.buffer_set.write_buffer.clear();
        write_terminate(&mut self.buffer_set.write_buffer);

        let mut cx = Context::from_waker(Waker::noop());
        let stream = Pin::new(reader.get_mut());
        match stream.poll_write(&mut cx, &self.buffer_set.write_buffer) {
            Poll::Ready(Ok(n)) if n == self.buffer_set.write_buffer.len() => {}
            Poll::Ready(Ok(n)) => tracing::debug!("Terminate on drop cut short after {n} bytes"),
            Poll::Ready(Err(e)) => tracing::debug!("Terminate on drop failed: {e}"),
            Poll::Pending => tracing::debug!("Terminate on drop would block; skipped"),
        }
    }
}
