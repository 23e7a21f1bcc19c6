//! Simple query protocol state machine.

use std::sync::Arc;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::protocol::backend::{
    CommandComplete, CopyResponse, DataRow, ErrorResponse, NoticeResponse, ParameterStatus,
    ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::frontend::{write_copy_fail, write_query};
use crate::protocol::types::TransactionStatus;
use crate::row::{SimpleQueryResponse, TextRow};

use super::{Action, AsyncMessage, MessageBudget, StateMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State<'a> {
    /// Query not yet written
    Send(&'a str),
    /// Query already written by the caller
    Start,
    Reading,
    Finished,
}

/// Reads one simple query response, splitting it into one
/// [`SimpleQueryResponse`] per statement.
///
/// A statement ends at CommandComplete or ErrorResponse. The response as a
/// whole ends at ReadyForQuery.
pub struct SimpleQueryStateMachine<'a> {
    state: State<'a>,
    budget: MessageBudget,
    current: SimpleQueryResponse,
    names: Arc<[String]>,
    results: Vec<SimpleQueryResponse>,
    transaction_status: TransactionStatus,
}

impl<'a> SimpleQueryStateMachine<'a> {
    /// Send `query`, then read its response.
    pub fn new(query: &'a str, message_limit: usize) -> Self {
        Self::with_state(State::Send(query), message_limit)
    }

    /// Read the response to a Query that was already sent.
    pub fn read_only(message_limit: usize) -> Self {
        Self::with_state(State::Start, message_limit)
    }

    fn with_state(state: State<'a>, message_limit: usize) -> Self {
        Self {
            state,
            budget: MessageBudget::new("simple query", message_limit),
            current: SimpleQueryResponse::default(),
            names: Vec::new().into(),
            results: Vec::new(),
            transaction_status: TransactionStatus::Idle,
        }
    }

    /// Per-statement results, in statement order.
    pub fn into_results(self) -> Vec<SimpleQueryResponse> {
        self.results
    }

    fn finish_statement(&mut self) {
        self.names = Vec::new().into();
        self.results.push(std::mem::take(&mut self.current));
    }

    fn handle(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;
        self.budget.count(type_byte)?;
        let payload = &buffer_set.read_buffer;

        match type_byte {
            msg_type::ROW_DESCRIPTION => {
                let desc = RowDescription::parse(payload)?;
                self.names = desc
                    .columns
                    .iter()
                    .map(|c| c.name.clone())
                    .collect::<Vec<_>>()
                    .into();
                self.current.columns = desc.columns;
            }
            msg_type::DATA_ROW => {
                let values = DataRow::parse(payload)?.text_values()?;
                if values.len() != self.names.len() {
                    return Err(Error::Protocol(format!(
                        "DataRow has {} values but RowDescription announced {} columns",
                        values.len(),
                        self.names.len()
                    )));
                }
                self.current
                    .rows
                    .push(TextRow::new(Arc::clone(&self.names), values));
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                self.current.command_tag = complete.tag.to_string();
                self.finish_statement();
            }
            msg_type::ERROR_RESPONSE => {
                let error = ErrorResponse::parse(payload)?;
                tracing::debug!("statement failed: {}", error.0);
                self.current.error = Some(error.0);
                self.finish_statement();
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                tracing::debug!("empty query");
            }
            msg_type::NOTICE_RESPONSE => {
                let notice = NoticeResponse::parse(payload)?;
                self.current.notices.push(notice.0);
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
            msg_type::COPY_IN_RESPONSE => {
                let copy = CopyResponse::parse(payload)?;
                tracing::debug!(
                    "COPY FROM STDIN ({:?}, {} columns) is not supported; aborting",
                    copy.format,
                    copy.columns
                );
                buffer_set.write_buffer.clear();
                write_copy_fail(
                    &mut buffer_set.write_buffer,
                    "COPY FROM STDIN is not supported by this client",
                );
                return Ok(Action::WriteAndReadMessage);
            }
            msg_type::COPY_OUT_RESPONSE => {
                let copy = CopyResponse::parse(payload)?;
                tracing::debug!(
                    "skipping COPY TO STDOUT output ({:?}, {} columns)",
                    copy.format,
                    copy.columns
                );
            }
            msg_type::COPY_DATA | msg_type::COPY_DONE => {}
            msg_type::READY_FOR_QUERY => {
                self.transaction_status = ReadyForQuery::parse(payload)?.transaction_status()?;
                if !self.current.notices.is_empty() {
                    tracing::warn!(
                        "dropping {} notice(s) received after the last statement",
                        self.current.notices.len()
                    );
                }
                self.current = SimpleQueryResponse::default();
                self.state = State::Finished;
                return Ok(Action::Finished);
            }
            other => {
                tracing::debug!("skipping message '{}' in simple query", other as char);
            }
        }
        Ok(Action::ReadMessage)
    }
}

impl StateMachine for SimpleQueryStateMachine<'_> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Send(query) => {
                buffer_set.write_buffer.clear();
                write_query(&mut buffer_set.write_buffer, query);
                self.state = State::Reading;
                Ok(Action::WriteAndReadMessage)
            }
            State::Start => {
                self.state = State::Reading;
                Ok(Action::ReadMessage)
            }
            State::Reading => self.handle(buffer_set),
            State::Finished => Err(Error::Protocol(
                "simple query response already complete".into(),
            )),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::{
        command_complete, data_row, error, frame, notice, ready, row_description, run,
    };

    fn results(frames: Vec<(u8, Vec<u8>)>) -> Vec<SimpleQueryResponse> {
        let mut machine = SimpleQueryStateMachine::read_only(100);
        let (written, result) = run(&mut machine, frames);
        result.unwrap();
        assert!(written.is_empty());
        machine.into_results()
    }

    #[test]
    fn test_writes_query_first() {
        let mut machine = SimpleQueryStateMachine::new("select 1", 100);
        let (written, result) = run(&mut machine, vec![ready(b'I')]);
        result.unwrap();
        assert_eq!(written, frame(b'Q', b"select 1\0"));
    }

    #[test]
    fn test_one_entry_per_statement() {
        let responses = results(vec![
            command_complete("CREATE TABLE"),
            command_complete("INSERT 0 2"),
            row_description(&["id", "name"]),
            data_row(&[Some("1"), Some("a")]),
            data_row(&[Some("2"), None]),
            command_complete("SELECT 2"),
            ready(b'I'),
        ]);

        let tags: Vec<&str> = responses.iter().map(|r| r.command_tag.as_str()).collect();
        assert_eq!(tags, ["CREATE TABLE", "INSERT 0 2", "SELECT 2"]);
        assert!(responses[0].rows.is_empty());
        assert_eq!(responses[1].rows_affected(), Some(2));

        let select = &responses[2];
        assert_eq!(select.columns.len(), 2);
        assert_eq!(select.rows[0].get("name"), Some("a"));
        assert_eq!(select.rows[1].get("name"), None);
        assert_eq!(
            select.rows[1].iter().collect::<Vec<_>>(),
            vec![("id", Some("2")), ("name", None)]
        );
    }

    #[test]
    fn test_failed_statement_carries_error() {
        let responses = results(vec![
            command_complete("INSERT 0 1"),
            error("ERROR", "22012", "division by zero"),
            ready(b'E'),
        ]);

        assert_eq!(responses.len(), 2);
        assert!(responses[0].error.is_none());
        let failed = responses[1].error.as_ref().unwrap();
        assert_eq!(failed.code.as_deref(), Some("22012"));
        assert_eq!(responses[1].command_tag, "");
    }

    #[test]
    fn test_notices_attach_to_running_statement() {
        let responses = results(vec![
            notice("first"),
            command_complete("DO"),
            command_complete("SELECT 0"),
            notice("late"),
            ready(b'I'),
        ]);

        assert_eq!(responses[0].notices.len(), 1);
        assert_eq!(responses[0].notices[0].message.as_deref(), Some("first"));
        assert!(responses[1].notices.is_empty());
    }

    #[test]
    fn test_transaction_status_recorded() {
        let mut machine = SimpleQueryStateMachine::read_only(100);
        let (_, result) = run(&mut machine, vec![command_complete("BEGIN"), ready(b'T')]);
        result.unwrap();
        assert_eq!(machine.transaction_status(), TransactionStatus::InTransaction);
    }

    #[test]
    fn test_empty_query_has_no_entry() {
        let responses = results(vec![(b'I', Vec::new()), ready(b'I')]);
        assert!(responses.is_empty());
    }

    #[test]
    fn test_unknown_messages_are_skipped() {
        let responses = results(vec![
            (b'A', b"\0\0\0\x01chan\0payload\0".to_vec()),
            (b'H', vec![0, 0, 1, 0, 0]),
            (b'd', b"1\n".to_vec()),
            (b'c', Vec::new()),
            command_complete("COPY 1"),
            ready(b'I'),
        ]);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].command_tag, "COPY 1");
    }

    #[test]
    fn test_copy_in_is_refused() {
        let mut machine = SimpleQueryStateMachine::read_only(100);
        let (written, result) = run(
            &mut machine,
            vec![
                (b'G', vec![0, 0, 1, 0, 0]),
                error("ERROR", "57014", "COPY from stdin failed"),
                ready(b'I'),
            ],
        );
        result.unwrap();
        assert_eq!(written[0], b'f');
        assert_eq!(machine.into_results().len(), 1);
    }

    #[test]
    fn test_parameter_status_is_async() {
        let mut machine = SimpleQueryStateMachine::read_only(100);
        let mut buffer_set = BufferSet::new();
        assert_eq!(machine.step(&mut buffer_set).unwrap(), Action::ReadMessage);

        crate::state::testing::feed(&mut buffer_set, b'S', b"TimeZone\0UTC\0");
        assert_eq!(
            machine.step(&mut buffer_set).unwrap(),
            Action::HandleAsyncMessageAndReadMessage(AsyncMessage::ParameterChanged {
                name: "TimeZone".into(),
                value: "UTC".into(),
            })
        );
    }

    #[test]
    fn test_column_count_mismatch() {
        let mut machine = SimpleQueryStateMachine::read_only(100);
        let (_, result) = run(
            &mut machine,
            vec![row_description(&["a"]), data_row(&[Some("1"), Some("2")])],
        );
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_read_loop_is_bounded() {
        let mut machine = SimpleQueryStateMachine::read_only(2);
        let (_, result) = run(
            &mut machine,
            vec![notice("a"), notice("b"), notice("c"), ready(b'I')],
        );
        assert!(matches!(
            result,
            Err(Error::LoopExhausted {
                operation: "simple query",
                limit: 2
            })
        ));
    }

    #[test]
    fn test_data_rows_do_not_count() {
        let mut frames = vec![row_description(&["n"])];
        frames.extend((0..50).map(|_| data_row(&[Some("1")])));
        frames.push(command_complete("SELECT 50"));
        frames.push(ready(b'I'));

        let mut machine = SimpleQueryStateMachine::read_only(3);
        let (_, result) = run(&mut machine, frames);
        result.unwrap();
        assert_eq!(machine.into_results()[0].rows.len(), 50);
    }

    #[test]
    fn test_copy_out_data_does_not_count() {
        let mut frames = vec![(b'H', vec![0, 0, 1, 0, 0])];
        frames.extend((0..20).map(|_| (b'd', b"x\n".to_vec())));
        frames.push((b'c', Vec::new()));
        frames.push(command_complete("COPY 20"));
        frames.push(ready(b'I'));

        let mut machine = SimpleQueryStateMachine::read_only(10);
        let (_, result) = run(&mut machine, frames);
        result.unwrap();
        let responses = machine.into_results();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].command_tag, "COPY 20");
    }
}
