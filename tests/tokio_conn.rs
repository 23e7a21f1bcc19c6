//! `tokio::Conn` against the in-memory backend.

mod common;

use common::*;
use wirepg::protocol::types::oid;
use wirepg::tokio::Conn;
use wirepg::{Error, Opts, ParameterValue, TransactionStatus};

fn opts(password: Option<&str>) -> Opts {
    Opts {
        user: "alice".into(),
        database: Some("shop".into()),
        password: password.map(Into::into),
        ..Opts::default()
    }
}

#[tokio::test]
async fn scram_startup() {
    let backend = MockBackend::new(Auth::Scram("pencil"), |_, _| Vec::new());
    let conn = Conn::new_with_stream(backend, opts(Some("pencil")))
        .await
        .unwrap();
    assert_eq!(conn.server_param("server_version"), Some("16.3"));
    assert_eq!(conn.backend_key().unwrap().process_id(), 42);
    assert!(!conn.in_transaction());
}

#[tokio::test]
async fn startup_failure_is_wrapped() {
    let backend = MockBackend::new(Auth::Md5("s3cret"), |_, _| Vec::new());
    let err = Conn::new_with_stream(backend, opts(Some("wrong")))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::Startup(_)));
    assert_eq!(err.sqlstate(), Some("28P01"));
}

#[tokio::test]
async fn simple_query_with_error_and_nulls() {
    let backend = MockBackend::new(Auth::Trust, |_, _| {
        let mut out = row_description(&["a", "b"]);
        out.extend(data_row(&[Some(""), None]));
        out.extend(command_complete("SELECT 1"));
        out.extend(error("ERROR", "42P01", "relation \"nope\" does not exist"));
        out.extend(ready(b'I'));
        out
    });
    let mut conn = Conn::new_with_stream(backend, opts(None)).await.unwrap();

    let responses = conn
        .simple_query("select '' as a, null as b; select * from nope")
        .await
        .unwrap();
    assert_eq!(responses.len(), 2);

    let row = &responses[0].rows[0];
    assert_eq!(row.get("a"), Some(""));
    assert_eq!(row.get("b"), None);
    assert!(responses[1].is_error());
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
}

#[tokio::test]
async fn extended_query_and_suspend() {
    let backend = MockBackend::new(Auth::Trust, |type_byte, payload| match type_byte {
        b'P' => frame(b'1', b""),
        b'B' => frame(b'2', b""),
        b'E' => {
            // portal name, then max_rows
            assert_eq!(&payload[payload.len() - 4..], &1u32.to_be_bytes());
            let mut out = data_row(&[Some("1")]);
            out.extend(frame(b's', b""));
            out
        }
        b'S' => ready(b'T'),
        _ => Vec::new(),
    });
    let mut conn = Conn::new_with_stream(backend, opts(None)).await.unwrap();

    conn.prepare_statement("", "select generate_series(1, $1)", &[oid::INT4])
        .await
        .unwrap();
    conn.bind("", "", &[ParameterValue::Integer(3)])
        .await
        .unwrap();
    let result = conn.execute_with_limit("", 1).await.unwrap();

    assert_eq!(result.rows, vec![vec![Some("1".to_string())]]);
    assert!(result.suspended);
    assert_eq!(result.command_tag, None);
    assert!(conn.in_transaction());
}

#[tokio::test]
async fn describe_statement() {
    let backend = MockBackend::new(Auth::Trust, extended_responder(Vec::new()));
    let mut conn = Conn::new_with_stream(backend, opts(None)).await.unwrap();

    conn.prepare_statement("s1", "select 1", &[]).await.unwrap();
    let description = conn.describe_prepared_statement("s1").await.unwrap();
    assert_eq!(description.parameters.len(), 2);
    assert_eq!(description.columns[1].name, "table_type");
    conn.close_prepared_statement("s1").await.unwrap();
}

#[tokio::test]
async fn close_then_use() {
    let backend = MockBackend::trust();
    let log = backend.log();
    let mut conn = Conn::new_with_stream(backend, opts(None)).await.unwrap();

    conn.close().await.unwrap();
    conn.close().await.unwrap();
    assert_eq!(sent_types(&log), vec![b'X']);
    assert!(matches!(
        conn.execute("").await,
        Err(Error::ConnectionClosed)
    ));
}

#[tokio::test]
async fn drop_sends_terminate() {
    let backend = MockBackend::trust();
    let log = backend.log();
    let conn = Conn::new_with_stream(backend, opts(None)).await.unwrap();

    drop(conn);
    assert_eq!(sent_types(&log), vec![b'X']);
}

#[tokio::test]
async fn truncated_stream_breaks_connection() {
    let backend = MockBackend::new(Auth::Trust, |_, _| {
        let mut out = command_complete("SELECT 0");
        out.truncate(3);
        out
    });
    let mut conn = Conn::new_with_stream(backend, opts(None)).await.unwrap();

    assert!(matches!(
        conn.simple_query("select").await,
        Err(Error::Io(_))
    ));
    assert!(conn.is_broken());
}
