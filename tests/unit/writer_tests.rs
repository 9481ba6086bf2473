//! Unit tests for outbound request records.

use serde_json::{json, Value};
use tokio::io::AsyncReadExt;

use agentbox::stream::writer::{encode_line, user_message, write_message};
use agentbox::AppError;

/// The request record has the exact shape the agent expects.
#[test]
fn user_message_has_expected_shape() {
    let message = user_message("list files", "default");
    assert_eq!(
        message,
        json!({
            "type": "user",
            "message": {"role": "user", "content": "list files"},
            "session_id": "default",
            "parent_tool_use_id": null
        })
    );
}

/// Encoded records are single compact lines ending in exactly one newline.
#[test]
fn encode_line_is_single_terminated_line() {
    let bytes = encode_line(&user_message("multi\nline prompt", "conv-1")).expect("encode");
    assert_eq!(bytes.last(), Some(&b'\n'));
    assert_eq!(
        bytes.iter().filter(|b| **b == b'\n').count(),
        1,
        "embedded newlines must be escaped"
    );

    let decoded: Value = serde_json::from_slice(&bytes).expect("line must be valid JSON");
    assert_eq!(decoded["message"]["content"], "multi\nline prompt");
}

/// `write_message` writes and flushes the full line to the sink.
#[tokio::test]
async fn write_message_writes_full_line() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    let message = user_message("hi", "default");

    let written = write_message(&mut client, &message).await.expect("write");
    drop(client);

    let mut received = Vec::new();
    server.read_to_end(&mut received).await.expect("read");
    assert_eq!(written, received.len());
    assert_eq!(received, encode_line(&message).expect("encode"));
}

/// Writing to a closed sink is a protocol error.
#[tokio::test]
async fn write_to_closed_sink_is_protocol_error() {
    let (mut client, server) = tokio::io::duplex(64);
    drop(server);

    let err = write_message(&mut client, &user_message("hi", "default"))
        .await
        .expect_err("write to a closed pipe must fail");
    assert!(matches!(err, AppError::Protocol(_)), "got {err:?}");
}
