//! Integration tests for the diagnostic sink.

use std::time::Duration;

use tokio::io::AsyncWriteExt;

use agentbox::orchestrator::diagnostics::DiagnosticSink;

const GRACE: Duration = Duration::from_secs(2);

/// Everything written before EOF is captured, in order.
#[tokio::test]
async fn captures_stream_until_eof() {
    let (mut writer, reader) = tokio::io::duplex(1024);
    let mut sink = DiagnosticSink::spawn("s1".into(), reader);

    writer.write_all(b"warning: first\n").await.expect("write");
    writer.write_all(b"error: second\n").await.expect("write");
    drop(writer);

    sink.stop(GRACE).await;
    assert!(sink.is_finished());
    assert_eq!(sink.output(), "warning: first\nerror: second\n");
}

/// Output is readable while the task is still running.
#[tokio::test]
async fn output_is_readable_while_running() {
    let (mut writer, reader) = tokio::io::duplex(1024);
    let mut sink = DiagnosticSink::spawn("s1".into(), reader);

    writer.write_all(b"partial").await.expect("write");
    let log = sink.log();
    for _ in 0..50 {
        if log.chunk_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sink.output(), "partial");
    assert!(!sink.is_finished());

    sink.stop(Duration::ZERO).await;
    assert!(sink.is_finished());
}

/// Stopping an open stream cancels the task instead of waiting for EOF.
#[tokio::test]
async fn stop_cancels_open_stream() {
    let (_writer, reader) = tokio::io::duplex(1024);
    let mut sink = DiagnosticSink::spawn("s1".into(), reader);

    tokio::time::timeout(Duration::from_secs(1), sink.stop(Duration::from_millis(50)))
        .await
        .expect("stop must not wait for EOF");
    assert!(sink.is_finished());
    assert_eq!(sink.output(), "");
}

/// Stopping twice is harmless and the log survives.
#[tokio::test]
async fn stop_is_idempotent() {
    let (mut writer, reader) = tokio::io::duplex(1024);
    let mut sink = DiagnosticSink::spawn("s1".into(), reader);
    writer.write_all(b"bye\n").await.expect("write");
    drop(writer);

    sink.stop(GRACE).await;
    sink.stop(GRACE).await;
    assert_eq!(sink.output(), "bye\n");
}

/// Invalid UTF-8 is decoded lossily.
#[tokio::test]
async fn invalid_utf8_is_decoded_lossily() {
    let (mut writer, reader) = tokio::io::duplex(1024);
    let mut sink = DiagnosticSink::spawn("s1".into(), reader);
    writer.write_all(b"bad \xFF byte").await.expect("write");
    drop(writer);

    sink.stop(GRACE).await;
    assert_eq!(sink.output(), "bad \u{FFFD} byte");
}

/// A detached sink has nothing to drain.
#[tokio::test]
async fn detached_sink_is_empty() {
    let mut sink = DiagnosticSink::detached();
    assert!(sink.is_finished());
    sink.stop(GRACE).await;
    assert_eq!(sink.output(), "");
}
