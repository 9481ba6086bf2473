//! Unit tests for inbound record classification.

use serde_json::json;

use agentbox::stream::dispatcher::{classify, parse_line, ContentBlock, Frame, TerminalResult};

// ── Record kinds ────────────────────────────────────────────────────────────

/// Assistant records keep their text and tool-use blocks in order.
#[test]
fn assistant_record_yields_ordered_blocks() {
    let frame = parse_line(
        "s1",
        r#"{"type":"assistant","session_id":"conv-1","message":{"role":"assistant","content":[
            {"type":"text","text":"Listing files."},
            {"type":"tool_use","id":"tu_1","name":"Bash","input":{"command":"ls"}},
            {"type":"text","text":"Done."}
        ]}}"#,
    )
    .expect("valid record must classify");

    let Frame::Assistant { blocks, session_id } = &frame else {
        panic!("expected assistant frame, got {frame:?}");
    };
    assert_eq!(session_id.as_deref(), Some("conv-1"));
    assert_eq!(
        blocks,
        &vec![
            ContentBlock::Text {
                text: "Listing files.".into()
            },
            ContentBlock::ToolUse {
                id: Some("tu_1".into()),
                name: "Bash".into(),
                input: json!({"command": "ls"}),
            },
            ContentBlock::Text {
                text: "Done.".into()
            },
        ]
    );
    assert_eq!(frame.text(), "Listing files.Done.");
    assert!(!frame.is_terminal());
}

/// User echoes carry tool results, including the error flag.
#[test]
fn user_echo_carries_tool_results() {
    let frame = classify(&json!({
        "type": "user",
        "message": {"role": "user", "content": [
            {"type": "tool_result", "tool_use_id": "tu_1", "is_error": true, "content": "permission denied"}
        ]}
    }));

    assert_eq!(
        frame,
        Frame::UserEcho {
            blocks: vec![ContentBlock::ToolResult {
                tool_use_id: Some("tu_1".into()),
                is_error: true,
                content: json!("permission denied"),
            }],
            session_id: None,
        }
    );
}

/// Result records become terminal frames with cost and duration.
#[test]
fn result_record_is_terminal() {
    let frame = classify(&json!({
        "type": "result",
        "subtype": "success",
        "result": "done",
        "is_error": false,
        "total_cost_usd": 0.0123,
        "duration_ms": 4500,
        "session_id": "conv-9"
    }));

    assert!(frame.is_terminal());
    assert_eq!(frame.conversation_id(), Some("conv-9"));
    assert_eq!(
        frame,
        Frame::Result(TerminalResult {
            result: "done".into(),
            is_error: false,
            total_cost_usd: 0.0123,
            duration_ms: 4500,
            session_id: Some("conv-9".into()),
        })
    );
}

/// Missing result fields default instead of failing classification.
#[test]
fn result_record_with_missing_fields_uses_defaults() {
    let frame = classify(&json!({"type": "result", "is_error": "not-a-bool"}));
    assert_eq!(frame, Frame::Result(TerminalResult::default()));
}

/// A mistyped field loses only itself; the error flag and text survive.
#[test]
fn result_record_with_mistyped_cost_keeps_other_fields() {
    let frame = classify(&json!({
        "type": "result",
        "result": "bad args",
        "is_error": true,
        "total_cost_usd": "n/a",
        "duration_ms": 120
    }));
    assert_eq!(
        frame,
        Frame::Result(TerminalResult {
            result: "bad args".into(),
            is_error: true,
            total_cost_usd: 0.0,
            duration_ms: 120,
            session_id: None,
        })
    );
}

/// System records expose their subtype and conversation id.
#[test]
fn system_record_is_classified() {
    let frame = classify(&json!({"type": "system", "subtype": "init", "session_id": "conv-2"}));
    assert_eq!(
        frame,
        Frame::System {
            subtype: Some("init".into()),
            session_id: Some("conv-2".into()),
        }
    );
}

/// Unknown and missing `type` values are surfaced as unrecognized, not errors.
#[test]
fn unknown_records_are_unrecognized() {
    assert_eq!(
        classify(&json!({"type": "stream_event"})),
        Frame::Unrecognized {
            kind: Some("stream_event".into()),
            session_id: None,
        }
    );
    assert_eq!(
        classify(&json!({"hello": "world"})),
        Frame::Unrecognized {
            kind: None,
            session_id: None,
        }
    );
}

// ── Defensive parsing ───────────────────────────────────────────────────────

/// Malformed JSON is dropped without panicking.
#[test]
fn malformed_json_returns_none() {
    assert!(parse_line("s1", "{\"type\":\"assistant\"").is_none());
    assert!(parse_line("s1", "not json at all").is_none());
    assert!(parse_line("s1", "   ").is_none());
}

/// Unknown block types are kept as `Other` so block order is preserved.
#[test]
fn unknown_block_types_become_other() {
    let frame = classify(&json!({
        "type": "assistant",
        "message": {"content": [
            {"type": "thinking", "thinking": "hmm"},
            {"type": "text", "text": "hi"},
            {"no_type": true}
        ]}
    }));
    assert_eq!(
        frame.blocks(),
        &[
            ContentBlock::Other {
                kind: "thinking".into()
            },
            ContentBlock::Text { text: "hi".into() },
            ContentBlock::Other { kind: String::new() },
        ]
    );
}

/// A plain-string `content` is read as a single text block.
#[test]
fn string_content_is_one_text_block() {
    let frame = classify(&json!({"type": "assistant", "message": {"content": "hello"}}));
    assert_eq!(frame.text(), "hello");
}

/// Records without a message body have no blocks.
#[test]
fn missing_message_yields_no_blocks() {
    let frame = classify(&json!({"type": "assistant"}));
    assert!(frame.blocks().is_empty());
}

/// Empty conversation ids are treated as absent.
#[test]
fn empty_session_id_is_ignored() {
    let frame = classify(&json!({"type": "assistant", "session_id": ""}));
    assert_eq!(frame.conversation_id(), None);
}

/// A structured result payload is rendered as compact JSON text.
#[test]
fn structured_result_is_rendered_as_json() {
    let frame = classify(&json!({"type": "result", "result": {"files": 3}}));
    let Frame::Result(result) = frame else {
        panic!("expected result frame");
    };
    assert_eq!(result.result, r#"{"files":3}"#);
}
