//! Contract tests for the stream-json wire format.
//!
//! Verify that outbound requests are byte-exact and that a transcript in the
//! shape the agent CLI emits classifies into the expected frame sequence.

use agentbox::stream::codec::FrameDecoder;
use agentbox::stream::dispatcher::{parse_line, ContentBlock, Frame};
use agentbox::stream::writer::{encode_line, user_message};

const TRANSCRIPT: &str = concat!(
    r#"{"type":"system","subtype":"init","cwd":"/workspace","session_id":"9f1c","tools":["Bash","Read"],"model":"claude"}"#,
    "\n",
    r#"{"type":"assistant","message":{"id":"msg_1","type":"message","role":"assistant","content":[{"type":"text","text":"I'll list the files."},{"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"ls -la"}}]},"parent_tool_use_id":null,"session_id":"9f1c"}"#,
    "\n",
    r#"{"type":"user","message":{"role":"user","content":[{"tool_use_id":"toolu_1","type":"tool_result","content":"README.md\nsrc","is_error":false}]},"parent_tool_use_id":null,"session_id":"9f1c"}"#,
    "\n",
    r#"{"type":"assistant","message":{"id":"msg_2","type":"message","role":"assistant","content":[{"type":"text","text":"done"}]},"parent_tool_use_id":null,"session_id":"9f1c"}"#,
    "\n",
    r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":5321,"duration_api_ms":4100,"num_turns":2,"result":"done","session_id":"9f1c","total_cost_usd":0.0187,"usage":{"input_tokens":12,"output_tokens":40}}"#,
    "\n",
);

#[test]
fn outbound_request_is_byte_exact() {
    let bytes = encode_line(&user_message("list files", "default")).expect("encode");
    assert_eq!(
        String::from_utf8(bytes).expect("utf8"),
        "{\"message\":{\"content\":\"list files\",\"role\":\"user\"},\"parent_tool_use_id\":null,\"session_id\":\"default\",\"type\":\"user\"}\n"
    );
}

#[test]
fn transcript_classifies_in_order() {
    let mut decoder = FrameDecoder::new();
    let frames: Vec<Frame> = decoder
        .feed(TRANSCRIPT.as_bytes())
        .iter()
        .filter_map(|line| parse_line("contract", line))
        .collect();

    assert_eq!(frames.len(), 5);
    assert!(matches!(frames[0], Frame::System { ref subtype, .. } if subtype.as_deref() == Some("init")));
    assert!(matches!(
        frames[1].blocks(),
        [ContentBlock::Text { .. }, ContentBlock::ToolUse { name, .. }] if name == "Bash"
    ));
    assert!(matches!(
        frames[2].blocks(),
        [ContentBlock::ToolResult { is_error: false, .. }]
    ));
    assert_eq!(frames[3].text(), "done");

    let Frame::Result(result) = &frames[4] else {
        panic!("last frame must be the result");
    };
    assert_eq!(result.result, "done");
    assert!(!result.is_error);
    assert_eq!(result.duration_ms, 5321);
    assert!((result.total_cost_usd - 0.0187).abs() < f64::EPSILON);

    assert!(frames.iter().all(|f| f.conversation_id() == Some("9f1c")));
}
