//! Crate-level integration tests for the message taxonomy: decoding through
//! [`crate::parser::MessageRegistry`] (not a raw `serde_json::from_str`,
//! since `Message` decoding is deliberately not a plain derive — spec §4.3)
//! and the `Encode(Decode(m)) == m` round-trip law (spec §8).

use crate::parser::MessageRegistry;
use crate::types::{Message, ResultMessage, SystemPayload};

async fn decode(json: &str) -> Message {
    let registry = MessageRegistry::new();
    let value: serde_json::Value = serde_json::from_str(json).expect("test fixture is valid JSON");
    registry.decode(value).await.expect("failed to parse message")
}

#[tokio::test]
async fn parse_system_init() {
    let json = r#"{
        "type": "system",
        "subtype": "init",
        "session_id": "abc-123",
        "model": "claude-sonnet-4-6",
        "tools": ["Read", "Bash", "Edit"],
        "mcp_servers": [{"name": "sdlc", "status": "connected"}],
        "permission_mode": "acceptEdits",
        "claude_code_version": "1.0.0",
        "cwd": "/tmp"
    }"#;
    let msg = decode(json).await;
    let Message::System(sys) = msg else {
        panic!("expected System")
    };
    assert_eq!(sys.session_id, "abc-123");
    let SystemPayload::Init(init) = sys.payload else {
        panic!("expected Init")
    };
    assert_eq!(init.model, "claude-sonnet-4-6");
    assert_eq!(init.tools.len(), 3);
    assert_eq!(init.mcp_servers[0].name, "sdlc");
}

#[tokio::test]
async fn parse_system_unknown_subtype_keeps_the_open_bag() {
    let json = r#"{
        "type": "system",
        "subtype": "some_future_subtype",
        "session_id": "abc-123",
        "anything": "goes"
    }"#;
    let msg = decode(json).await;
    let Message::System(sys) = msg else {
        panic!("expected System")
    };
    assert!(matches!(sys.payload, SystemPayload::Unknown));
}

#[tokio::test]
async fn unknown_top_level_type_surfaces_as_unknown_message() {
    let json = r#"{"type": "from_the_future", "session_id": "abc-123", "odd_field": 1}"#;
    let msg = decode(json).await;
    match msg {
        Message::Unknown(u) => {
            assert_eq!(u.type_name, "from_the_future");
            assert_eq!(u.raw["odd_field"], 1);
        }
        _ => panic!("expected Unknown"),
    }
}

#[tokio::test]
async fn parse_result_success() {
    let json = r#"{
        "type": "result",
        "subtype": "success",
        "session_id": "abc-123",
        "result": "Done! I wrote the spec.",
        "duration_ms": 5000,
        "duration_api_ms": 4800,
        "num_turns": 3,
        "total_cost_usd": 0.0042,
        "usage": {
            "input_tokens": 1200,
            "output_tokens": 400
        }
    }"#;
    let msg = decode(json).await;
    let Message::Result(result) = msg else {
        panic!("expected Result")
    };
    assert!(!result.is_error());
    assert_eq!(result.session_id(), "abc-123");
    assert_eq!(result.result_text(), Some("Done! I wrote the spec."));
    assert_eq!(result.num_turns(), 3);
    assert!((result.total_cost_usd().unwrap() - 0.0042).abs() < f64::EPSILON);
}

#[tokio::test]
async fn parse_result_error_max_turns() {
    let json = r#"{
        "type": "result",
        "subtype": "error_max_turns",
        "session_id": "abc-123",
        "duration_ms": 10000,
        "duration_api_ms": 9500,
        "num_turns": 10,
        "total_cost_usd": 0.02,
        "usage": {"input_tokens": 5000, "output_tokens": 1000},
        "errors": ["Reached maximum turn limit"]
    }"#;
    let msg = decode(json).await;
    let Message::Result(result) = msg else {
        panic!("expected Result")
    };
    assert!(result.is_error());
    assert!(matches!(result, ResultMessage::ErrorMaxTurns(_)));
    assert_eq!(result.result_text(), None);
}

#[tokio::test]
async fn parse_assistant_message_with_tool_use() {
    let json = r#"{
        "type": "assistant",
        "session_id": "abc-123",
        "parent_tool_use_id": null,
        "message": {
            "id": "msg_abc",
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Let me read the file."},
                {"type": "tool_use", "id": "tu_1", "name": "Read", "input": {"file_path": "/tmp/foo.txt"}}
            ],
            "model": "claude-sonnet-4-6",
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 100, "output_tokens": 50}
        }
    }"#;
    let msg = decode(json).await;
    let Message::Assistant(asst) = msg else {
        panic!("expected Assistant")
    };
    assert_eq!(asst.session_id, "abc-123");
    assert_eq!(asst.message.content.len(), 2);
}

#[tokio::test]
async fn parse_task_progress_system_event() {
    let json = r#"{
        "type": "system",
        "subtype": "task_progress",
        "session_id": "abc-123",
        "task_id": "t1",
        "tool_use_id": "tu_1",
        "description": "reading files"
    }"#;
    let msg = decode(json).await;
    let Message::System(sys) = msg else {
        panic!("expected System")
    };
    match sys.payload {
        SystemPayload::TaskProgress(tp) => assert_eq!(tp.description, "reading files"),
        other => panic!("expected TaskProgress, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_type_field_is_a_message_parse_error_not_a_panic() {
    let registry = MessageRegistry::new();
    let value: serde_json::Value = serde_json::from_str(r#"{"session_id": "abc-123"}"#).unwrap();
    let err = registry.decode(value).await.unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::MessageParse);
}

#[tokio::test]
async fn encode_decode_round_trips_a_result_message() {
    let original = Message::Result(ResultMessage::Success(crate::types::ResultSuccess {
        session_id: "s1".into(),
        result: "hi".into(),
        duration_ms: 10,
        duration_api_ms: 8,
        num_turns: 1,
        total_cost_usd: Some(0.01),
        usage: None,
        permission_denials: Vec::new(),
        structured_result: None,
        uuid: None,
    }));

    let value = serde_json::to_value(&original).unwrap();
    let registry = MessageRegistry::new();
    let decoded = registry.decode(value).await.unwrap();

    match decoded {
        Message::Result(ResultMessage::Success(r)) => {
            assert_eq!(r.session_id, "s1");
            assert_eq!(r.result, "hi");
            assert_eq!(r.total_cost_usd, Some(0.01));
        }
        other => panic!("expected Result::Success, got {other:?}"),
    }
}
