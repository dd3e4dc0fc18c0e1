//! The wire message taxonomy (spec §3) and the options used to build the
//! child's argument vector (spec §6.2).
//!
//! `Message` itself does not derive `Deserialize` — decoding goes through the
//! extensible registry in [`crate::parser`] so unknown `type`s surface as
//! [`Message::Unknown`] instead of failing closed. It does derive
//! `Serialize` (tagged by `type`) so `Encode(Decode(m)) == m` holds for
//! every known variant (spec §8 round-trip law).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── Outer Message enum ───────────────────────────────────────────────────

/// Every message that can appear on the wire, discriminated by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    System(SystemMessage),
    Result(ResultMessage),
    StreamEvent(StreamEventMessage),
    ControlRequest(ControlRequestMessage),
    ControlResponse(ControlResponseMessage),
    /// A `type` this version of the crate does not know about. Preserves the
    /// raw payload rather than dropping it, per spec §3/§4.3.
    #[serde(skip)]
    Unknown(UnknownMessage),
}

/// Raw payload for a `type` the registry has no parser for.
#[derive(Debug, Clone)]
pub struct UnknownMessage {
    pub type_name: String,
    pub raw: serde_json::Value,
}

impl Message {
    /// The `session_id` carried by every known variant. `None` for
    /// `Unknown` messages whose shape we don't trust.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Message::User(m) => Some(&m.session_id),
            Message::Assistant(m) => Some(&m.session_id),
            Message::System(m) => Some(&m.session_id),
            Message::Result(m) => Some(m.session_id()),
            Message::StreamEvent(m) => Some(&m.session_id),
            Message::ControlRequest(_) | Message::ControlResponse(_) => None,
            Message::Unknown(u) => u.raw.get("session_id").and_then(|v| v.as_str()),
        }
    }

    pub fn as_result(&self) -> Option<&ResultMessage> {
        match self {
            Message::Result(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Message::ControlRequest(_) | Message::ControlResponse(_))
    }
}

// ─── System messages ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemMessage {
    pub session_id: String,
    #[serde(flatten)]
    pub payload: SystemPayload,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum SystemPayload {
    /// First message — model, tools, MCP servers, permission mode, and the
    /// agent/skill/plugin inventory (spec §3's "init-time inventory").
    Init(SystemInit),
    Status(SystemStatus),
    CompactBoundary(CompactBoundaryPayload),
    TaskStarted(TaskStartedPayload),
    TaskProgress(TaskProgressPayload),
    TaskNotification(TaskNotificationPayload),
    /// Hook-fired acknowledgement, surfaced as its own subtype per spec §3.
    HookFired(HookFiredPayload),
    AuthStatus(AuthStatusPayload),
    /// Any future/unknown system subtype. The open bag keeps whatever
    /// fields arrived so a newer server doesn't break an older client.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemInit {
    pub model: String,
    pub tools: Vec<String>,
    pub mcp_servers: Vec<McpServerStatus>,
    #[serde(alias = "permissionMode")]
    pub permission_mode: String,
    pub claude_code_version: String,
    pub cwd: String,
    #[serde(default, alias = "apiKeySource")]
    pub api_key_source: Option<String>,
    #[serde(default, alias = "outputStyle")]
    pub output_style: Option<String>,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub slash_commands: Vec<String>,
    #[serde(default)]
    pub plugins: Vec<serde_json::Value>,
    #[serde(default)]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpServerStatus {
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompactBoundaryPayload {
    pub compact_metadata: CompactMetadata,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompactMetadata {
    pub trigger: String,
    pub pre_tokens: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskStartedPayload {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskProgressPayload {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskNotificationPayload {
    pub task_id: String,
    pub status: String,
    pub summary: String,
}

/// Acknowledgement that a hook fired, echoed back as a `system` event so a
/// host watching the data plane (rather than registering a handler) can
/// observe it too.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HookFiredPayload {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub r#continue: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthStatusPayload {
    #[serde(rename = "isAuthenticating")]
    pub is_authenticating: bool,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// ─── Content blocks ────────────────────────────────────────────────────────

/// A single block within `user`/`assistant` content. Unified across both
/// directions per spec §3 — `tool_result` blocks are produced by the host
/// and fed back as part of a `user` turn, but the type is shared so a
/// forward-compatible reader only needs one dispatch table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Opaque reasoning. `signature` lets the child verify the block wasn't
    /// tampered with if it's echoed back; absent from some providers.
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        /// Tool inputs are schema-polymorphic (varies per tool).
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ToolResultContent>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            ContentBlock::ToolUse { id, .. } => Some(id),
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id),
            _ => None,
        }
    }
}

/// `tool_result.content` may be a bare string or an ordered block sequence —
/// the real CLI emits both shapes depending on the tool.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    pub fn as_text(&self) -> String {
        match self {
            ToolResultContent::Text(s) => s.clone(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// `user`/`assistant` content is either a bare string or an ordered block
/// sequence (spec §3).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(t) => vec![ContentBlock::text(t.clone())],
            MessageContent::Blocks(b) => b.clone(),
        }
    }
}

// ─── Assistant messages ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantMessage {
    pub message: AssistantContent,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AssistantErrorKind>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// Terminal error tag carried by an `assistant` message (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantErrorKind {
    AuthFailed,
    Billing,
    RateLimit,
    InvalidRequest,
    Server,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantContent {
    pub id: String,
    pub role: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

// ─── User messages ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserMessage {
    pub message: UserContent,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_synthetic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_replay: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserContent {
    pub role: String,
    pub content: MessageContent,
}

// ─── Result messages ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ResultMessage {
    Success(ResultSuccess),
    ErrorDuringExecution(ResultError),
    ErrorMaxTurns(ResultError),
    ErrorMaxBudgetUsd(ResultError),
    ErrorMaxStructuredOutputRetries(ResultError),
}

impl ResultMessage {
    pub fn session_id(&self) -> &str {
        match self {
            ResultMessage::Success(r) => &r.session_id,
            ResultMessage::ErrorDuringExecution(r)
            | ResultMessage::ErrorMaxTurns(r)
            | ResultMessage::ErrorMaxBudgetUsd(r)
            | ResultMessage::ErrorMaxStructuredOutputRetries(r) => &r.session_id,
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, ResultMessage::Success(_))
    }

    pub fn result_text(&self) -> Option<&str> {
        match self {
            ResultMessage::Success(r) => Some(&r.result),
            _ => None,
        }
    }

    pub fn structured_result(&self) -> Option<&serde_json::Value> {
        match self {
            ResultMessage::Success(r) => r.structured_result.as_ref(),
            _ => None,
        }
    }

    pub fn total_cost_usd(&self) -> Option<f64> {
        match self {
            ResultMessage::Success(r) => r.total_cost_usd,
            ResultMessage::ErrorDuringExecution(r)
            | ResultMessage::ErrorMaxTurns(r)
            | ResultMessage::ErrorMaxBudgetUsd(r)
            | ResultMessage::ErrorMaxStructuredOutputRetries(r) => r.total_cost_usd,
        }
    }

    pub fn num_turns(&self) -> u32 {
        match self {
            ResultMessage::Success(r) => r.num_turns,
            ResultMessage::ErrorDuringExecution(r)
            | ResultMessage::ErrorMaxTurns(r)
            | ResultMessage::ErrorMaxBudgetUsd(r)
            | ResultMessage::ErrorMaxStructuredOutputRetries(r) => r.num_turns,
        }
    }

    pub fn permission_denials(&self) -> &[PermissionDenial] {
        match self {
            ResultMessage::Success(r) => &r.permission_denials,
            ResultMessage::ErrorDuringExecution(r)
            | ResultMessage::ErrorMaxTurns(r)
            | ResultMessage::ErrorMaxBudgetUsd(r)
            | ResultMessage::ErrorMaxStructuredOutputRetries(r) => &r.permission_denials,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PermissionDenial {
    pub tool_name: String,
    pub tool_use_id: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
}

/// A proposed permission rule change, carried by an `ask` decision or
/// surfaced to the host as a `suggestions` hint on `can_use_tool`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PermissionUpdate {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultSuccess {
    pub session_id: String,
    pub result: String,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub num_turns: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: Option<UsageByModel>,
    #[serde(default)]
    pub permission_denials: Vec<PermissionDenial>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultError {
    pub session_id: String,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub num_turns: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: Option<UsageByModel>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub permission_denials: Vec<PermissionDenial>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// Per-model usage map (spec §3: "optional per-model usage map").
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum UsageByModel {
    Single(TokenUsage),
    ByModel(HashMap<String, TokenUsage>),
}

// ─── Ancillary message types ──────────────────────────────────────────────

/// `stream_event` — fine-grained partial-message deltas, gated behind
/// `--include-partial-messages`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamEventMessage {
    pub event: StreamEventPayload,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    pub session_id: String,
    pub uuid: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventPayload {
    MessageStart,
    ContentBlockStart {
        index: u32,
    },
    ContentBlockDelta {
        index: u32,
        delta: StreamDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta,
    MessageStop,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    #[serde(other)]
    Unknown,
}

// ─── Control-plane envelopes (spec §4.5, §6.1) ────────────────────────────

/// `control_request` — an open bag beyond `request_id`/`subtype` so new
/// fields introduced by either side don't break decoding.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlRequestMessage {
    pub request_id: String,
    pub subtype: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlResponsePayload {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<serde_json::Value>,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlResponseMessage {
    pub request_id: String,
    #[serde(flatten)]
    pub payload: ControlResponsePayload,
}

impl ControlResponseMessage {
    pub fn success(request_id: impl Into<String>, response: Option<serde_json::Value>) -> Self {
        Self {
            request_id: request_id.into(),
            payload: ControlResponsePayload::Success { response },
        }
    }

    pub fn error(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            payload: ControlResponsePayload::Error {
                error: error.into(),
            },
        }
    }
}

// ─── Prompt input (host → child `user` turns) ─────────────────────────────

/// What [`crate::session::Session::send`] accepts: a plain string or a
/// pre-built block sequence (e.g. to feed tool results back manually).
#[derive(Debug, Clone)]
pub enum PromptInput {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl From<String> for PromptInput {
    fn from(s: String) -> Self {
        PromptInput::Text(s)
    }
}

impl From<&str> for PromptInput {
    fn from(s: &str) -> Self {
        PromptInput::Text(s.to_string())
    }
}

impl From<Vec<ContentBlock>> for PromptInput {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        PromptInput::Blocks(blocks)
    }
}

impl PromptInput {
    pub(crate) fn into_message_content(self) -> MessageContent {
        match self {
            PromptInput::Text(t) => MessageContent::Text(t),
            PromptInput::Blocks(b) => MessageContent::Blocks(b),
        }
    }
}

// ─── QueryOptions / SessionOptions ─────────────────────────────────────────

/// Effort level for reasoning depth (`--effort`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effort {
    Low,
    Medium,
    High,
    Max,
}

impl Effort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effort::Low => "low",
            Effort::Medium => "medium",
            Effort::High => "high",
            Effort::Max => "max",
        }
    }
}

/// Permission mode — the session-scoped default answer to `can_use_tool`
/// (spec §4.7).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
    DontAsk,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
            PermissionMode::DontAsk => "dontAsk",
        }
    }
}

/// MCP server configuration for stdio transport.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Options shared by one-shot queries and resumable sessions; projected into
/// the child's argument vector by [`crate::process`] (spec §6.2).
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub max_thinking_tokens: Option<u32>,
    pub effort: Option<Effort>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub tool_preset: Option<String>,
    pub permission_mode: PermissionMode,
    pub system_prompt: Option<String>,
    pub append_system_prompt: Option<String>,
    pub resume: Option<String>,
    pub continue_conversation: bool,
    pub agent: Option<String>,
    pub mcp_servers: Vec<McpServerConfig>,
    pub cwd: Option<std::path::PathBuf>,
    pub env: HashMap<String, String>,
    pub additional_directories: Vec<String>,
    pub path_to_executable: Option<String>,
    pub debug: bool,
    pub include_partial_messages: bool,
    pub enable_file_checkpointing: bool,
}

/// Back-compat alias: one-shot `query()` takes the same option set as a
/// resumable session.
pub type QueryOptions = SessionOptions;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_content_blocks_wraps_text() {
        let content = MessageContent::Text("hi".into());
        let blocks = content.blocks();
        assert_eq!(blocks.len(), 1);
        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "hi"));
    }

    #[test]
    fn tool_result_content_as_text_joins_blocks() {
        let content = ToolResultContent::Blocks(vec![
            ContentBlock::text("a"),
            ContentBlock::ToolUse {
                id: "x".into(),
                name: "noop".into(),
                input: serde_json::json!({}),
            },
            ContentBlock::text("b"),
        ]);
        assert_eq!(content.as_text(), "ab");
    }

    #[test]
    fn control_response_success_round_trips() {
        let resp = ControlResponseMessage::success("r1", Some(serde_json::json!({"ok": true})));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["subtype"], "success");
        assert_eq!(value["response"]["ok"], true);
    }

    #[test]
    fn permission_mode_as_str_matches_cli_spelling() {
        assert_eq!(PermissionMode::BypassPermissions.as_str(), "bypassPermissions");
        assert_eq!(PermissionMode::DontAsk.as_str(), "dontAsk");
    }
}
