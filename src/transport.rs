//! Transport dispatcher (spec §4.4).
//!
//! Owns one child process, frames its stdout into messages, and splits the
//! result into the data plane and the control plane. A single reader task
//! drives a [`crate::framer::JsonLineFramer`] over the child's stdout,
//! decodes each frame through a [`crate::parser::MessageRegistry`], and then:
//!
//! - routes `control_response` frames to the [`ControlPlane`] waiting on that
//!   request id (§4.5);
//! - routes `control_request` frames (`can_use_tool`, `hook_callback`,
//!   `mcp_message`, `permission_request`) to the registered hook/tool/
//!   permission handlers and writes the answer back as a `control_response`
//!   line, in its own task so a slow handler never blocks the reader loop;
//! - forwards everything else — including non-fatal parser errors — onto a
//!   bounded channel, which is the primary surface a caller drains (spec §9:
//!   "channel is primary" for this parallel-task target).
//!
//! If the child's stdout hits EOF before a `result` was ever observed, that's
//! treated as an abnormal exit: the transport waits on the child's exit
//! status and pushes a `Process` error onto the data channel before closing
//! it, rather than silently returning an empty stream.
//!
//! Grounded in the same request/id-correlation design as [`crate::control`]
//! (itself grounded in `claudeless`'s stdio MCP transport), wired here to the
//! actual byte stream and to this crate's hook/tool/permission registries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};

use crate::control::{ControlOutcome, ControlPlane};
use crate::error::ClaudeAgentError;
use crate::framer::{Frame, JsonLineFramer};
use crate::hooks::{HookContext, HookEvent, HookRegistry};
use crate::parser::MessageRegistry;
use crate::permission::{PermissionDecision, PermissionEngine, PermissionRequest};
use crate::process::ClaudeProcess;
use crate::tools::ToolServerRegistry;
use crate::types::{Message, PermissionUpdate};

const CHANNEL_CAPACITY: usize = 64;

/// The registries an inbound `control_request` gets dispatched against.
pub(crate) struct InboundContext {
    pub(crate) hooks: Arc<HookRegistry>,
    pub(crate) tools: Arc<ToolServerRegistry>,
    pub(crate) permissions: Arc<RwLock<PermissionEngine>>,
}

/// Shared handle to a running transport: a writer half and a receiver for
/// the data plane.
pub(crate) struct Transport {
    process: Arc<ClaudeProcess>,
    control: Arc<ControlPlane>,
    data_rx: tokio::sync::Mutex<mpsc::Receiver<Result<Message, ClaudeAgentError>>>,
    saw_result: Arc<AtomicBool>,
}

impl Transport {
    pub(crate) fn spawn(mut process: ClaudeProcess, registry: Arc<MessageRegistry>, inbound: InboundContext) -> Self {
        let stdout = process.take_stdout();
        let process = Arc::new(process);
        let control = Arc::new(ControlPlane::new(process.clone()));
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let saw_result = Arc::new(AtomicBool::new(false));

        if let Some(stdout) = stdout {
            tokio::spawn(reader_loop(
                stdout,
                registry,
                control.clone(),
                process.clone(),
                Arc::new(inbound),
                tx,
                saw_result.clone(),
            ));
        } else {
            drop(tx);
        }

        Self {
            process,
            control,
            data_rx: tokio::sync::Mutex::new(rx),
            saw_result,
        }
    }

    pub(crate) fn control(&self) -> &Arc<ControlPlane> {
        &self.control
    }

    pub(crate) fn process(&self) -> &Arc<ClaudeProcess> {
        &self.process
    }

    /// Write a pre-serialized data-plane line (a user turn) to the child.
    pub(crate) async fn send_line(&self, line: &str) -> Result<(), ClaudeAgentError> {
        self.process.write_line(line).await
    }

    /// Pull the next data-plane item. `None` once the reader loop has
    /// finished and the channel has drained.
    pub(crate) async fn recv(&self) -> Option<Result<Message, ClaudeAgentError>> {
        self.data_rx.lock().await.recv().await
    }

    pub(crate) fn saw_result(&self) -> bool {
        self.saw_result.load(Ordering::SeqCst)
    }

    /// Tear down the transport: cancels any pending control requests and
    /// closes the process. Idempotent — safe to call from `Session::close`
    /// even if the reader loop already did the same on abnormal exit.
    pub(crate) async fn shutdown(&self, grace: std::time::Duration) -> Result<(), ClaudeAgentError> {
        self.control.cancel_all().await;
        self.process.close(grace).await
    }
}

#[allow(clippy::too_many_arguments)]
async fn reader_loop(
    stdout: tokio::process::ChildStdout,
    registry: Arc<MessageRegistry>,
    control: Arc<ControlPlane>,
    process: Arc<ClaudeProcess>,
    inbound: Arc<InboundContext>,
    tx: mpsc::Sender<Result<Message, ClaudeAgentError>>,
    saw_result: Arc<AtomicBool>,
) {
    let mut framer = JsonLineFramer::new(stdout);

    loop {
        let frame = match framer.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(ClaudeAgentError::Io(e))).await;
                break;
            }
        };

        match frame {
            Frame::ParserError {
                line,
                offset,
                preview,
                reason,
            } => {
                let _ = tx
                    .send(Err(ClaudeAgentError::Parser {
                        line,
                        offset,
                        preview,
                        reason,
                    }))
                    .await;
            }
            Frame::Message { value, .. } => {
                if let Err(e) = route(value, &registry, &control, &process, &inbound, &tx, &saw_result).await {
                    let _ = tx.send(Err(e)).await;
                }
            }
        }
    }

    if !saw_result.load(Ordering::SeqCst) {
        if let Err(err) = process.wait_after_stdout_eof().await {
            let _ = tx.send(Err(err)).await;
        }
    }

    control.cancel_all().await;
}

async fn route(
    value: Value,
    registry: &MessageRegistry,
    control: &ControlPlane,
    process: &Arc<ClaudeProcess>,
    inbound: &Arc<InboundContext>,
    tx: &mpsc::Sender<Result<Message, ClaudeAgentError>>,
    saw_result: &Arc<AtomicBool>,
) -> Result<(), ClaudeAgentError> {
    let type_name = value.get("type").and_then(Value::as_str).unwrap_or_default();

    if type_name == "control_response" {
        let request_id = value
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let outcome = if let Some(error) = value.get("error").and_then(Value::as_str) {
            ControlOutcome::Error(error.to_string())
        } else {
            ControlOutcome::Success(value.get("response").cloned())
        };
        control.resolve(&request_id, outcome).await;
        return Ok(());
    }

    if type_name == "control_request" {
        let inbound = inbound.clone();
        let process = process.clone();
        tokio::spawn(async move {
            handle_inbound_request(value, inbound, process).await;
        });
        return Ok(());
    }

    let message = registry.decode(value).await?;
    if matches!(message, Message::Result(_)) {
        saw_result.store(true, Ordering::SeqCst);
    }
    let _ = tx.send(Ok(message)).await;
    Ok(())
}

/// Answer one inbound `control_request` from the child: decide, encode, and
/// write the `control_response` line back. Runs in its own task so a slow
/// hook or permission callback never blocks the reader loop from draining
/// the data plane (spec §4.5: "Data-plane messages that arrive between a
/// request and its response are delivered in arrival order").
async fn handle_inbound_request(value: Value, inbound: Arc<InboundContext>, process: Arc<ClaudeProcess>) {
    let request_id = value.get("request_id").and_then(Value::as_str).unwrap_or_default().to_string();
    let subtype = value.get("subtype").and_then(Value::as_str).unwrap_or_default().to_string();

    // A host-supplied permission callback or tool handler panicking must
    // still produce a `control_response` — never leave the child waiting on
    // a correlation id that will never resolve (spec §4.5).
    let dispatch_request_id = request_id.clone();
    let dispatch_subtype = subtype.clone();
    let dispatch = crate::control::run_guarded(subtype.clone(), async move {
        match dispatch_subtype.as_str() {
            "can_use_tool" => handle_can_use_tool(&value, &inbound).await,
            "permission_request" => handle_permission_request(&value, &inbound).await,
            "hook_callback" => handle_hook_callback(&value, &inbound).await,
            "mcp_message" => handle_mcp_message(&value, &inbound).await,
            other => control_response_error(&dispatch_request_id, format!("unknown inbound control_request subtype `{other}`")),
        }
    });
    let response = match dispatch.await {
        Ok(response) => response,
        Err(e) => control_response_error(&request_id, format!("handler for `{subtype}` panicked: {e}")),
    };

    let line = match serde_json::to_string(&tag_as_control_response(&request_id, response)) {
        Ok(line) => line,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode control_response");
            return;
        }
    };

    if let Err(e) = process.write_line(&line).await {
        tracing::warn!(error = %e, subtype, "failed to write control_response to child stdin");
    }
}

fn tag_as_control_response(request_id: &str, outcome_payload: Value) -> Value {
    let mut envelope = match outcome_payload {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("response".into(), other);
            map.insert("subtype".into(), "success".into());
            map
        }
    };
    envelope.insert("type".into(), "control_response".into());
    envelope.insert("request_id".into(), request_id.into());
    Value::Object(envelope)
}

fn control_response_success(response: Value) -> Value {
    json!({ "subtype": "success", "response": response })
}

fn control_response_error(_request_id: &str, message: String) -> Value {
    json!({ "subtype": "error", "error": message })
}

async fn handle_can_use_tool(value: &Value, inbound: &InboundContext) -> Value {
    let request = parse_permission_request(value);
    let decision = inbound.permissions.read().await.decide(request).await;
    control_response_success(encode_permission_decision(decision))
}

/// `permission_request` asks the host to make a permission-update proposal
/// interactively rather than decide a specific tool call; run it through the
/// same engine so a host callback registered for `can_use_tool` gets a say,
/// but never block the turn — default to "no opinion" if nothing answers.
async fn handle_permission_request(value: &Value, inbound: &InboundContext) -> Value {
    let request = parse_permission_request(value);
    match inbound.permissions.read().await.decide(request).await {
        PermissionDecision::Ask { updates } => control_response_success(json!({ "updatedPermissions": updates })),
        _ => control_response_success(json!({})),
    }
}

async fn handle_hook_callback(value: &Value, inbound: &InboundContext) -> Value {
    let Some(event) = value.get("event").and_then(Value::as_str).and_then(HookEvent::from_str) else {
        return control_response_error("", "hook_callback missing a recognized `event`".into());
    };
    let ctx = HookContext {
        event,
        tool_name: value.get("tool_name").and_then(Value::as_str).map(String::from),
        session_id: value.get("session_id").and_then(Value::as_str).map(String::from),
        payload: value.clone(),
    };
    match inbound.hooks.trigger(ctx).await {
        Ok(outcome) => control_response_success(encode_hook_outcome(outcome)),
        Err(e) => control_response_error("", e.to_string()),
    }
}

async fn handle_mcp_message(value: &Value, inbound: &InboundContext) -> Value {
    let Some(server_name) = value.get("server_name").and_then(Value::as_str) else {
        return control_response_error("", "mcp_message missing `server_name`".into());
    };
    let Some(message) = value.get("message").cloned() else {
        return control_response_error("", "mcp_message missing `message`".into());
    };
    let rpc_response = inbound.tools.handle_request(server_name, message).await;
    control_response_success(rpc_response)
}

fn parse_permission_request(value: &Value) -> PermissionRequest {
    let suggestions: Vec<PermissionUpdate> = value
        .get("suggestions")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    PermissionRequest {
        tool_name: value.get("tool_name").and_then(Value::as_str).unwrap_or_default().to_string(),
        input: value.get("tool_input").cloned().unwrap_or(Value::Null),
        tool_use_id: value.get("tool_use_id").and_then(Value::as_str).map(String::from),
        agent_id: value.get("agent_id").and_then(Value::as_str).map(String::from),
        blocked_path: value
            .get("blocked_path")
            .or_else(|| value.get("blockedPath"))
            .and_then(Value::as_str)
            .map(String::from),
        suggestions,
    }
}

fn encode_permission_decision(decision: PermissionDecision) -> Value {
    match decision {
        PermissionDecision::Allow { updated_input } => {
            let mut obj = json!({ "behavior": "allow" });
            if let Some(input) = updated_input {
                obj["updatedInput"] = input;
            }
            obj
        }
        PermissionDecision::Deny { reason, interrupt } => json!({
            "behavior": "deny",
            "message": reason,
            "interrupt": interrupt,
        }),
        PermissionDecision::Ask { updates } => json!({
            "behavior": "ask",
            "updatedPermissions": updates,
        }),
    }
}

fn encode_hook_outcome(outcome: crate::hooks::HookOutcome) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("continue".into(), outcome.r#continue.into());
    if outcome.blocked {
        obj.insert("decision".into(), "block".into());
    }
    if let Some(reason) = outcome.reason {
        obj.insert("reason".into(), reason.into());
    }
    if let Some(msg) = outcome.system_message {
        obj.insert("systemMessage".into(), msg.into());
    }
    if outcome.suppress_output {
        obj.insert("suppressOutput".into(), true.into());
    }
    if let Some(input) = outcome.updated_input {
        obj.insert("updatedInput".into(), input);
    }
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionMode;

    fn inbound_with(permissions: PermissionEngine) -> InboundContext {
        InboundContext {
            hooks: Arc::new(HookRegistry::new()),
            tools: Arc::new(ToolServerRegistry::new()),
            permissions: Arc::new(RwLock::new(permissions)),
        }
    }

    #[tokio::test]
    async fn can_use_tool_bypass_mode_allows() {
        let inbound = inbound_with(PermissionEngine::new(PermissionMode::BypassPermissions));
        let request = json!({
            "type": "control_request",
            "request_id": "r1",
            "subtype": "can_use_tool",
            "tool_name": "Bash",
            "tool_input": {"command": "ls"}
        });
        let response = handle_can_use_tool(&request, &inbound).await;
        assert_eq!(response["response"]["behavior"], "allow");
    }

    #[tokio::test]
    async fn can_use_tool_plan_mode_denies_write() {
        let inbound = inbound_with(PermissionEngine::new(PermissionMode::Plan));
        let request = json!({
            "type": "control_request",
            "request_id": "r2",
            "subtype": "can_use_tool",
            "tool_name": "Write",
            "tool_input": {}
        });
        let response = handle_can_use_tool(&request, &inbound).await;
        assert_eq!(response["response"]["behavior"], "deny");
    }

    #[tokio::test]
    async fn hook_callback_unknown_event_is_error_response() {
        let inbound = inbound_with(PermissionEngine::new(PermissionMode::Default));
        let request = json!({"event": "not_a_real_event"});
        let response = handle_hook_callback(&request, &inbound).await;
        assert_eq!(response["subtype"], "error");
    }

    #[tokio::test]
    async fn hook_callback_with_no_registered_hooks_continues() {
        let inbound = inbound_with(PermissionEngine::new(PermissionMode::Default));
        let request = json!({"event": "pre_tool_use", "tool_name": "Bash"});
        let response = handle_hook_callback(&request, &inbound).await;
        assert_eq!(response["subtype"], "success");
        assert_eq!(response["response"]["continue"], true);
    }

    #[tokio::test]
    async fn mcp_message_routes_to_tool_server() {
        use crate::tools::{ToolDefinition, ToolOutcome, ToolServer};

        let inbound = inbound_with(PermissionEngine::new(PermissionMode::Default));
        let server = Arc::new(ToolServer::new("calc"));
        server
            .register_tool(
                ToolDefinition {
                    name: "add".into(),
                    description: "adds".into(),
                    input_schema: json!({}),
                },
                Arc::new(|args: Value| Box::pin(async move { ToolOutcome::Success(args) })),
            )
            .await;
        inbound.tools.add_server(server).await;

        let request = json!({
            "server_name": "calc",
            "message": {"jsonrpc": "2.0", "id": 1, "method": "tools/list"}
        });
        let response = handle_mcp_message(&request, &inbound).await;
        let tools = response["response"]["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
    }

    #[tokio::test]
    async fn unknown_server_mcp_message_is_json_rpc_error_inside_success_envelope() {
        let inbound = inbound_with(PermissionEngine::new(PermissionMode::Default));
        let request = json!({
            "server_name": "ghost",
            "message": {"jsonrpc": "2.0", "id": 1, "method": "tools/list"}
        });
        let response = handle_mcp_message(&request, &inbound).await;
        assert_eq!(response["subtype"], "success");
        assert!(response["response"]["error"].is_object());
    }

    #[test]
    fn tag_as_control_response_adds_type_and_id() {
        let envelope = tag_as_control_response("req-9", control_response_success(json!({"ok": true})));
        assert_eq!(envelope["type"], "control_response");
        assert_eq!(envelope["request_id"], "req-9");
        assert_eq!(envelope["subtype"], "success");
        assert_eq!(envelope["response"]["ok"], true);
    }
}
