//! Session state machine (spec §4.8).
//!
//! Composes the transport, hook/tool/permission registries, and the stream
//! validator into one typed conversation: `Created → Connected → (Sending |
//! Receiving)* → Closed`, `Closed` terminal and idempotent.
//!
//! `send` only stashes the next turn's payload; the line is written to the
//! child only when `receive` is next called, so cancelling a `receive` also
//! cancels an unwritten `send` (spec §4.8). A second `send` with no
//! intervening `receive` silently replaces the pending payload — resolved in
//! favor of the documented overwrite rather than an error or a queue (see
//! `send_twice_without_receive_keeps_latest`).
//!
//! `connect` performs the control-plane `initialize` handshake before
//! returning, so every other control-plane operation can assume the
//! protocol is live; they still check an `initialized` flag rather than
//! assume it, so the contract holds even if that assumption changes later.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, RwLock};

use crate::error::ClaudeAgentError;
use crate::hooks::HookRegistry;
use crate::parser;
use crate::permission::{PermissionCallback, PermissionEngine};
use crate::process::{ClaudeProcess, SpawnMode};
use crate::tools::ToolServerRegistry;
use crate::transport::{InboundContext, Transport};
use crate::types::{Message, PermissionMode, PromptInput, SessionOptions};
use crate::validator::{StreamValidator, ValidationIssue};

/// A live conversation with one `claude` child. Operations are safe to call
/// concurrently from different tasks — mutable state is behind per-field
/// locks rather than requiring `&mut self` (spec §4.8's concurrency note).
pub struct Session {
    transport: Transport,
    hooks: Arc<HookRegistry>,
    tools: Arc<ToolServerRegistry>,
    permissions: Arc<RwLock<PermissionEngine>>,
    validator: Mutex<StreamValidator>,
    pending_send: Mutex<Option<PromptInput>>,
    session_id: RwLock<Option<String>>,
    cached_model: RwLock<Option<String>>,
    enable_file_checkpointing: bool,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl Session {
    /// Spawn a fresh child and complete the control-plane handshake.
    pub async fn connect(opts: SessionOptions) -> Result<Self, ClaudeAgentError> {
        Self::spawn_connected(opts).await
    }

    /// Spawn a child resuming a prior session id.
    pub async fn resume(session_id: impl Into<String>, mut opts: SessionOptions) -> Result<Self, ClaudeAgentError> {
        opts.resume = Some(session_id.into());
        Self::spawn_connected(opts).await
    }

    async fn spawn_connected(opts: SessionOptions) -> Result<Self, ClaudeAgentError> {
        let enable_file_checkpointing = opts.enable_file_checkpointing;
        let cached_model = opts.model.clone();
        let resume = opts.resume.clone();
        let permission_mode = opts.permission_mode;

        let process = ClaudeProcess::spawn(SpawnMode::Interactive, &opts)?;
        let hooks = Arc::new(HookRegistry::new());
        let tools = Arc::new(ToolServerRegistry::new());
        let permissions = Arc::new(RwLock::new(PermissionEngine::new(permission_mode)));

        let inbound = InboundContext {
            hooks: hooks.clone(),
            tools: tools.clone(),
            permissions: permissions.clone(),
        };
        let transport = Transport::spawn(process, parser::default_registry(), inbound);

        let mut fields = Map::new();
        fields.insert("protocolVersion".into(), json!("2024-11-05"));
        transport
            .control()
            .request("initialize", fields)
            .await
            .map_err(|e| e.session_context(resume.clone(), "control-plane handshake failed"))?;

        Ok(Self {
            transport,
            hooks,
            tools,
            permissions,
            validator: Mutex::new(StreamValidator::new()),
            pending_send: Mutex::new(None),
            session_id: RwLock::new(resume),
            cached_model: RwLock::new(cached_model),
            enable_file_checkpointing,
            initialized: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        })
    }

    /// The hook registry for this session — register callbacks before or
    /// after `connect`, they take effect on the next matching event either
    /// way since the transport's reader task shares this same registry.
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// The in-process tool-server registry for this session.
    pub fn tool_servers(&self) -> &Arc<ToolServerRegistry> {
        &self.tools
    }

    /// Install (or replace) the host callback the permission engine falls
    /// back to once bypass/acceptEdits/plan/dontAsk have all declined to
    /// decide outright.
    pub async fn set_permission_callback(&self, callback: PermissionCallback) {
        let mode = self.permissions.read().await.mode();
        *self.permissions.write().await = PermissionEngine::new(mode).with_callback(callback);
    }

    /// The session id surfaced by the child, once known — `None` until at
    /// least one message carrying one has been observed (or immediately, for
    /// a resumed session).
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stash the next user turn. Not written to the child until `receive` is
    /// next called.
    pub async fn send(&self, prompt: impl Into<PromptInput>) -> Result<(), ClaudeAgentError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClaudeAgentError::Closed);
        }
        *self.pending_send.lock().await = Some(prompt.into());
        Ok(())
    }

    /// Flush any pending `send` and return a stream of this turn's messages,
    /// ending after the `result` message (inclusive) or the first error.
    /// With no pending send, attaches to the ambient inbound stream instead
    /// of writing anything — useful for observing unsolicited `system`
    /// events from a long-lived session.
    pub async fn receive(&self) -> Result<impl Stream<Item = Result<Message, ClaudeAgentError>> + '_, ClaudeAgentError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClaudeAgentError::Closed);
        }
        if let Some(prompt) = self.pending_send.lock().await.take() {
            self.write_turn(prompt).await?;
        }
        Ok(futures::stream::unfold((self, false), |(session, done)| async move {
            if done {
                return None;
            }
            match session.transport.recv().await {
                Some(Ok(message)) => {
                    if let Some(id) = message.session_id() {
                        *session.session_id.write().await = Some(id.to_string());
                    }
                    let issues = session.validator.lock().await.observe(&message);
                    // A `result` with no preceding opened turn is the pairing
                    // violation spec §8 calls out by name: surface it as a
                    // terminal `Protocol` error on the stream instead of only
                    // logging it, so a consumer draining `receive()` actually
                    // observes the violation rather than a message that looks
                    // like a normal turn close.
                    let turn_not_open = issues.iter().find_map(|issue| match issue {
                        ValidationIssue::TurnNotOpen { observed_type } if observed_type == "result" => {
                            Some(observed_type.clone())
                        }
                        _ => None,
                    });
                    for issue in &issues {
                        tracing::warn!(?issue, "stream validation issue");
                    }
                    if let Some(observed_type) = turn_not_open {
                        let err = ClaudeAgentError::Protocol {
                            observed_type,
                            reason: "result message observed with no preceding turn-opening message".into(),
                        };
                        return Some((Err(err), (session, true)));
                    }
                    let turn_over = matches!(message, Message::Result(_));
                    Some((Ok(message), (session, turn_over)))
                }
                Some(Err(e)) => Some((Err(e), (session, true))),
                None => None,
            }
        }))
    }

    async fn write_turn(&self, prompt: PromptInput) -> Result<(), ClaudeAgentError> {
        let content = serde_json::to_value(prompt.into_message_content()).map_err(|e| ClaudeAgentError::Configuration {
            field: "prompt".into(),
            value: e.to_string(),
        })?;
        let envelope = json!({
            "type": "user",
            "message": { "role": "user", "content": content },
        });
        let line = serde_json::to_string(&envelope).map_err(|e| ClaudeAgentError::Configuration {
            field: "prompt".into(),
            value: e.to_string(),
        })?;
        self.transport.send_line(&line).await
    }

    /// Graceful interrupt over the control plane; falls back to killing the
    /// process outright if the protocol was never initialized or the
    /// control-plane round trip itself fails.
    pub async fn interrupt(&self) -> Result<(), ClaudeAgentError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClaudeAgentError::Closed);
        }
        if !self.initialized.load(Ordering::SeqCst) {
            self.transport.process().kill().await;
            return Ok(());
        }
        match self.transport.control().request("interrupt", Map::new()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                self.transport.process().kill().await;
                Ok(())
            }
        }
    }

    /// Change the active model mid-session. `None` resets to the child's
    /// default. The control-plane round trip is authoritative: the cached
    /// value is only updated after the child confirms, so a concurrent
    /// reader never observes a model change the child actually rejected.
    pub async fn set_model(&self, model: Option<String>) -> Result<(), ClaudeAgentError> {
        self.require_initialized("set_model")?;
        let mut fields = Map::new();
        fields.insert("model".into(), model.clone().map(Value::String).unwrap_or(Value::Null));
        self.transport.control().request("set_model", fields).await?;
        *self.cached_model.write().await = model;
        Ok(())
    }

    pub async fn cached_model(&self) -> Option<String> {
        self.cached_model.read().await.clone()
    }

    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<(), ClaudeAgentError> {
        self.require_initialized("set_permission_mode")?;
        let mut fields = Map::new();
        fields.insert("mode".into(), Value::String(mode.as_str().into()));
        self.transport.control().request("set_permission_mode", fields).await?;
        self.permissions.write().await.set_mode(mode);
        Ok(())
    }

    pub async fn set_max_thinking_tokens(&self, tokens: Option<u32>) -> Result<(), ClaudeAgentError> {
        self.require_initialized("set_max_thinking_tokens")?;
        let mut fields = Map::new();
        fields.insert("maxThinkingTokens".into(), tokens.map(Value::from).unwrap_or(Value::Null));
        self.transport.control().request("set_max_thinking_tokens", fields).await?;
        Ok(())
    }

    /// Revert tracked files to their state as of `message_id`. Requires
    /// `enable_file_checkpointing` to have been set at connect time.
    pub async fn rewind_files(&self, message_id: impl Into<String>) -> Result<(), ClaudeAgentError> {
        self.require_initialized("rewind_files")?;
        if !self.enable_file_checkpointing {
            return Err(ClaudeAgentError::Configuration {
                field: "enable_file_checkpointing".into(),
                value: "rewind_files requires file checkpointing to have been enabled at connect time".into(),
            });
        }
        let mut fields = Map::new();
        fields.insert("messageId".into(), Value::String(message_id.into()));
        self.transport.control().request("rewind_files", fields).await?;
        Ok(())
    }

    /// Left stubbed, matching the open contract: always `NotImplemented`.
    pub async fn mcp_server_status(&self, _name: &str) -> Result<Value, ClaudeAgentError> {
        Err(ClaudeAgentError::NotImplemented("mcp_server_status".into()))
    }

    /// Tear down: cancels pending control requests, closes stdin, waits for
    /// the child within the default grace period, then kills it. Idempotent.
    pub async fn close(&self) -> Result<(), ClaudeAgentError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.transport.shutdown(ClaudeProcess::default_grace()).await
    }

    fn require_initialized(&self, operation: &'static str) -> Result<(), ClaudeAgentError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClaudeAgentError::Closed);
        }
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(ClaudeAgentError::Protocol {
                observed_type: operation.into(),
                reason: "protocol not yet initialized".into(),
            });
        }
        Ok(())
    }
}
