//! Control-plane multiplexer (spec §4.5).
//!
//! Outbound control requests (`interrupt`, `set_model`, `set_permission_mode`,
//! `rewind_files`, `mcp_server_status`, ...) share the same stdio pipe as the
//! turn-by-turn data plane. Each request is tagged with a unique id; when the
//! matching `control_response` frame comes back off the data plane it's
//! routed here instead of surfacing as a regular [`crate::types::Message`].
//!
//! Grounded in the request/id-correlation pattern used for the JSON-RPC
//! transport in the `claudeless` CLI (`AtomicU64` ids, a pending-request map,
//! a `Mutex`-guarded writer) — adapted from client/server RPC framing to a
//! pipe already carrying an independent message stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::ClaudeAgentError;
use crate::process::ClaudeProcess;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ControlOutcome>>>>;

/// The resolved result of one control-plane round trip.
#[derive(Debug, Clone)]
pub(crate) enum ControlOutcome {
    Success(Option<serde_json::Value>),
    Error(String),
}

/// Multiplexes control requests over a process's stdin, matching responses
/// observed on the data plane by request id.
pub(crate) struct ControlPlane {
    process: Arc<ClaudeProcess>,
    pending: PendingMap,
}

impl ControlPlane {
    pub(crate) fn new(process: Arc<ClaudeProcess>) -> Self {
        Self {
            process,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Send a control request and await its response, or time out.
    ///
    /// `subtype` names the operation (`"interrupt"`, `"set_model"`, ...);
    /// `fields` carries the operation-specific payload merged into the
    /// request envelope.
    pub(crate) async fn request(
        &self,
        subtype: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Option<serde_json::Value>, ClaudeAgentError> {
        self.request_with_timeout(subtype, fields, DEFAULT_TIMEOUT).await
    }

    pub(crate) async fn request_with_timeout(
        &self,
        subtype: &str,
        mut fields: serde_json::Map<String, serde_json::Value>,
        deadline: Duration,
    ) -> Result<Option<serde_json::Value>, ClaudeAgentError> {
        let request_id = Uuid::new_v4().to_string();
        fields.insert("subtype".into(), subtype.into());
        fields.insert("request_id".into(), request_id.clone().into());
        fields.insert("type".into(), "control_request".into());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        let line = serde_json::to_string(&fields).map_err(|e| ClaudeAgentError::Configuration {
            field: "control_request".into(),
            value: e.to_string(),
        })?;

        if let Err(e) = self.process.write_line(&line).await {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match timeout(deadline, rx).await {
            Ok(Ok(ControlOutcome::Success(value))) => Ok(value),
            Ok(Ok(ControlOutcome::Error(message))) => Err(ClaudeAgentError::Protocol {
                observed_type: "control_response".into(),
                reason: message,
            }),
            Ok(Err(_canceled)) => Err(ClaudeAgentError::Cancelled),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(ClaudeAgentError::Timeout {
                    operation: format!("control_request:{subtype}"),
                    timeout: deadline,
                })
            }
        }
    }

    /// Route a `control_response` message observed on the data plane to its
    /// pending request, if any is still waiting. Responses with an unknown
    /// or already-resolved id are silently dropped — the caller may have
    /// given up after a timeout.
    pub(crate) async fn resolve(&self, request_id: &str, outcome: ControlOutcome) {
        if let Some(tx) = self.pending.lock().await.remove(request_id) {
            let _ = tx.send(outcome);
        }
    }

    /// Fail every outstanding request, used when the session closes or the
    /// process dies out from under the control plane.
    pub(crate) async fn cancel_all(&self) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(ControlOutcome::Error("session closed".into()));
        }
    }

    pub(crate) async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Run a control-plane handler inside a task so a panicking handler can't
/// take the caller's task down with it; surfaced as a `Protocol` error.
pub(crate) async fn run_guarded<F, T>(label: impl Into<String>, fut: F) -> Result<T, ClaudeAgentError>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(fut);
    handle.await.map_err(|join_err| ClaudeAgentError::Protocol {
        observed_type: label.into(),
        reason: format!("control handler panicked: {join_err}"),
    })
}
