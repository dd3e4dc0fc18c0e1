//! Permission engine (spec §4.7).
//!
//! Decides whether a tool call proceeds before it reaches the child's own
//! permission prompt. Five steps, in priority order, the first applicable
//! one wins:
//!
//! 1. `bypassPermissions` mode — always allow.
//! 2. `acceptEdits` mode — allow if the tool is a recognized file-editing
//!    tool.
//! 3. `plan` mode — deny every tool call outright (the session is read-only
//!    by construction; there is no read-only-tool exception).
//! 4. `dontAsk` mode — allow if a static allow-rule matches, deny otherwise.
//! 5. Otherwise, defer to the host's `can_use_tool` callback, if one was
//!    registered; with none registered, default to allow (the child's own
//!    permission system remains the backstop).

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::types::PermissionUpdate;
pub use crate::types::PermissionMode;

const EDIT_TOOLS: &[&str] = &["Edit", "Write", "MultiEdit", "NotebookEdit"];

/// The full `can_use_tool` callback payload the CLI sends over the control
/// plane.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub input: serde_json::Value,
    pub tool_use_id: Option<String>,
    pub agent_id: Option<String>,
    /// Path the tool would touch, if the CLI judged one relevant (e.g. a
    /// file write outside the allowed directories).
    pub blocked_path: Option<String>,
    /// Rule changes the CLI is itself proposing, surfaced for a host that
    /// wants to offer them to a human reviewer.
    pub suggestions: Vec<PermissionUpdate>,
}

/// A decision for one `can_use_tool` request.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDecision {
    /// Allow, optionally replacing the tool's input before it runs.
    Allow { updated_input: Option<serde_json::Value> },
    /// Deny. `interrupt` asks the child to abandon the current turn rather
    /// than merely skip this one tool call.
    Deny { reason: String, interrupt: bool },
    /// Neither allow nor deny outright — propose rule changes for the host
    /// (or the CLI's own interactive prompt) to resolve.
    Ask { updates: Vec<PermissionUpdate> },
}

impl PermissionDecision {
    pub fn allow() -> Self {
        PermissionDecision::Allow { updated_input: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        PermissionDecision::Deny {
            reason: reason.into(),
            interrupt: false,
        }
    }
}

pub type PermissionCallback =
    Arc<dyn Fn(PermissionRequest) -> BoxFuture<'static, PermissionDecision> + Send + Sync>;

/// A static `(tool glob, allow)` rule used by `dontAsk` mode. `tool` may be
/// `"*"` to match every tool.
#[derive(Debug, Clone)]
pub struct AllowRule {
    pub tool: String,
}

pub struct PermissionEngine {
    mode: PermissionMode,
    allow_rules: Vec<AllowRule>,
    callback: Option<PermissionCallback>,
}

impl PermissionEngine {
    pub fn new(mode: PermissionMode) -> Self {
        Self {
            mode,
            allow_rules: Vec::new(),
            callback: None,
        }
    }

    pub fn with_allow_rules(mut self, rules: Vec<AllowRule>) -> Self {
        self.allow_rules = rules;
        self
    }

    pub fn with_callback(mut self, callback: PermissionCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PermissionMode) {
        self.mode = mode;
    }

    /// Run the five-step decision chain for one tool call.
    pub async fn decide(&self, request: PermissionRequest) -> PermissionDecision {
        // 1. bypassPermissions always wins.
        if self.mode == PermissionMode::BypassPermissions {
            return PermissionDecision::allow();
        }

        // 2. acceptEdits allows the edit-tool set outright.
        if self.mode == PermissionMode::AcceptEdits && is_edit_tool(&request.tool_name) {
            return PermissionDecision::allow();
        }

        // 3. plan mode denies every tool call outright.
        if self.mode == PermissionMode::Plan {
            return PermissionDecision::deny("plan mode");
        }

        // 4. dontAsk denies unless a static allow rule matches.
        if self.mode == PermissionMode::DontAsk {
            return if self.matches_allow_rule(&request.tool_name) {
                PermissionDecision::allow()
            } else {
                PermissionDecision::deny("dontAsk mode: no matching allow rule")
            };
        }

        // 5. Defer to the host callback; no callback registered defaults to
        // allow, leaving the child's own permission system as backstop.
        match &self.callback {
            Some(callback) => callback(request).await,
            None => PermissionDecision::allow(),
        }
    }

    fn matches_allow_rule(&self, tool_name: &str) -> bool {
        self.allow_rules
            .iter()
            .any(|rule| rule.tool == "*" || rule.tool == tool_name)
    }
}

fn is_edit_tool(tool_name: &str) -> bool {
    EDIT_TOOLS.contains(&tool_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tool: &str) -> PermissionRequest {
        PermissionRequest {
            tool_name: tool.into(),
            input: serde_json::json!({}),
            tool_use_id: None,
            agent_id: None,
            blocked_path: None,
            suggestions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn bypass_permissions_allows_everything() {
        let engine = PermissionEngine::new(PermissionMode::BypassPermissions);
        let decision = engine.decide(request("Bash")).await;
        assert_eq!(decision, PermissionDecision::allow());
    }

    #[tokio::test]
    async fn accept_edits_allows_edit_tools_only() {
        let engine = PermissionEngine::new(PermissionMode::AcceptEdits);
        assert_eq!(engine.decide(request("Write")).await, PermissionDecision::allow());
        assert_eq!(
            engine.decide(request("Bash")).await,
            PermissionDecision::allow() // no callback registered -> defers to allow
        );
    }

    #[tokio::test]
    async fn plan_mode_denies_every_tool_call() {
        let engine = PermissionEngine::new(PermissionMode::Plan);
        for tool in ["Read", "Write", "Bash"] {
            match engine.decide(request(tool)).await {
                PermissionDecision::Deny { reason, .. } => assert_eq!(reason, "plan mode"),
                _ => panic!("expected Deny in plan mode for {tool}"),
            }
        }
    }

    #[tokio::test]
    async fn dont_ask_mode_honors_static_allow_rules() {
        let engine = PermissionEngine::new(PermissionMode::DontAsk).with_allow_rules(vec![AllowRule {
            tool: "Read".into(),
        }]);
        assert_eq!(engine.decide(request("Read")).await, PermissionDecision::allow());
    }

    #[tokio::test]
    async fn dont_ask_mode_denies_without_a_matching_rule() {
        let engine = PermissionEngine::new(PermissionMode::DontAsk);
        match engine.decide(request("Bash")).await {
            PermissionDecision::Deny { .. } => {}
            _ => panic!("expected Deny when no allow rule matches in dontAsk mode"),
        }
    }

    #[tokio::test]
    async fn default_mode_defers_to_host_callback() {
        let engine = PermissionEngine::new(PermissionMode::Default).with_callback(Arc::new(|req| {
            Box::pin(async move {
                if req.tool_name == "Bash" {
                    PermissionDecision::Deny {
                        reason: "no shell access".into(),
                        interrupt: true,
                    }
                } else {
                    PermissionDecision::allow()
                }
            })
        }));

        match engine.decide(request("Bash")).await {
            PermissionDecision::Deny { reason, interrupt } => {
                assert_eq!(reason, "no shell access");
                assert!(interrupt);
            }
            _ => panic!("expected Deny"),
        }
        assert_eq!(engine.decide(request("Read")).await, PermissionDecision::allow());
    }

    #[tokio::test]
    async fn default_mode_with_no_callback_allows() {
        let engine = PermissionEngine::new(PermissionMode::Default);
        assert_eq!(engine.decide(request("Bash")).await, PermissionDecision::allow());
    }

    #[tokio::test]
    async fn callback_can_propose_updates_without_deciding() {
        let engine = PermissionEngine::new(PermissionMode::Default).with_callback(Arc::new(|_req| {
            Box::pin(async move {
                PermissionDecision::Ask {
                    updates: vec![PermissionUpdate {
                        tool_name: "Bash".into(),
                        behavior: Some("allow".into()),
                        rule: Some("Bash(git *)".into()),
                    }],
                }
            })
        }));

        match engine.decide(request("Bash")).await {
            PermissionDecision::Ask { updates } => assert_eq!(updates.len(), 1),
            _ => panic!("expected Ask"),
        }
    }
}
