//! Hook registry.
//!
//! Hosts register callbacks against an event name and an optional
//! tool-name-matching regex; when the child issues a `hook_callback` control
//! request the registry runs every matching hook (bounded concurrency), then
//! folds their individual decisions into one: a `block` decision wins;
//! `system_message` and `reason` concatenate; `continue` defaults true
//! unless some handler says otherwise; `suppress_output` is OR-reduced. A
//! malformed matcher regex fails open (matches nothing) rather than
//! panicking the whole session. A hook that overruns its deadline is
//! treated as a silent allow rather than stalling the turn.
//!
//! Grounded in the global-registry shape of `codex-hooks`'
//! `HookManager`/`static HOOK_MANAGER: Lazy<RwLock<...>>` (manager.rs),
//! adapted from a phase/priority `BTreeMap` dispatch table to the
//! event+tool-regex matcher this SDK's hook events call for.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::timeout;

use crate::error::ClaudeAgentError;

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// The hook lifecycle events the CLI can report (spec §4.6's full list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    UserPromptSubmit,
    Notification,
    Stop,
    SubagentStart,
    SubagentStop,
    PreCompact,
    SessionStart,
    SessionEnd,
    PermissionRequest,
}

impl HookEvent {
    /// The wire spelling the CLI uses in `hook_callback`'s `event` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreToolUse => "pre_tool_use",
            HookEvent::PostToolUse => "post_tool_use",
            HookEvent::PostToolUseFailure => "post_tool_use_failure",
            HookEvent::UserPromptSubmit => "user_prompt_submit",
            HookEvent::Notification => "notification",
            HookEvent::Stop => "stop",
            HookEvent::SubagentStart => "subagent_start",
            HookEvent::SubagentStop => "subagent_stop",
            HookEvent::PreCompact => "pre_compact",
            HookEvent::SessionStart => "session_start",
            HookEvent::SessionEnd => "session_end",
            HookEvent::PermissionRequest => "permission_request",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pre_tool_use" => HookEvent::PreToolUse,
            "post_tool_use" => HookEvent::PostToolUse,
            "post_tool_use_failure" => HookEvent::PostToolUseFailure,
            "user_prompt_submit" => HookEvent::UserPromptSubmit,
            "notification" => HookEvent::Notification,
            "stop" => HookEvent::Stop,
            "subagent_start" => HookEvent::SubagentStart,
            "subagent_stop" => HookEvent::SubagentStop,
            "pre_compact" => HookEvent::PreCompact,
            "session_start" => HookEvent::SessionStart,
            "session_end" => HookEvent::SessionEnd,
            "permission_request" => HookEvent::PermissionRequest,
            _ => return None,
        })
    }
}

/// Context handed to a hook callback.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub event: HookEvent,
    pub tool_name: Option<String>,
    pub session_id: Option<String>,
    pub payload: serde_json::Value,
}

/// One hook's verdict. `r#continue: None` means "no opinion" — the merge
/// step treats an all-`None` fan-out as `continue = true`.
#[derive(Debug, Clone, Default)]
pub struct HookDecision {
    pub block: bool,
    pub reason: Option<String>,
    pub system_message: Option<String>,
    pub suppress_output: bool,
    pub updated_input: Option<serde_json::Value>,
    pub r#continue: Option<bool>,
}

impl HookDecision {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            block: true,
            reason: Some(reason.into()),
            r#continue: Some(false),
            ..Default::default()
        }
    }
}

/// The folded result of running every hook that matched one `trigger()` call.
#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    pub blocked: bool,
    pub reason: Option<String>,
    pub system_message: Option<String>,
    pub r#continue: bool,
    pub suppress_output: bool,
    pub updated_input: Option<serde_json::Value>,
}

pub type HookCallback =
    Arc<dyn Fn(HookContext) -> futures::future::BoxFuture<'static, HookDecision> + Send + Sync>;

struct RegisteredHook {
    event: HookEvent,
    /// Regex matched against the reported tool name; `None` matches every
    /// tool (or events with no associated tool, like `SessionStart`).
    matcher: Option<Regex>,
    callback: HookCallback,
    /// Per-hook deadline override (spec §4.5: "30s default, overridable per
    /// hook"); `None` falls back to `DEFAULT_HOOK_TIMEOUT`.
    timeout: Option<Duration>,
}

/// Registry of hook callbacks, with bounded concurrency across a single
/// `trigger()` fan-out so a pathological host config can't spawn unbounded
/// tasks per tool call.
pub struct HookRegistry {
    hooks: RwLock<Vec<RegisteredHook>>,
    concurrency: Semaphore,
}

const DEFAULT_CONCURRENCY: usize = 8;

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
            concurrency: Semaphore::new(DEFAULT_CONCURRENCY),
        }
    }

    /// Register a hook for `event`, optionally restricted to tool names
    /// matching `tool_pattern` and with an optional per-hook `timeout`
    /// overriding `DEFAULT_HOOK_TIMEOUT` (spec §4.5/§6.3:
    /// `RegisterHook(event, matcher, handler, timeout?)`). An invalid
    /// pattern is logged and treated as "never matches" rather than
    /// returned as an error — a typo in a host's hook config shouldn't take
    /// the whole session down.
    pub async fn register(
        &self,
        event: HookEvent,
        tool_pattern: Option<&str>,
        callback: HookCallback,
        timeout: Option<Duration>,
    ) {
        let matcher = tool_pattern.and_then(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "invalid hook tool matcher regex, hook will never fire");
                // A regex that cannot match anything: fails open by
                // excluding every event from matching, which is the
                // intended "typo disables this one hook" behavior.
                Regex::new(r"^\b\B$").ok()
            }
        });

        self.hooks.write().await.push(RegisteredHook {
            event,
            matcher,
            callback,
            timeout,
        });
    }

    /// Run every hook matching `ctx.event` (and `ctx.tool_name`, if the hook
    /// has a matcher), concurrently up to the registry's concurrency bound,
    /// then merge their decisions.
    pub async fn trigger(&self, ctx: HookContext) -> Result<HookOutcome, ClaudeAgentError> {
        let hooks = self.hooks.read().await;
        let matching: Vec<&RegisteredHook> = hooks
            .iter()
            .filter(|h| h.event == ctx.event)
            .filter(|h| match (&h.matcher, &ctx.tool_name) {
                (None, _) => true,
                (Some(re), Some(tool)) => re.is_match(tool),
                (Some(_), None) => false,
            })
            .collect();

        if matching.is_empty() {
            return Ok(HookOutcome {
                r#continue: true,
                ..Default::default()
            });
        }

        let mut tasks = Vec::with_capacity(matching.len());
        for hook in matching {
            let permit = self
                .concurrency
                .acquire()
                .await
                .map_err(|_| ClaudeAgentError::Cancelled)?;
            let callback = hook.callback.clone();
            let deadline = hook.timeout.unwrap_or(DEFAULT_HOOK_TIMEOUT);
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                timeout(deadline, callback(ctx)).await
            }));
        }

        let mut outcome = HookOutcome::default();
        let mut continue_votes: Vec<bool> = Vec::new();
        for task in tasks {
            let decision = match task.await.map_err(|e| ClaudeAgentError::Protocol {
                observed_type: "hook_callback".into(),
                reason: format!("hook callback panicked: {e}"),
            })? {
                Ok(decision) => decision,
                Err(_elapsed) => {
                    tracing::warn!("hook callback exceeded its deadline, treating as allow");
                    HookDecision::allow()
                }
            };
            merge_decision(&mut outcome, &mut continue_votes, decision);
        }

        outcome.r#continue = !continue_votes.contains(&false);
        Ok(outcome)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_decision(outcome: &mut HookOutcome, continue_votes: &mut Vec<bool>, decision: HookDecision) {
    if decision.block {
        outcome.blocked = true;
    }
    if let Some(reason) = decision.reason {
        outcome.reason = Some(match outcome.reason.take() {
            Some(existing) => format!("{existing}; {reason}"),
            None => reason,
        });
    }
    if let Some(msg) = decision.system_message {
        outcome.system_message = Some(match outcome.system_message.take() {
            Some(existing) => format!("{existing}\n{msg}"),
            None => msg,
        });
    }
    if decision.suppress_output {
        outcome.suppress_output = true;
    }
    if let Some(input) = decision.updated_input {
        outcome.updated_input = Some(input);
    }
    if let Some(v) = decision.r#continue {
        continue_votes.push(v);
    }
    if decision.block {
        continue_votes.push(false);
    }
}

/// Process-wide default registry, mirroring `codex-hooks`' global
/// `HOOK_MANAGER` singleton. [`crate::session::Session`] uses this unless a
/// caller supplies its own registry.
static DEFAULT_REGISTRY: Lazy<Arc<HookRegistry>> = Lazy::new(|| Arc::new(HookRegistry::new()));

pub fn default_registry() -> Arc<HookRegistry> {
    DEFAULT_REGISTRY.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow_hook() -> HookCallback {
        Arc::new(|_ctx| Box::pin(async { HookDecision::allow() }))
    }

    fn block_hook(reason: &'static str) -> HookCallback {
        Arc::new(move |_ctx| Box::pin(async move { HookDecision::block(reason) }))
    }

    fn ctx(event: HookEvent, tool_name: Option<&str>) -> HookContext {
        HookContext {
            event,
            tool_name: tool_name.map(String::from),
            session_id: None,
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn event_wire_names_round_trip() {
        for event in [
            HookEvent::PreToolUse,
            HookEvent::PostToolUse,
            HookEvent::PostToolUseFailure,
            HookEvent::UserPromptSubmit,
            HookEvent::Notification,
            HookEvent::Stop,
            HookEvent::SubagentStart,
            HookEvent::SubagentStop,
            HookEvent::PreCompact,
            HookEvent::SessionStart,
            HookEvent::SessionEnd,
            HookEvent::PermissionRequest,
        ] {
            assert_eq!(HookEvent::from_str(event.as_str()), Some(event));
        }
    }

    #[tokio::test]
    async fn no_matching_hooks_continues() {
        let registry = HookRegistry::new();
        let outcome = registry.trigger(ctx(HookEvent::PreToolUse, Some("Bash"))).await.unwrap();
        assert!(outcome.r#continue);
        assert!(!outcome.blocked);
    }

    #[tokio::test]
    async fn tool_name_regex_filters_hooks() {
        let registry = HookRegistry::new();
        registry
            .register(HookEvent::PreToolUse, Some("^Bash$"), block_hook("no bash"), None)
            .await;

        let blocked = registry.trigger(ctx(HookEvent::PreToolUse, Some("Bash"))).await.unwrap();
        assert!(blocked.blocked);

        let allowed = registry.trigger(ctx(HookEvent::PreToolUse, Some("Read"))).await.unwrap();
        assert!(!allowed.blocked);
    }

    #[tokio::test]
    async fn block_wins_and_messages_concatenate() {
        let registry = HookRegistry::new();
        registry.register(HookEvent::PreToolUse, None, allow_hook(), None).await;
        registry
            .register(HookEvent::PreToolUse, None, block_hook("policy violation"), None)
            .await;

        let outcome = registry.trigger(ctx(HookEvent::PreToolUse, Some("Bash"))).await.unwrap();
        assert!(outcome.blocked);
        assert!(!outcome.r#continue);
        assert_eq!(outcome.reason.as_deref(), Some("policy violation"));
    }

    #[tokio::test]
    async fn suppress_output_is_or_reduced() {
        let registry = HookRegistry::new();
        registry
            .register(
                HookEvent::PostToolUse,
                None,
                Arc::new(|_ctx| Box::pin(async { HookDecision::allow() })),
                None,
            )
            .await;
        registry
            .register(
                HookEvent::PostToolUse,
                None,
                Arc::new(|_ctx| {
                    Box::pin(async {
                        HookDecision {
                            suppress_output: true,
                            ..HookDecision::allow()
                        }
                    })
                }),
                None,
            )
            .await;

        let outcome = registry.trigger(ctx(HookEvent::PostToolUse, Some("Bash"))).await.unwrap();
        assert!(outcome.suppress_output);
        assert!(outcome.r#continue);
    }

    #[tokio::test]
    async fn invalid_regex_fails_open_never_matching() {
        let registry = HookRegistry::new();
        registry
            .register(HookEvent::PreToolUse, Some("(unterminated"), block_hook("should never fire"), None)
            .await;

        let outcome = registry.trigger(ctx(HookEvent::PreToolUse, Some("Bash"))).await.unwrap();
        assert!(!outcome.blocked);
    }

    #[tokio::test]
    async fn per_hook_timeout_override_fires_before_the_default_deadline() {
        let registry = HookRegistry::new();
        registry
            .register(
                HookEvent::PreToolUse,
                None,
                Arc::new(|_ctx| {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        HookDecision::block("too slow to matter")
                    })
                }),
                Some(Duration::from_millis(5)),
            )
            .await;

        let outcome = registry.trigger(ctx(HookEvent::PreToolUse, Some("Bash"))).await.unwrap();
        // The hook's own deadline (5ms) elapses well before it resolves
        // (50ms), so it's treated as an allow rather than the global 30s
        // default masking the override.
        assert!(!outcome.blocked);
    }
}
