//! Stream protocol validator (spec §3 / §8).
//!
//! Watches the decoded message stream for protocol violations the CLI
//! itself should never produce but a misbehaving or future version might:
//! a `tool_result` with no matching open `tool_use`, a `result` (or `user`
//! message) that closes/continues a turn that was never opened, or a second
//! `assistant` turn starting before the previous one's tool calls were all
//! resolved. Violations are reported, not fatal here — `observe` never drops
//! or rewrites a message — but a turn-pairing violation on a `result` is the
//! one §8 calls out by name ("must observe a `protocol` error"), so callers
//! such as [`crate::session::Session::receive`] turn that specific issue into
//! a terminal [`crate::error::ClaudeAgentError::Protocol`] on the stream
//! rather than only logging it.

use std::collections::HashSet;

use crate::types::{ContentBlock, Message, MessageContent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// A `tool_result` referenced a `tool_use_id` that was never opened, or
    /// was already closed.
    UnmatchedToolResult { tool_use_id: String },
    /// The stream ended (or a new turn began) while one or more `tool_use`
    /// blocks were still awaiting their `tool_result`.
    UnresolvedToolUse { tool_use_ids: Vec<String> },
    /// A message referenced a turn that was never opened by a preceding
    /// `assistant` message.
    TurnNotOpen { observed_type: String },
}

/// Tracks open `tool_use` ids across a conversation and flags pairing
/// violations as messages arrive.
#[derive(Debug, Default)]
pub struct StreamValidator {
    open_tool_uses: HashSet<String>,
    turn_open: bool,
}

impl StreamValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded message through the validator, returning any issues
    /// it raises. Call in message arrival order; this is pure bookkeeping,
    /// not a transform — the message stream passes through unchanged.
    pub fn observe(&mut self, message: &Message) -> Vec<ValidationIssue> {
        match message {
            Message::Assistant(assistant) => {
                self.turn_open = true;
                for block in &assistant.message.content {
                    if let ContentBlock::ToolUse { id, .. } = block {
                        self.open_tool_uses.insert(id.clone());
                    }
                }
                Vec::new()
            }
            Message::User(user) => {
                let mut issues = Vec::new();
                if !self.turn_open {
                    issues.push(ValidationIssue::TurnNotOpen {
                        observed_type: "user".into(),
                    });
                }
                if let MessageContent::Blocks(blocks) = &user.message.content {
                    for block in blocks {
                        if let ContentBlock::ToolResult { tool_use_id, .. } = block {
                            if !self.open_tool_uses.remove(tool_use_id) {
                                issues.push(ValidationIssue::UnmatchedToolResult {
                                    tool_use_id: tool_use_id.clone(),
                                });
                            }
                        }
                    }
                }
                issues
            }
            Message::Result(_) => {
                let mut issues = Vec::new();
                if !self.turn_open {
                    issues.push(ValidationIssue::TurnNotOpen {
                        observed_type: "result".into(),
                    });
                }
                if !self.open_tool_uses.is_empty() {
                    issues.push(ValidationIssue::UnresolvedToolUse {
                        tool_use_ids: self.open_tool_uses.drain().collect(),
                    });
                }
                self.turn_open = false;
                issues
            }
            _ => Vec::new(),
        }
    }

    pub fn has_open_tool_uses(&self) -> bool {
        !self.open_tool_uses.is_empty()
    }
}
