//! `claude-agent` — native Rust driver for the `claude` CLI subprocess.
//!
//! This crate embeds the assistant CLI as a long-lived child process and
//! exposes it to host applications as a typed, streaming, session-oriented
//! conversation API. The underlying wire protocol is newline-delimited JSON
//! on the child's stdio, with a request/response control plane (`initialize`,
//! `interrupt`, `set_model`, `can_use_tool`, `hook_callback`, `mcp_message`, …)
//! multiplexed onto the same pipe as the turn-by-turn message stream.
//!
//! # Architecture
//!
//! ```text
//! SessionOptions
//!     │
//!     ▼
//! ClaudeProcess     ← spawns the child, owns its stdio pipes (process.rs)
//!     │
//!     ▼
//! JsonLineFramer    ← newline-delimited JSON reassembly, line tracking (framer.rs)
//!     │
//!     ▼
//! MessageRegistry   ← type-keyed decode into `Message`, forward-compatible (parser.rs)
//!     │
//!     ▼
//! Transport         ← splits data plane / control plane, routes inbound requests (transport.rs)
//!     │                  │
//!     │                  ├─ ControlPlane       (control.rs)     outbound request/response correlation
//!     │                  ├─ HookRegistry       (hooks.rs)       lifecycle + pre/post-tool-use hooks
//!     │                  ├─ ToolServerRegistry (tools.rs)       in-process MCP-style tool servers
//!     │                  └─ PermissionEngine   (permission.rs)  can_use_tool decisions
//!     ▼
//! Session / MessageIterator  ← host-facing façades (session.rs, query.rs)
//! ```
//!
//! # Quick start
//!
//! One-shot query:
//!
//! ```rust,ignore
//! use claude_agent::{query, Message, QueryOptions};
//! use futures::StreamExt;
//!
//! let mut stream = query("Write a hello-world Rust function.", QueryOptions::default())?;
//! while let Some(msg) = stream.next().await {
//!     if let Message::Result(r) = msg? {
//!         println!("{}", r.result_text().unwrap_or(""));
//!     }
//! }
//! # Ok::<(), claude_agent::ClaudeAgentError>(())
//! ```
//!
//! Resumable session:
//!
//! ```rust,ignore
//! use claude_agent::{Session, SessionOptions};
//! use futures::StreamExt;
//!
//! let session = Session::connect(SessionOptions::default()).await?;
//! session.send("hi").await?;
//! let mut turn = session.receive().await?;
//! while let Some(msg) = turn.next().await {
//!     let _ = msg?;
//! }
//! session.close().await?;
//! # Ok::<(), claude_agent::ClaudeAgentError>(())
//! ```

pub mod control;
pub mod error;
pub mod framer;
pub mod hooks;
pub mod parser;
pub mod permission;
pub mod query;
pub mod session;
pub mod tools;
pub mod types;
pub mod validator;

pub(crate) mod process;
pub(crate) mod transport;

#[cfg(test)]
mod tests;

pub use error::{ClaudeAgentError, ErrorKind};
pub use hooks::{HookCallback, HookContext, HookDecision, HookEvent, HookOutcome, HookRegistry};
pub use permission::{PermissionCallback, PermissionDecision, PermissionMode, PermissionRequest};
pub use query::{query, MessageIterator};
pub use session::Session;
pub use tools::{ToolDefinition, ToolHandler, ToolOutcome, ToolServer, ToolServerRegistry};
pub use types::{
    AssistantContent, AssistantMessage, ContentBlock, Effort, McpServerConfig, Message,
    PermissionDenial, PermissionUpdate, PromptInput, QueryOptions, ResultError, ResultMessage,
    ResultSuccess, SessionOptions, StreamEventMessage, SystemInit, SystemMessage, SystemPayload,
    TokenUsage, ToolResultContent, UserMessage,
};
pub use validator::{StreamValidator, ValidationIssue};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ClaudeAgentError>;
