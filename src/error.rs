//! Typed error taxonomy for the crate (spec §7).
//!
//! Every variant carries the structured fields a caller needs to branch on
//! kind without string-matching `Display` output. [`ClaudeAgentError::kind`]
//! gives an `Is`/`As`-style discriminant for callers who only care which
//! bucket an error falls in.

use std::time::Duration;

use thiserror::Error;

/// Coarse-grained discriminant mirroring the taxonomy in spec §7, for callers
/// that want to branch on error kind without matching every field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CliNotFound,
    Connection,
    Timeout,
    Process,
    Parser,
    JsonDecode,
    MessageParse,
    Protocol,
    Configuration,
    Permission,
    Model,
    Query,
    Stream,
    Session,
    Client,
    Io,
    NotImplemented,
    Cancelled,
    Closed,
}

#[derive(Debug, Error)]
pub enum ClaudeAgentError {
    #[error("could not locate the `{command}` executable (searched: {path:?}); {suggestions}")]
    CliNotFound {
        command: String,
        path: Option<String>,
        suggestions: String,
    },

    #[error("connection to child process failed: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("operation `{operation}` timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("process error (pid={pid:?}, command={command:?}, signal={signal:?}): {stderr_tail}")]
    Process {
        pid: Option<u32>,
        command: String,
        signal: Option<String>,
        stderr_tail: String,
    },

    #[error("JSON syntax error at line {line}, offset {offset}: {reason} (near `{preview}`)")]
    Parser {
        line: usize,
        offset: usize,
        preview: String,
        reason: String,
    },

    #[error("field-level decode error at line {line}: {reason}")]
    JsonDecode { line: usize, reason: String },

    #[error("message of declared type `{expected_type}` had an unexpected shape: {reason}")]
    MessageParse {
        expected_type: String,
        data: serde_json::Value,
        reason: String,
    },

    #[error("protocol violation: observed `{observed_type}`: {reason}")]
    Protocol {
        observed_type: String,
        reason: String,
    },

    #[error("invalid configuration for `{field}`: {value}")]
    Configuration { field: String, value: String },

    #[error("permission denied for tool `{tool}` ({operation}){}", .path.as_deref().map(|p| format!(" on {p}")).unwrap_or_default())]
    Permission {
        tool: String,
        path: Option<String>,
        operation: String,
    },

    #[error("model `{observed}` unavailable (supported: {supported:?})")]
    Model {
        observed: String,
        supported: Vec<String>,
    },

    #[error("query failed: {context}")]
    Query {
        context: String,
        #[source]
        source: Box<ClaudeAgentError>,
    },

    #[error("stream error: {context}")]
    Stream {
        context: String,
        #[source]
        source: Box<ClaudeAgentError>,
    },

    #[error("session `{session_id:?}` error: {context}")]
    Session {
        session_id: Option<String>,
        context: String,
        #[source]
        source: Box<ClaudeAgentError>,
    },

    #[error("client error: {context}")]
    Client {
        context: String,
        #[source]
        source: Box<ClaudeAgentError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("session is closed")]
    Closed,
}

impl ClaudeAgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CliNotFound { .. } => ErrorKind::CliNotFound,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Process { .. } => ErrorKind::Process,
            Self::Parser { .. } => ErrorKind::Parser,
            Self::JsonDecode { .. } => ErrorKind::JsonDecode,
            Self::MessageParse { .. } => ErrorKind::MessageParse,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Permission { .. } => ErrorKind::Permission,
            Self::Model { .. } => ErrorKind::Model,
            Self::Query { .. } => ErrorKind::Query,
            Self::Stream { .. } => ErrorKind::Stream,
            Self::Session { .. } => ErrorKind::Session,
            Self::Client { .. } => ErrorKind::Client,
            Self::Io(_) => ErrorKind::Io,
            Self::NotImplemented(_) => ErrorKind::NotImplemented,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Closed => ErrorKind::Closed,
        }
    }

    /// `true` for conditions a caller could plausibly retry (timeouts,
    /// connection hiccups) as opposed to ones that require a code/config
    /// change (configuration, permission, message_parse).
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Connection)
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Client {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub(crate) fn session_context(self, session_id: Option<String>, context: impl Into<String>) -> Self {
        Self::Session {
            session_id,
            context: context.into(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClaudeAgentError>;
