//! One-shot query façade (spec §4.8).
//!
//! Wraps a single-turn `claude --print` invocation as a `Stream` of
//! `Message`s: a dedicated child, a dedicated transport, one prompt supplied
//! at construction, no pending-send step and no control plane beyond
//! `interrupt`. Multi-turn conversations use [`crate::session::Session`]
//! instead — this is the convenience path for "ask once, read the answer".

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::RwLock;

use crate::error::ClaudeAgentError;
use crate::hooks::HookRegistry;
use crate::parser;
use crate::permission::PermissionEngine;
use crate::process::{ClaudeProcess, SpawnMode};
use crate::tools::ToolServerRegistry;
use crate::transport::{InboundContext, Transport};
use crate::types::{Message, QueryOptions};

/// Drive a single agentic query against the Claude CLI.
///
/// Returns a [`MessageIterator`] that yields [`Message`]s as they arrive from
/// the subprocess. The stream ends after the first [`Message::Result`] or on
/// process exit, and the child is reaped when the iterator is dropped.
pub fn query(prompt: impl Into<String>, opts: QueryOptions) -> Result<MessageIterator, ClaudeAgentError> {
    MessageIterator::spawn(prompt.into(), opts)
}

/// A single-turn stream of messages from a dedicated `claude --print` child.
pub struct MessageIterator {
    transport: Arc<Transport>,
    inner: Pin<Box<dyn Stream<Item = Result<Message, ClaudeAgentError>> + Send>>,
}

impl MessageIterator {
    fn spawn(prompt: String, opts: QueryOptions) -> Result<Self, ClaudeAgentError> {
        let process = ClaudeProcess::spawn(SpawnMode::OneShot { prompt: &prompt }, &opts)?;
        let inbound = InboundContext {
            hooks: Arc::new(HookRegistry::new()),
            tools: Arc::new(ToolServerRegistry::new()),
            permissions: Arc::new(RwLock::new(PermissionEngine::new(opts.permission_mode))),
        };
        let transport = Arc::new(Transport::spawn(process, parser::default_registry(), inbound));
        let inner = Box::pin(drain(transport.clone()));
        Ok(Self { transport, inner })
    }

    /// Interrupt the in-flight turn over the control plane, falling back to
    /// killing the child if the control-plane round trip fails.
    pub async fn interrupt(&self) -> Result<(), ClaudeAgentError> {
        match self.transport.control().request("interrupt", serde_json::Map::new()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                self.transport.process().kill().await;
                Ok(())
            }
        }
    }
}

fn drain(transport: Arc<Transport>) -> impl Stream<Item = Result<Message, ClaudeAgentError>> {
    futures::stream::unfold((transport, false), |(transport, done)| async move {
        if done {
            return None;
        }
        match transport.recv().await {
            Some(Ok(message)) => {
                let turn_over = matches!(message, Message::Result(_));
                Some((Ok(message), (transport, turn_over)))
            }
            Some(Err(e)) => Some((Err(e), (transport, true))),
            None => None,
        }
    })
}

impl Stream for MessageIterator {
    type Item = Result<Message, ClaudeAgentError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for MessageIterator {
    /// The one-shot child has no stdin to close, so there is nothing
    /// graceful to do on drop — only reap it so an abandoned iterator never
    /// leaves a zombie process behind.
    fn drop(&mut self) {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            transport.process().kill().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const RESULT_LINE: &str = r#"{"type":"result","subtype":"success","session_id":"s1","result":"hi","duration_ms":1,"duration_api_ms":1,"is_error":false,"num_turns":1,"stop_reason":"end_turn","total_cost_usd":0.0,"usage":{"input_tokens":1,"output_tokens":1}}"#;

    fn script_file(lines: &[&str]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        f
    }

    #[tokio::test]
    async fn one_shot_stream_yields_result_and_then_ends() {
        let script = script_file(&[RESULT_LINE]);
        let mut cmd = tokio::process::Command::new("cat");
        cmd.arg(script.path());
        let process = ClaudeProcess::spawn_command(cmd, false).unwrap();
        let inbound = InboundContext {
            hooks: Arc::new(HookRegistry::new()),
            tools: Arc::new(ToolServerRegistry::new()),
            permissions: Arc::new(RwLock::new(PermissionEngine::new(crate::types::PermissionMode::Default))),
        };
        let transport = Arc::new(Transport::spawn(process, parser::default_registry(), inbound));
        let mut iter = MessageIterator {
            inner: Box::pin(drain(transport.clone())),
            transport,
        };

        let first = iter.next().await.unwrap().unwrap();
        assert!(matches!(first, Message::Result(_)));
        assert!(iter.next().await.is_none());
    }
}
