//! In-process tool server registry (spec §4.6 / §6.1).
//!
//! Lets a host register Rust closures as MCP-style tools without spawning a
//! separate subprocess. Exposed to the child CLI as a JSON-RPC 2.0 endpoint
//! supporting `initialize`, `tools/list`, and `tools/call` — the same
//! request shapes an out-of-process MCP server would answer, grounded in the
//! `JsonRpcRequest`/`JsonRpcResponse` framing from `claudeless`'s
//! `mcp-transport.rs`.
//!
//! `tools/call` follows the MCP convention that a tool's own failure is a
//! *successful* JSON-RPC response carrying `{"isError": true, ...}` in its
//! result — only malformed requests (unknown method, missing tool) produce a
//! JSON-RPC error object.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::RwLock;

/// Result of running a tool: either its output content, or a tool-level
/// failure that should round-trip to the CLI as `isError: true`.
pub enum ToolOutcome {
    Success(Value),
    Failure(String),
}

pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ToolOutcome> + Send + Sync>;

#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// One in-process MCP-style server: a named bundle of tools.
pub struct ToolServer {
    name: String,
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_tool(&self, definition: ToolDefinition, handler: ToolHandler) {
        self.tools
            .write()
            .await
            .insert(definition.name.clone(), RegisteredTool { definition, handler });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Vec<ToolDefinition> {
        self.tools.read().await.values().map(|t| t.definition.clone()).collect()
    }

    async fn call(&self, tool_name: &str, arguments: Value) -> Option<ToolOutcome> {
        let handler = {
            let tools = self.tools.read().await;
            tools.get(tool_name).map(|t| t.handler.clone())
        }?;
        Some(handler(arguments).await)
    }
}

/// Registry of named [`ToolServer`]s, dispatching JSON-RPC 2.0 requests the
/// child CLI issues over the MCP stdio transport it spawns for in-process
/// servers (spec §6.1's `mcp_servers` of kind `"sdk"`).
pub struct ToolServerRegistry {
    servers: RwLock<HashMap<String, Arc<ToolServer>>>,
}

impl ToolServerRegistry {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_server(&self, server: Arc<ToolServer>) {
        self.servers.write().await.insert(server.name().to_string(), server);
    }

    /// Handle one JSON-RPC 2.0 request addressed to `server_name`, returning
    /// the full response envelope (always has `jsonrpc`/`id`; either
    /// `result` or `error`, never both).
    pub async fn handle_request(&self, server_name: &str, request: Value) -> Value {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();

        let server = {
            let servers = self.servers.read().await;
            servers.get(server_name).cloned()
        };
        let Some(server) = server else {
            return rpc_error(id, -32001, format!("no such tool server `{server_name}`"));
        };

        match method {
            "initialize" => rpc_result(
                id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "serverInfo": {"name": server.name(), "version": "0.1.0"},
                    "capabilities": {"tools": {}}
                }),
            ),
            "tools/list" => {
                let tools: Vec<Value> = server
                    .list()
                    .await
                    .into_iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "inputSchema": t.input_schema,
                        })
                    })
                    .collect();
                rpc_result(id, json!({ "tools": tools }))
            }
            "tools/call" => {
                let Some(params) = request.get("params") else {
                    return rpc_error(id, -32602, "missing params".into());
                };
                let Some(tool_name) = params.get("name").and_then(Value::as_str) else {
                    return rpc_error(id, -32602, "missing params.name".into());
                };
                let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

                match server.call(tool_name, arguments).await {
                    None => rpc_error(id, -32601, format!("no such tool `{tool_name}`")),
                    Some(ToolOutcome::Success(content)) => {
                        rpc_result(id, json!({ "content": content_blocks(content), "isError": false }))
                    }
                    Some(ToolOutcome::Failure(message)) => rpc_result(
                        id,
                        json!({ "content": [{"type": "text", "text": format!("Error: {message}")}], "isError": true }),
                    ),
                }
            }
            other => rpc_error(id, -32601, format!("unknown method `{other}`")),
        }
    }
}

impl Default for ToolServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape a handler's raw return value into an MCP `content` array.
///
/// A handler that already returns a content-block array (each element an
/// object with a `"type"` field) is passed through unchanged. A bare string
/// becomes a single text block with that string verbatim — not
/// `Value::to_string()`, which would wrap it in JSON quotes and turn `"5"`
/// into the literal text `"\"5\""`. Anything else (numbers, objects,
/// booleans, arrays that aren't already content blocks) is rendered through
/// `to_string()` into a single text block, same as before.
fn content_blocks(content: Value) -> Value {
    match content {
        Value::String(s) => json!([{"type": "text", "text": s}]),
        Value::Array(ref items) if !items.is_empty() && items.iter().all(is_content_block) => content,
        other => json!([{"type": "text", "text": other.to_string()}]),
    }
}

fn is_content_block(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str).is_some()
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: String) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}
