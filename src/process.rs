//! Child process supervisor (spec §4.2).
//!
//! Spawns and owns the `claude` CLI child. Two spawn shapes are supported:
//! a one-shot `--print` invocation with the prompt as the final positional
//! argument, and an interactive `--input-format stream-json` invocation whose
//! stdin stays open for the lifetime of a [`crate::session::Session`] so the
//! control plane can multiplex requests over the same pipe as user turns.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, ChildStdin, ChildStdout};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

use crate::error::ClaudeAgentError;
use crate::types::{Effort, McpServerConfig, PermissionMode, SessionOptions};

const DEFAULT_GRACE: Duration = Duration::from_secs(5);

#[cfg(unix)]
const DEFAULT_EXECUTABLE_NAME: &str = "claude";
#[cfg(windows)]
const DEFAULT_EXECUTABLE_NAME: &str = "claude.exe";

/// How the child is invoked: a single turn vs. a long-lived stdin stream.
pub(crate) enum SpawnMode<'a> {
    /// `claude --print --output-format stream-json <prompt>`, stdin closed.
    OneShot { prompt: &'a str },
    /// `claude --input-format stream-json --output-format stream-json`,
    /// stdin stays open for turn and control-plane messages.
    Interactive,
}

/// A running `claude` subprocess plus the plumbing needed to talk to it.
///
/// The child itself lives behind a [`Mutex`] rather than requiring `&mut
/// self` so a single [`ClaudeProcess`] can be shared as an `Arc` between the
/// transport's reader task, the control plane, and `Session::close` without
/// each needing exclusive ownership.
pub(crate) struct ClaudeProcess {
    child: Mutex<Child>,
    pid: Option<u32>,
    stdin: Option<Arc<Mutex<ChildStdin>>>,
    stdout: Option<ChildStdout>,
    command_display: String,
    stderr_tail: Arc<Mutex<Vec<String>>>,
}

impl ClaudeProcess {
    pub(crate) fn spawn(mode: SpawnMode<'_>, opts: &SessionOptions) -> Result<Self, ClaudeAgentError> {
        let executable = resolve_executable(opts.path_to_executable.as_deref())?;
        let mut cmd = build_command(&executable, &mode, opts);
        // Present whether launched from a shell or from inside a running
        // Claude session — avoids the child mistaking this process for one.
        cmd.env_remove("CLAUDECODE");
        for (k, v) in &opts.env {
            cmd.env(k, v);
        }
        Self::from_command(cmd, matches!(mode, SpawnMode::Interactive))
    }

    #[cfg(test)]
    pub(crate) fn spawn_command(cmd: Command, interactive: bool) -> Result<Self, ClaudeAgentError> {
        Self::from_command(cmd, interactive)
    }

    fn from_command(mut cmd: Command, interactive: bool) -> Result<Self, ClaudeAgentError> {
        let command_display = format!("{:?}", cmd.as_std());
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if interactive {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|e| ClaudeAgentError::CliNotFound {
            command: command_display.clone(),
            path: env::var("PATH").ok(),
            suggestions: format!("install the CLI or set path_to_executable ({e})"),
        })?;

        let stdout = child.stdout.take();
        let stdin = child.stdin.take().map(|s| Arc::new(Mutex::new(s)));
        let stderr = child.stderr.take();
        let pid = child.id();

        let stderr_tail = Arc::new(Mutex::new(Vec::new()));
        if let Some(stderr) = stderr {
            spawn_stderr_reader(stderr, stderr_tail.clone());
        }

        Ok(Self {
            child: Mutex::new(child),
            pid,
            stdin,
            stdout,
            command_display,
            stderr_tail,
        })
    }

    /// Take ownership of the child's stdout for a [`crate::framer::JsonLineFramer`].
    pub(crate) fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// A cloneable, lock-guarded stdin writer. Interactive mode only.
    pub(crate) fn stdin_handle(&self) -> Option<Arc<Mutex<ChildStdin>>> {
        self.stdin.clone()
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn stderr_tail_text(&self) -> String {
        self.stderr_tail.lock().await.join("\n")
    }

    /// Write one already-serialized JSON line (newline included) to stdin,
    /// serialized behind the shared lock so concurrent turn/control writes
    /// never interleave mid-line.
    pub(crate) async fn write_line(&self, line: &str) -> Result<(), ClaudeAgentError> {
        let stdin = self
            .stdin
            .as_ref()
            .ok_or_else(|| ClaudeAgentError::Connection {
                message: "process was not spawned with an open stdin".into(),
                source: None,
            })?;
        let mut guard = stdin.lock().await;
        guard
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ClaudeAgentError::Connection {
                message: "failed writing to child stdin".into(),
                source: Some(e),
            })?;
        if !line.ends_with('\n') {
            guard
                .write_all(b"\n")
                .await
                .map_err(|e| ClaudeAgentError::Connection {
                    message: "failed writing newline to child stdin".into(),
                    source: Some(e),
                })?;
        }
        guard.flush().await.map_err(|e| ClaudeAgentError::Connection {
            message: "failed flushing child stdin".into(),
            source: Some(e),
        })
    }

    /// Close stdin, wait for a graceful exit within `grace`, then escalate to
    /// `kill()`. Safe to call more than once — a second call finds stdin
    /// already dropped and the child already reaped, and simply observes the
    /// same successful exit again.
    pub(crate) async fn close(&self, grace: Duration) -> Result<(), ClaudeAgentError> {
        if let Some(stdin) = &self.stdin {
            let mut guard = stdin.lock().await;
            let _ = guard.shutdown().await;
        }

        let mut child = self.child.lock().await;
        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                if status.success() {
                    Ok(())
                } else {
                    Err(ClaudeAgentError::Process {
                        pid: self.pid,
                        command: self.command_display.clone(),
                        signal: exit_signal(&status),
                        stderr_tail: self.stderr_tail_text().await,
                    })
                }
            }
            Ok(Err(e)) => Err(ClaudeAgentError::Io(e)),
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(ClaudeAgentError::Process {
                    pid: self.pid,
                    command: self.command_display.clone(),
                    signal: Some("SIGKILL (grace deadline exceeded)".into()),
                    stderr_tail: self.stderr_tail_text().await,
                })
            }
        }
    }

    /// Forceful, best-effort terminate; never fails.
    pub(crate) async fn kill(&self) {
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
        let _ = child.wait().await;
    }

    /// Block until the child has exited, without touching stdin. Used by the
    /// transport's reader loop once the child's stdout hits EOF, to tell an
    /// expected exit (the child closed its own stdout after finishing) apart
    /// from an abnormal one (it died mid-turn).
    pub(crate) async fn wait_after_stdout_eof(&self) -> Result<(), ClaudeAgentError> {
        let mut child = self.child.lock().await;
        match child.wait().await {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(ClaudeAgentError::Process {
                pid: self.pid,
                command: self.command_display.clone(),
                signal: exit_signal(&status),
                stderr_tail: self.stderr_tail_text().await,
            }),
            Err(e) => Err(ClaudeAgentError::Io(e)),
        }
    }

    pub(crate) fn default_grace() -> Duration {
        DEFAULT_GRACE
    }
}

fn exit_signal(status: &std::process::ExitStatus) -> Option<String> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(|s| format!("signal {s}"))
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

fn spawn_stderr_reader(stderr: tokio::process::ChildStderr, tail: Arc<Mutex<Vec<String>>>) {
    use tokio::io::{AsyncBufReadExt, BufReader};
    const MAX_LINES: usize = 50;
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "claude_agent::process", %line, "child stderr");
            let mut buf = tail.lock().await;
            buf.push(line);
            if buf.len() > MAX_LINES {
                let excess = buf.len() - MAX_LINES;
                buf.drain(0..excess);
            }
        }
    });
}

/// Resolve the executable to spawn: an explicit override always wins, then a
/// PATH search for the platform default name.
fn resolve_executable(explicit: Option<&str>) -> Result<PathBuf, ClaudeAgentError> {
    if let Some(explicit) = explicit {
        let path = PathBuf::from(explicit);
        if path.is_absolute() || path.components().count() > 1 {
            return Ok(path);
        }
        return search_path(explicit).ok_or_else(|| ClaudeAgentError::CliNotFound {
            command: explicit.to_string(),
            path: env::var("PATH").ok(),
            suggestions: "pass an absolute path_to_executable or add it to PATH".into(),
        });
    }

    search_path(DEFAULT_EXECUTABLE_NAME).ok_or_else(|| ClaudeAgentError::CliNotFound {
        command: DEFAULT_EXECUTABLE_NAME.to_string(),
        path: env::var("PATH").ok(),
        suggestions: "install the Claude CLI or set path_to_executable".into(),
    })
}

fn search_path(name: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

fn build_command(executable: &Path, mode: &SpawnMode<'_>, opts: &SessionOptions) -> Command {
    let mut cmd = Command::new(executable);
    cmd.arg("--output-format").arg("stream-json");

    match mode {
        SpawnMode::OneShot { .. } => {
            cmd.arg("--print");
        }
        SpawnMode::Interactive => {
            cmd.arg("--input-format").arg("stream-json").arg("--print");
        }
    }

    if opts.include_partial_messages {
        cmd.arg("--include-partial-messages");
    }

    if let Some(model) = &opts.model {
        cmd.arg("--model").arg(model);
    }

    if let Some(max_turns) = opts.max_turns {
        cmd.arg("--max-turns").arg(max_turns.to_string());
    }

    if let Some(budget) = opts.max_budget_usd {
        cmd.arg("--max-budget-usd").arg(budget.to_string());
    }

    if let Some(tokens) = opts.max_thinking_tokens {
        cmd.arg("--max-thinking-tokens").arg(tokens.to_string());
    }

    if let Some(effort) = &opts.effort {
        cmd.arg("--effort").arg(effort_flag(effort));
    }

    if !opts.allowed_tools.is_empty() {
        cmd.arg("--allowed-tools").arg(opts.allowed_tools.join(","));
    }

    if !opts.disallowed_tools.is_empty() {
        cmd.arg("--disallowed-tools").arg(opts.disallowed_tools.join(","));
    }

    if let Some(preset) = &opts.tool_preset {
        cmd.arg("--tools").arg(format!("preset:{preset}"));
    }

    if opts.permission_mode != PermissionMode::Default {
        cmd.arg("--permission-mode").arg(opts.permission_mode.as_str());
    }

    if let Some(sp) = &opts.system_prompt {
        cmd.arg("--system-prompt").arg(sp);
    }

    if let Some(append) = &opts.append_system_prompt {
        cmd.arg("--append-system-prompt").arg(append);
    }

    if let Some(resume) = &opts.resume {
        cmd.arg("--resume").arg(resume);
    }

    if opts.continue_conversation {
        cmd.arg("--continue");
    }

    if let Some(agent) = &opts.agent {
        cmd.arg("--agent").arg(agent);
    }

    for dir in &opts.additional_directories {
        cmd.arg("--add-dir").arg(dir);
    }

    if opts.enable_file_checkpointing {
        cmd.arg("--enable-file-checkpointing");
    }

    if opts.debug {
        cmd.arg("--debug");
    }

    if !opts.mcp_servers.is_empty() {
        if let Ok(json) = build_mcp_config_json(&opts.mcp_servers) {
            cmd.arg("--mcp-config").arg(json);
        }
    }

    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }

    if let SpawnMode::OneShot { prompt } = mode {
        cmd.arg(prompt);
    }

    cmd
}

fn effort_flag(effort: &Effort) -> &'static str {
    effort.as_str()
}

/// Serialise `McpServerConfig` entries into the JSON string expected by
/// `claude --mcp-config '...'`.
fn build_mcp_config_json(servers: &[McpServerConfig]) -> Result<String, serde_json::Error> {
    let mut mcp_servers = serde_json::Map::new();

    for srv in servers {
        let mut cfg = serde_json::Map::new();
        cfg.insert("type".into(), serde_json::Value::String("stdio".into()));
        cfg.insert("command".into(), serde_json::Value::String(srv.command.clone()));

        if !srv.args.is_empty() {
            cfg.insert(
                "args".into(),
                serde_json::Value::Array(srv.args.iter().cloned().map(serde_json::Value::String).collect()),
            );
        }

        if !srv.env.is_empty() {
            let env: serde_json::Map<String, serde_json::Value> = srv
                .env
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            cfg.insert("env".into(), serde_json::Value::Object(env));
        }

        mcp_servers.insert(srv.name.clone(), serde_json::Value::Object(cfg));
    }

    serde_json::to_string(&serde_json::json!({ "mcpServers": mcp_servers }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn script(lines: &[&str]) -> Command {
        let joined = lines.join("\\n");
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(format!("printf '{joined}\\n'"));
        cmd
    }

    #[tokio::test]
    async fn one_shot_process_reads_stdout_to_eof() {
        let cmd = script(&["{\"type\":\"result\",\"subtype\":\"success\"}"]);
        let mut proc = ClaudeProcess::spawn_command(cmd, false).unwrap();
        let stdout = proc.take_stdout().unwrap();
        let mut framer = crate::framer::JsonLineFramer::new(stdout);
        let frame = framer.next_frame().await.unwrap();
        assert!(frame.is_some());
        proc.close(Duration::from_secs(1)).await.ok();
    }

    #[test]
    fn resolve_executable_rejects_missing_explicit_path() {
        let err = resolve_executable(Some("/definitely/not/a/real/path/to/claude")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CliNotFound);
    }

    #[test]
    fn build_command_includes_model_and_resume_flags() {
        let mut opts = SessionOptions::default();
        opts.model = Some("claude-opus-4".into());
        opts.resume = Some("sess-123".into());
        let cmd = build_command(Path::new("claude"), &SpawnMode::Interactive, &opts);
        let args: Vec<String> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.windows(2).any(|w| w[0] == "--model" && w[1] == "claude-opus-4"));
        assert!(args.windows(2).any(|w| w[0] == "--resume" && w[1] == "sess-123"));
        assert!(args.contains(&"--input-format".to_string()));
    }

    #[test]
    fn one_shot_command_places_prompt_as_trailing_positional() {
        let opts = SessionOptions::default();
        let cmd = build_command(Path::new("claude"), &SpawnMode::OneShot { prompt: "hello" }, &opts);
        let args: Vec<String> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args.last().map(String::as_str), Some("hello"));
    }

    #[test]
    fn mcp_config_json_round_trips_through_serde() {
        let servers = vec![McpServerConfig {
            name: "fs".into(),
            command: "mcp-fs".into(),
            args: vec!["--root".into(), "/tmp".into()],
            env: HashMap::new(),
        }];
        let json = build_mcp_config_json(&servers).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["mcpServers"]["fs"]["command"], "mcp-fs");
    }
}
