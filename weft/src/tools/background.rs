//! Background process sessions.
//!
//! Long-running commands are spawned detached and tracked in a
//! [`BackgroundRegistry`]. Each session keeps rolling stdout/stderr
//! buffers (capped at 1 MiB, truncated to the newest 512 KiB on
//! overflow) and stays queryable until `clear` or process exit.
//!
//! The registry is owned by whichever toolset created it; sessions are
//! keyed `bg-<unix-ms>-<6 base36 chars>`. Registry writes go through the
//! session's own lock, one writer at a time.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::tool::{Durability, Tool, ToolContext};

use super::RollingBuffer;
use super::shell::check_command;

/// Per-stream buffer cap.
const BUFFER_CAP: usize = 1024 * 1024;
/// Retained tail after overflow.
const BUFFER_KEEP: usize = 512 * 1024;
/// Stdout bytes returned by `output`.
const OUTPUT_STDOUT_BYTES: usize = 10 * 1024;
/// Stderr bytes returned by `output`.
const OUTPUT_STDERR_BYTES: usize = 5 * 1024;
/// Grace period between SIGTERM and SIGKILL on `stop`.
const STOP_GRACE: Duration = Duration::from_secs(5);
/// Command text cap in `list` results.
const LIST_COMMAND_CHARS: usize = 80;

/// Lifecycle state of a background session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The process is running.
    Running,
    /// The process exited zero.
    Completed,
    /// The process exited non-zero.
    Failed,
    /// The process was stopped by request.
    Stopped,
}

impl SessionStatus {
    /// The lowercase wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the session has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    exit_code: Option<i32>,
    stdout: RollingBuffer,
    stderr: RollingBuffer,
    pid: Option<u32>,
}

/// One tracked background session.
#[derive(Debug)]
pub struct Session {
    /// Session id (`bg-<unix-ms>-<6 base36>`).
    pub id: String,
    /// The command line.
    pub command: String,
    /// Working directory, if one was given.
    pub cwd: Option<String>,
    /// Start time, unix milliseconds.
    pub started_at_ms: u64,
    started: Instant,
    state: Mutex<SessionState>,
}

impl Session {
    fn snapshot(&self) -> (SessionStatus, Option<i32>) {
        let state = self.state.lock().expect("session lock poisoned");
        (state.status, state.exit_code)
    }
}

/// Store of background sessions for one toolset.
#[derive(Debug, Default, Clone)]
pub struct BackgroundRegistry {
    sessions: Arc<Mutex<HashMap<String, Arc<Session>>>>,
}

impl BackgroundRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, session: Arc<Session>) {
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .insert(session.id.clone(), session);
    }

    fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
    }

    fn all(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.started_at_ms);
        sessions
    }

    /// Remove every terminal session from the registry.
    pub fn clear_finished(&self) {
        self.sessions
            .lock()
            .expect("registry lock poisoned")
            .retain(|_, session| !session.snapshot().0.is_terminal());
    }
}

/// Generate a process-unique session id.
fn session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix: String = (0..6)
        .map(|_| {
            let n = fastrand::u8(..36);
            char::from_digit(u32::from(n), 36).unwrap_or('0')
        })
        .collect();
    format!("bg-{millis}-{suffix}")
}

/// Actions accepted by the background controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum BackgroundArgs {
    /// Start a new session.
    Start {
        /// The command line to run.
        command: String,
        /// Working directory.
        #[serde(default)]
        cwd: Option<String>,
    },
    /// Report status of a session.
    Status {
        /// The session id.
        session_id: String,
    },
    /// Return recent output of a session.
    Output {
        /// The session id.
        session_id: String,
    },
    /// Stop a running session.
    Stop {
        /// The session id.
        session_id: String,
    },
    /// List all sessions.
    List,
}

/// Controller for background process sessions.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTool {
    registry: BackgroundRegistry,
}

impl BackgroundTool {
    /// Create a controller over its own registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a controller over a shared registry.
    #[must_use]
    pub fn with_registry(registry: BackgroundRegistry) -> Self {
        Self { registry }
    }

    /// The registry backing this controller.
    #[must_use]
    pub fn registry(&self) -> &BackgroundRegistry {
        &self.registry
    }

    async fn start(&self, command: String, cwd: Option<String>) -> Result<Value, ToolError> {
        check_command(&command)?;

        let mut process = Command::new("sh");
        process
            .arg("-c")
            .arg(&command)
            .env("TERM", "dumb")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &cwd {
            process.current_dir(cwd);
        }

        let mut child = process
            .spawn()
            .map_err(|e| ToolError::execution(format!("failed to spawn: {e}")))?;

        let id = session_id();
        let pid = child.id();
        let session = Arc::new(Session {
            id: id.clone(),
            command: command.clone(),
            cwd,
            started_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            started: Instant::now(),
            state: Mutex::new(SessionState {
                status: SessionStatus::Running,
                exit_code: None,
                stdout: RollingBuffer::new(BUFFER_CAP, BUFFER_KEEP),
                stderr: RollingBuffer::new(BUFFER_CAP, BUFFER_KEEP),
                pid,
            }),
        });
        self.registry.insert(Arc::clone(&session));

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        // Stream readers push into the session's rolling buffers.
        if let Some(mut pipe) = stdout_pipe {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                while let Ok(n) = pipe.read(&mut chunk).await {
                    if n == 0 {
                        break;
                    }
                    let mut state = session.state.lock().expect("session lock poisoned");
                    state.stdout.push(&chunk[..n]);
                }
            });
        }
        if let Some(mut pipe) = stderr_pipe {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                while let Ok(n) = pipe.read(&mut chunk).await {
                    if n == 0 {
                        break;
                    }
                    let mut state = session.state.lock().expect("session lock poisoned");
                    state.stderr.push(&chunk[..n]);
                }
            });
        }

        // Monitor records the terminal state unless a stop got there first.
        {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let exit = child.wait().await;
                let mut state = session.state.lock().expect("session lock poisoned");
                if state.status == SessionStatus::Running {
                    match exit {
                        Ok(status) if status.success() => {
                            state.status = SessionStatus::Completed;
                            state.exit_code = Some(0);
                        }
                        Ok(status) => {
                            state.status = SessionStatus::Failed;
                            state.exit_code = status.code();
                        }
                        Err(e) => {
                            warn!(session = %session.id, error = %e, "Background wait failed");
                            state.status = SessionStatus::Failed;
                        }
                    }
                } else if let Ok(status) = exit {
                    state.exit_code = status.code();
                }
                state.pid = None;
            });
        }

        debug!(session = %id, command = %command, "Background session started");

        Ok(serde_json::json!({
            "success": true,
            "sessionId": id,
            "pid": pid,
            "status": "running",
        }))
    }

    fn status(&self, session_id: &str) -> Result<Value, ToolError> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| ToolError::NotFound(format!("session {session_id}")))?;
        let (status, exit_code) = session.snapshot();

        let mut payload = serde_json::json!({
            "success": true,
            "sessionId": session.id,
            "status": status.as_str(),
        });
        let map = payload.as_object_mut().expect("object literal");
        if let Some(code) = exit_code {
            map.insert("exitCode".into(), code.into());
        }
        if status == SessionStatus::Running {
            map.insert(
                "runningForMs".into(),
                (session.started.elapsed().as_millis() as u64).into(),
            );
        }
        Ok(payload)
    }

    fn output(&self, session_id: &str) -> Result<Value, ToolError> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| ToolError::NotFound(format!("session {session_id}")))?;
        let state = session.state.lock().expect("session lock poisoned");

        Ok(serde_json::json!({
            "success": true,
            "sessionId": session.id,
            "status": state.status.as_str(),
            "stdout": state.stdout.tail_text(OUTPUT_STDOUT_BYTES),
            "stderr": state.stderr.tail_text(OUTPUT_STDERR_BYTES),
            "truncated": state.stdout.was_truncated() || state.stderr.was_truncated(),
        }))
    }

    async fn stop(&self, session_id: &str) -> Result<Value, ToolError> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| ToolError::NotFound(format!("session {session_id}")))?;

        let pid = {
            let mut state = session.state.lock().expect("session lock poisoned");
            if state.status.is_terminal() {
                return Ok(serde_json::json!({
                    "success": true,
                    "sessionId": session.id,
                    "message": format!("Session already {}", state.status.as_str()),
                }));
            }
            state.status = SessionStatus::Stopped;
            state.pid
        };

        if let Some(pid) = pid {
            #[cfg(unix)]
            {
                super::send_signal(pid, libc::SIGTERM);
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    tokio::time::sleep(STOP_GRACE).await;
                    let still_alive = session
                        .state
                        .lock()
                        .expect("session lock poisoned")
                        .pid
                        .is_some();
                    if still_alive {
                        super::send_signal(pid, libc::SIGKILL);
                    }
                });
            }
        }

        Ok(serde_json::json!({
            "success": true,
            "sessionId": session.id,
            "message": "Session stopped",
        }))
    }

    fn list(&self) -> Value {
        let sessions: Vec<Value> = self
            .registry
            .all()
            .iter()
            .map(|session| {
                let (status, _) = session.snapshot();
                let command: String = session.command.chars().take(LIST_COMMAND_CHARS).collect();
                serde_json::json!({
                    "sessionId": session.id,
                    "command": command,
                    "status": status.as_str(),
                    "startedAtMs": session.started_at_ms,
                })
            })
            .collect();

        serde_json::json!({
            "success": true,
            "sessions": sessions,
        })
    }
}

#[async_trait]
impl Tool for BackgroundTool {
    const NAME: &'static str = "background_process";
    type Args = BackgroundArgs;
    type Output = Value;
    type Error = ToolError;

    fn description(&self) -> String {
        "Manage long-running background processes: start, status, output, \
         stop, list."
            .to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["start", "status", "output", "stop", "list"]
                },
                "command": {"type": "string", "minLength": 1},
                "cwd": {"type": "string"},
                "session_id": {"type": "string"}
            },
            "required": ["action"]
        })
    }

    fn durability(&self) -> Durability {
        Durability::default().with_timeout(Duration::from_secs(30))
    }

    async fn call(&self, args: Self::Args, _ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        match args {
            BackgroundArgs::Start { command, cwd } => self.start(command, cwd).await,
            BackgroundArgs::Status { session_id } => self.status(&session_id),
            BackgroundArgs::Output { session_id } => self.output(&session_id),
            BackgroundArgs::Stop { session_id } => self.stop(&session_id).await,
            BackgroundArgs::List => Ok(self.list()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn wait_for_terminal(tool: &BackgroundTool, id: &str) -> Value {
        for _ in 0..100 {
            let status = tool.status(id).unwrap();
            if status["status"] != "running" {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session never finished");
    }

    fn started_id(payload: &Value) -> String {
        payload["sessionId"].as_str().unwrap().to_owned()
    }

    #[test]
    fn session_ids_follow_the_format() {
        let id = session_id();
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        assert_eq!(parts[0], "bg");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn start_runs_and_completes() {
        let tool = BackgroundTool::new();
        let payload = tool.start("echo done".into(), None).await.unwrap();
        assert_eq!(payload["success"], true);
        let id = started_id(&payload);

        let status = wait_for_terminal(&tool, &id).await;
        assert_eq!(status["status"], "completed");
        assert_eq!(status["exitCode"], 0);

        let output = tool.output(&id).unwrap();
        assert!(output["stdout"].as_str().unwrap().contains("done"));
    }

    #[tokio::test]
    async fn failing_command_is_marked_failed() {
        let tool = BackgroundTool::new();
        let id = started_id(&tool.start("exit 7".into(), None).await.unwrap());

        let status = wait_for_terminal(&tool, &id).await;
        assert_eq!(status["status"], "failed");
        assert_eq!(status["exitCode"], 7);
    }

    #[tokio::test]
    async fn blocklist_applies_to_background_starts() {
        let tool = BackgroundTool::new();
        let err = tool.start("sudo rm file".into(), None).await.unwrap_err();
        assert_eq!(err.code(), "command-blocked");
    }

    #[tokio::test]
    async fn stop_terminates_a_running_session() {
        let tool = BackgroundTool::new();
        let id = started_id(&tool.start("sleep 30".into(), None).await.unwrap());

        let stopped = tool.stop(&id).await.unwrap();
        assert_eq!(stopped["success"], true);

        let status = tool.status(&id).unwrap();
        assert_eq!(status["status"], "stopped");
    }

    #[tokio::test]
    async fn stop_is_idempotent_on_finished_sessions() {
        let tool = BackgroundTool::new();
        let id = started_id(&tool.start("true".into(), None).await.unwrap());
        wait_for_terminal(&tool, &id).await;

        let first = tool.stop(&id).await.unwrap();
        assert_eq!(first["success"], true);
        assert!(first["message"]
            .as_str()
            .unwrap()
            .starts_with("Session already"));

        let second = tool.stop(&id).await.unwrap();
        assert_eq!(second["success"], true);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let tool = BackgroundTool::new();
        let err = tool.status("bg-0-zzzzzz").unwrap_err();
        assert_eq!(err.code(), "not-found");
    }

    #[tokio::test]
    async fn buffers_keep_a_bounded_tail() {
        let tool = BackgroundTool::new();
        // 2 MiB of 'a' through stdout.
        let id = started_id(
            &tool
                .start("head -c 2097152 /dev/zero | tr '\\0' 'a'".into(), None)
                .await
                .unwrap(),
        );
        wait_for_terminal(&tool, &id).await;

        let session = tool.registry.get(&id).unwrap();
        let state = session.state.lock().unwrap();
        assert!(state.stdout.len() <= BUFFER_CAP);
        assert!(state.stdout.was_truncated());
        assert!(state.stdout.to_text().ends_with('a'));
    }

    #[tokio::test]
    async fn list_shows_truncated_commands() {
        let tool = BackgroundTool::new();
        let long = format!("echo {}", "x".repeat(200));
        let id = started_id(&tool.start(long, None).await.unwrap());
        wait_for_terminal(&tool, &id).await;

        let listing = tool.list();
        let sessions = listing["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0]["command"].as_str().unwrap().len() <= LIST_COMMAND_CHARS);
    }

    #[tokio::test]
    async fn clear_finished_retains_running_sessions() {
        let tool = BackgroundTool::new();
        let done = started_id(&tool.start("true".into(), None).await.unwrap());
        wait_for_terminal(&tool, &done).await;
        let running = started_id(&tool.start("sleep 30".into(), None).await.unwrap());

        tool.registry.clear_finished();
        assert!(tool.registry.get(&done).is_none());
        assert!(tool.registry.get(&running).is_some());

        tool.stop(&running).await.unwrap();
    }
}
