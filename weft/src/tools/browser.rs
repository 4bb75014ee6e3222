//! Browser adapter over an external CLI agent.
//!
//! Actions form a closed union mapped onto CLI invocations. Availability
//! of the CLI is probed once and cached; when it is missing, every
//! action fails with `browser-cli-missing` instead of attempting a
//! spawn.
//!
//! [`FrameStreamer`] captures periodic screenshots into its own channel.
//! A tick is skipped while the previous capture is still in flight, so a
//! slow CLI lowers the effective frame rate instead of queueing work.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::{OnceCell, mpsc};
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::tool::{Durability, Tool, ToolContext};

/// Default executable name of the external browser agent.
pub const DEFAULT_BROWSER_COMMAND: &str = "browser-agent";
/// Timeout for a single CLI action.
const ACTION_TIMEOUT: Duration = Duration::from_secs(30);
/// Frame-rate clamp bounds.
const FPS_MIN: f64 = 0.5;
const FPS_MAX: f64 = 10.0;
/// Screenshot quality clamp bounds.
const QUALITY_MIN: u8 = 1;
const QUALITY_MAX: u8 = 100;

/// One browser action.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
#[non_exhaustive]
pub enum BrowserAction {
    /// Navigate to a URL.
    Open {
        /// Target URL.
        url: String,
    },
    /// Capture an accessibility snapshot of the page.
    Snapshot,
    /// Click an element.
    Click {
        /// CSS selector.
        selector: String,
    },
    /// Double-click an element.
    Dblclick {
        /// CSS selector.
        selector: String,
    },
    /// Clear and fill an input.
    Fill {
        /// CSS selector.
        selector: String,
        /// Value to fill.
        value: String,
    },
    /// Type text into the focused element.
    Type {
        /// Text to type.
        text: String,
    },
    /// Select an option in a dropdown.
    Select {
        /// CSS selector.
        selector: String,
        /// Option value.
        value: String,
    },
    /// Press a key.
    Press {
        /// Key name (e.g. `Enter`).
        key: String,
    },
    /// Hover over an element.
    Hover {
        /// CSS selector.
        selector: String,
    },
    /// Scroll the page or an element.
    Scroll {
        /// CSS selector; the page when absent.
        #[serde(default)]
        selector: Option<String>,
        /// Horizontal delta in pixels.
        #[serde(default)]
        dx: i32,
        /// Vertical delta in pixels.
        #[serde(default)]
        dy: i32,
    },
    /// Capture a screenshot.
    Screenshot {
        /// JPEG quality (1-100).
        #[serde(default)]
        quality: Option<u8>,
    },
    /// Read the text of an element.
    GetText {
        /// CSS selector.
        selector: String,
    },
    /// Read the current URL.
    GetUrl,
    /// Read the page title.
    GetTitle,
    /// Wait for a duration or selector.
    Wait {
        /// Milliseconds to wait.
        #[serde(default)]
        ms: Option<u64>,
        /// Selector to wait for.
        #[serde(default)]
        selector: Option<String>,
    },
    /// Evaluate JavaScript on the page.
    Eval {
        /// Script source.
        script: String,
    },
    /// Check a checkbox.
    Check {
        /// CSS selector.
        selector: String,
    },
    /// Uncheck a checkbox.
    Uncheck {
        /// CSS selector.
        selector: String,
    },
    /// Close the browser.
    Close,
}

impl BrowserAction {
    /// CLI arguments for this action.
    #[must_use]
    pub fn to_cli_args(&self) -> Vec<String> {
        match self {
            Self::Open { url } => vec!["open".into(), url.clone()],
            Self::Snapshot => vec!["snapshot".into()],
            Self::Click { selector } => vec!["click".into(), selector.clone()],
            Self::Dblclick { selector } => vec!["dblclick".into(), selector.clone()],
            Self::Fill { selector, value } => {
                vec!["fill".into(), selector.clone(), value.clone()]
            }
            Self::Type { text } => vec!["type".into(), text.clone()],
            Self::Select { selector, value } => {
                vec!["select".into(), selector.clone(), value.clone()]
            }
            Self::Press { key } => vec!["press".into(), key.clone()],
            Self::Hover { selector } => vec!["hover".into(), selector.clone()],
            Self::Scroll { selector, dx, dy } => {
                let mut args = vec!["scroll".into()];
                if let Some(selector) = selector {
                    args.push(selector.clone());
                }
                args.push(format!("--dx={dx}"));
                args.push(format!("--dy={dy}"));
                args
            }
            Self::Screenshot { quality } => {
                let mut args = vec!["screenshot".into()];
                if let Some(quality) = quality {
                    args.push(format!(
                        "--quality={}",
                        (*quality).clamp(QUALITY_MIN, QUALITY_MAX)
                    ));
                }
                args
            }
            Self::GetText { selector } => vec!["get-text".into(), selector.clone()],
            Self::GetUrl => vec!["get-url".into()],
            Self::GetTitle => vec!["get-title".into()],
            Self::Wait { ms, selector } => {
                let mut args = vec!["wait".into()];
                if let Some(ms) = ms {
                    args.push(format!("--ms={ms}"));
                }
                if let Some(selector) = selector {
                    args.push(selector.clone());
                }
                args
            }
            Self::Eval { script } => vec!["eval".into(), script.clone()],
            Self::Check { selector } => vec!["check".into(), selector.clone()],
            Self::Uncheck { selector } => vec!["uncheck".into(), selector.clone()],
            Self::Close => vec!["close".into()],
        }
    }
}

/// Thin wrapper over the external browser CLI.
#[derive(Debug, Clone)]
pub struct BrowserCli {
    command: String,
    available: Arc<OnceCell<bool>>,
}

impl Default for BrowserCli {
    fn default() -> Self {
        Self::new(DEFAULT_BROWSER_COMMAND)
    }
}

impl BrowserCli {
    /// Create a wrapper over the named executable.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            available: Arc::new(OnceCell::new()),
        }
    }

    /// Probe availability, caching the first answer.
    pub async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let probe = Command::new(&self.command)
                    .arg("--version")
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
                matches!(probe, Ok(status) if status.success())
            })
            .await
    }

    /// Execute one action.
    ///
    /// # Errors
    ///
    /// `browser-cli-missing` when the CLI is absent; `execution-failed`
    /// or `timeout` when the invocation fails.
    pub async fn execute(&self, action: &BrowserAction) -> Result<Value, ToolError> {
        if !self.is_available().await {
            return Err(ToolError::BrowserCliMissing);
        }

        let args = action.to_cli_args();
        debug!(command = %self.command, ?args, "Browser action");

        let run = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(ACTION_TIMEOUT, run)
            .await
            .map_err(|_| ToolError::Timeout(ACTION_TIMEOUT.as_millis() as u64))?
            .map_err(|e| ToolError::execution(format!("browser CLI spawn: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::execution(format!(
                "browser CLI exited {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed = serde_json::from_str::<Value>(stdout.trim()).unwrap_or_else(|_| {
            serde_json::json!({ "output": stdout.trim() })
        });
        Ok(parsed)
    }
}

/// Events emitted by the frame streamer.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum FrameEvent {
    /// A captured frame.
    Frame {
        /// Monotonic frame sequence number.
        seq: u64,
        /// Capture time, unix milliseconds.
        captured_at_ms: u64,
        /// Frame payload as returned by the CLI.
        payload: Value,
    },
    /// Acknowledgement of an injected input.
    InputAck {
        /// Sequence number of the acknowledged input.
        seq: u64,
    },
    /// Capture failed; the streamer stops after emitting this.
    Error {
        /// Error description.
        message: String,
    },
}

/// Configuration for a [`FrameStreamer`].
#[derive(Debug, Clone, Copy)]
pub struct FrameConfig {
    /// Frames per second; clamped to `[0.5, 10]`.
    pub fps: f64,
    /// Screenshot quality; clamped to `[1, 100]`.
    pub quality: u8,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            fps: 2.0,
            quality: 60,
        }
    }
}

/// Periodic screenshot capture with input injection.
#[derive(Debug)]
pub struct FrameStreamer {
    cli: BrowserCli,
    config: FrameConfig,
    in_flight: Arc<AtomicBool>,
    input_seq: AtomicU64,
    stop: Arc<AtomicBool>,
}

impl FrameStreamer {
    /// Create a streamer over a CLI with clamped configuration.
    #[must_use]
    pub fn new(cli: BrowserCli, config: FrameConfig) -> Self {
        Self {
            cli,
            config: FrameConfig {
                fps: config.fps.clamp(FPS_MIN, FPS_MAX),
                quality: config.quality.clamp(QUALITY_MIN, QUALITY_MAX),
            },
            in_flight: Arc::new(AtomicBool::new(false)),
            input_seq: AtomicU64::new(0),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The clamped configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Start capturing into a channel of [`FrameEvent`]s.
    ///
    /// Capture stops when the receiver is dropped, [`Self::stop`] is
    /// called, or a capture fails (after emitting [`FrameEvent::Error`]).
    pub fn start(&self) -> mpsc::Receiver<FrameEvent> {
        let (tx, rx) = mpsc::channel(16);
        let cli = self.cli.clone();
        let quality = self.config.quality;
        let interval = Duration::from_secs_f64(1.0 / self.config.fps);
        let in_flight = Arc::clone(&self.in_flight);
        let stop = Arc::clone(&self.stop);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut seq: u64 = 0;

            loop {
                ticker.tick().await;
                if stop.load(Ordering::SeqCst) || tx.is_closed() {
                    break;
                }
                // Re-entrancy guard: skip the tick while a capture runs.
                if in_flight.swap(true, Ordering::SeqCst) {
                    continue;
                }

                let result = cli
                    .execute(&BrowserAction::Screenshot {
                        quality: Some(quality),
                    })
                    .await;
                in_flight.store(false, Ordering::SeqCst);

                match result {
                    Ok(payload) => {
                        seq += 1;
                        let event = FrameEvent::Frame {
                            seq,
                            captured_at_ms: unix_ms(),
                            payload,
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Frame capture failed; stopping streamer");
                        let _ = tx
                            .send(FrameEvent::Error {
                                message: e.to_string(),
                            })
                            .await;
                        break;
                    }
                }
            }
        });

        rx
    }

    /// Inject an input action, returning its acknowledgement sequence.
    ///
    /// # Errors
    ///
    /// Propagates CLI failures from the underlying action.
    pub async fn inject(
        &self,
        action: &BrowserAction,
        events: &mpsc::Sender<FrameEvent>,
    ) -> Result<u64, ToolError> {
        self.cli.execute(action).await?;
        let seq = self.input_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = events.send(FrameEvent::InputAck { seq }).await;
        Ok(seq)
    }

    /// Stop the capture loop.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// The browser tool exposed to agents.
#[derive(Debug, Clone, Default)]
pub struct BrowserTool {
    cli: BrowserCli,
}

impl BrowserTool {
    /// Create the tool over the default CLI.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the tool over a specific CLI executable.
    #[must_use]
    pub fn with_cli(cli: BrowserCli) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl Tool for BrowserTool {
    const NAME: &'static str = "browser";
    type Args = BrowserAction;
    type Output = Value;
    type Error = ToolError;

    fn description(&self) -> String {
        "Drive a browser: navigate, inspect, and interact with pages via \
         a discriminated action object."
            .to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": [
                        "open", "snapshot", "click", "dblclick", "fill", "type",
                        "select", "press", "hover", "scroll", "screenshot",
                        "getText", "getUrl", "getTitle", "wait", "eval",
                        "check", "uncheck", "close"
                    ]
                },
                "url": {"type": "string"},
                "selector": {"type": "string"},
                "value": {"type": "string"},
                "text": {"type": "string"},
                "key": {"type": "string"},
                "script": {"type": "string"},
                "dx": {"type": "integer"},
                "dy": {"type": "integer"},
                "ms": {"type": "integer", "minimum": 0},
                "quality": {"type": "integer", "minimum": 1, "maximum": 100}
            },
            "required": ["action"]
        })
    }

    fn durability(&self) -> Durability {
        Durability::default().with_timeout(Duration::from_secs(45))
    }

    async fn call(&self, args: Self::Args, _ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        let result = self.cli.execute(&args).await?;
        Ok(serde_json::json!({
            "success": true,
            "result": result,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Write a fake browser CLI script that echoes a JSON document.
    #[cfg(unix)]
    fn fake_cli(dir: &assert_fs::TempDir, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("fake-browser");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[test]
    fn action_union_deserializes() {
        let action: BrowserAction = serde_json::from_value(serde_json::json!({
            "action": "fill",
            "selector": "#name",
            "value": "weft"
        }))
        .unwrap();
        assert!(matches!(action, BrowserAction::Fill { .. }));

        let action: BrowserAction =
            serde_json::from_value(serde_json::json!({"action": "getTitle"})).unwrap();
        assert!(matches!(action, BrowserAction::GetTitle));
    }

    #[test]
    fn cli_args_cover_variants() {
        assert_eq!(
            BrowserAction::Open {
                url: "https://example.com".into()
            }
            .to_cli_args(),
            vec!["open", "https://example.com"]
        );
        assert_eq!(
            BrowserAction::Scroll {
                selector: None,
                dx: 0,
                dy: 100
            }
            .to_cli_args(),
            vec!["scroll", "--dx=0", "--dy=100"]
        );
        assert_eq!(
            BrowserAction::Screenshot { quality: Some(200) }.to_cli_args(),
            vec!["screenshot", "--quality=100"]
        );
    }

    #[tokio::test]
    async fn missing_cli_fails_every_action() {
        let cli = BrowserCli::new("definitely-not-a-real-binary-name");
        let err = cli.execute(&BrowserAction::GetUrl).await.unwrap_err();
        assert_eq!(err.code(), "browser-cli-missing");

        // The probe is cached; a second action fails the same way.
        let err = cli.execute(&BrowserAction::Close).await.unwrap_err();
        assert_eq!(err.code(), "browser-cli-missing");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn executes_actions_against_the_cli() {
        let dir = assert_fs::TempDir::new().unwrap();
        let cli = BrowserCli::new(fake_cli(&dir, r#"echo '{"url": "https://example.com"}'"#));

        let result = cli.execute(&BrowserAction::GetUrl).await.unwrap();
        assert_eq!(result["url"], "https://example.com");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_cli_exit_is_execution_failed() {
        let dir = assert_fs::TempDir::new().unwrap();
        let cli = BrowserCli::new(fake_cli(
            &dir,
            "if [ \"$1\" = \"--version\" ]; then exit 0; fi\necho boom >&2; exit 2",
        ));

        let err = cli.execute(&BrowserAction::Snapshot).await.unwrap_err();
        assert_eq!(err.code(), "execution-failed");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn frame_config_is_clamped() {
        let streamer = FrameStreamer::new(
            BrowserCli::new("x"),
            FrameConfig {
                fps: 99.0,
                quality: 0,
            },
        );
        assert!((streamer.config().fps - FPS_MAX).abs() < f64::EPSILON);
        assert_eq!(streamer.config().quality, QUALITY_MIN);

        let streamer = FrameStreamer::new(
            BrowserCli::new("x"),
            FrameConfig {
                fps: 0.1,
                quality: 255,
            },
        );
        assert!((streamer.config().fps - FPS_MIN).abs() < f64::EPSILON);
        assert_eq!(streamer.config().quality, QUALITY_MAX);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streamer_captures_frames() {
        let dir = assert_fs::TempDir::new().unwrap();
        let cli = BrowserCli::new(fake_cli(&dir, r#"echo '{"frame": "jpegdata"}'"#));

        let streamer = FrameStreamer::new(
            cli,
            FrameConfig {
                fps: 10.0,
                quality: 50,
            },
        );
        let mut frames = streamer.start();

        let first = tokio::time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .unwrap()
            .unwrap();
        match first {
            FrameEvent::Frame { seq, payload, .. } => {
                assert_eq!(seq, 1);
                assert_eq!(payload["frame"], "jpegdata");
            }
            other => panic!("expected frame, got {other:?}"),
        }
        streamer.stop();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streamer_stops_on_capture_error() {
        let dir = assert_fs::TempDir::new().unwrap();
        let cli = BrowserCli::new(fake_cli(
            &dir,
            "if [ \"$1\" = \"--version\" ]; then exit 0; fi\nexit 1",
        ));

        let streamer = FrameStreamer::new(
            cli,
            FrameConfig {
                fps: 10.0,
                quality: 50,
            },
        );
        let mut frames = streamer.start();

        let event = tokio::time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, FrameEvent::Error { .. }));
        // Channel closes after the error.
        assert!(frames.recv().await.is_none());
    }
}
