//! Built-in tool implementations.
//!
//! Each tool follows the payload convention (`{"success": bool, ...}`),
//! emits transient data parts through its [`ToolContext`](crate::tool::ToolContext),
//! and enforces its own safety checks before touching the system.

pub mod background;
pub mod browser;
pub mod fs;
pub mod presets;
pub mod reasoning;
pub mod shell;

pub use presets::ToolPreset;

/// A byte buffer retaining a rolling tail.
///
/// Appends beyond `cap` discard the oldest bytes down to `keep`, so the
/// most recent output is always preserved.
#[derive(Debug, Clone, Default)]
pub(crate) struct RollingBuffer {
    data: Vec<u8>,
    cap: usize,
    keep: usize,
    truncated: bool,
}

impl RollingBuffer {
    pub(crate) fn new(cap: usize, keep: usize) -> Self {
        Self {
            data: Vec::new(),
            cap,
            keep: keep.min(cap),
            truncated: false,
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if self.data.len() > self.cap {
            let start = self.data.len() - self.keep;
            self.data.drain(..start);
            self.truncated = true;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// The whole retained window as lossy UTF-8.
    pub(crate) fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// The last `n` bytes as lossy UTF-8.
    pub(crate) fn tail_text(&self, n: usize) -> String {
        let start = self.data.len().saturating_sub(n);
        String::from_utf8_lossy(&self.data[start..]).into_owned()
    }
}

/// Send a POSIX signal to a process id, tolerating a vanished process.
#[cfg(unix)]
#[allow(unsafe_code)]
pub(crate) fn send_signal(pid: u32, signal: i32) {
    // SAFETY: kill(2) with a valid pid; failure (ESRCH) is ignored.
    unsafe {
        let _ = libc::kill(pid as i32, signal);
    }
}
