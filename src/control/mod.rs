// SPDX-License-Identifier: GPL-3.0-only

//! Control channel
//!
//! A named pipe on the filesystem that any number of writers (the GUI, the consumer
//! watcher, `vfx-relay send`) push command lines into. The reader opens it
//! read-write and non-blocking so it never sees EOF when the last writer leaves,
//! and polls with a bounded timeout so the shutdown flag is observed even when
//! nobody is talking.

mod command;

pub use command::Command;

use crate::constants::timing;
use crate::errors::{AppError, AppResult, CommandError};
use crate::state::SharedState;
use crate::worker::{LoopAction, WorkerController};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest line kept while waiting for its terminator
const MAX_LINE_LEN: usize = 4096;

/// Accumulates bytes across reads and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Current line went past the limit; skip to its terminator
    overflowed: bool,
}

impl LineBuffer {
    /// Append raw bytes, returning every line they complete
    ///
    /// `\r` is stripped and empty lines are skipped. A line longer than the limit
    /// is dropped whole, up to and including its terminator.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                if self.overflowed {
                    self.overflowed = false;
                    continue;
                }
                let raw = std::mem::take(&mut self.pending);
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches('\r');
                if !line.is_empty() {
                    lines.push(line.to_string());
                }
            } else if self.overflowed {
                continue;
            } else if self.pending.len() < MAX_LINE_LEN {
                self.pending.push(b);
            } else {
                warn!(limit = MAX_LINE_LEN, "Dropping overlong control line");
                self.pending.clear();
                self.overflowed = true;
            }
        }
        lines
    }

    /// Bytes of an unterminated line still buffered
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Parse one line and apply it to shared state
///
/// Unknown and malformed commands are logged and dropped.
pub fn handle_line(state: &SharedState, line: &str) {
    match Command::parse(line) {
        Ok(cmd) => {
            debug!(line, "Control command");
            cmd.apply(state);
        }
        Err(e @ CommandError::Unknown(_)) => debug!(error = %e, "Ignoring command"),
        Err(e) => warn!(error = %e, "Discarding command"),
    }
}

/// Create the FIFO at `path` (and its parent directory) unless one already exists
pub fn create_fifo(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => return Ok(()),
        Ok(_) => {
            warn!(path = %path.display(), "Replacing non-FIFO file at control pipe path");
            std::fs::remove_file(path)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn open_fifo(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

/// Outcome of waiting on the pipe
enum Readiness {
    Timeout,
    Readable,
    Broken,
}

fn poll_readable(file: &File, timeout: Duration) -> Readiness {
    let mut pfd = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    // SAFETY: pfd is a single valid pollfd that outlives the call
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };

    if rc < 0 {
        return if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
            Readiness::Timeout
        } else {
            Readiness::Broken
        };
    }
    if rc == 0 {
        return Readiness::Timeout;
    }
    if pfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0
        && pfd.revents & libc::POLLIN == 0
    {
        return Readiness::Broken;
    }
    Readiness::Readable
}

/// FIFO listener feeding [`SharedState`]
pub struct ControlChannel {
    path: PathBuf,
    state: Arc<SharedState>,
    file: Option<File>,
    lines: LineBuffer,
    poll_timeout: Duration,
}

impl ControlChannel {
    /// Create the pipe and open the reader end
    pub fn open(path: impl Into<PathBuf>, state: Arc<SharedState>) -> AppResult<Self> {
        let path = path.into();
        create_fifo(&path).map_err(|e| {
            AppError::ControlChannel(format!("cannot create {}: {}", path.display(), e))
        })?;
        let file = open_fifo(&path).map_err(|e| {
            AppError::ControlChannel(format!("cannot open {}: {}", path.display(), e))
        })?;

        info!(path = %path.display(), "Control channel listening");

        Ok(Self {
            path,
            state,
            file: Some(file),
            lines: LineBuffer::default(),
            poll_timeout: timing::CONTROL_POLL,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Override the readiness poll timeout
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    fn reopen(&mut self) {
        self.file = None;
        std::thread::sleep(timing::CONTROL_REOPEN);
        if let Err(e) = create_fifo(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Cannot recreate control pipe");
            return;
        }
        match open_fifo(&self.path) {
            Ok(file) => {
                debug!(path = %self.path.display(), "Control pipe reopened");
                self.file = Some(file);
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "Cannot reopen control pipe"),
        }
    }

    /// Wait for input once and apply every complete command line
    pub fn poll_once(&mut self) -> LoopAction {
        let Some(file) = self.file.as_mut() else {
            self.reopen();
            return LoopAction::Continue;
        };

        match poll_readable(file, self.poll_timeout) {
            Readiness::Timeout => return LoopAction::Continue,
            Readiness::Broken => {
                debug!("Control pipe hang-up, reopening");
                self.reopen();
                return LoopAction::Continue;
            }
            Readiness::Readable => {}
        }

        let mut buf = [0u8; 1024];
        let mut broken = false;
        loop {
            match file.read(&mut buf) {
                Ok(0) => {
                    broken = true;
                    break;
                }
                Ok(n) => {
                    for line in self.lines.push(&buf[..n]) {
                        handle_line(&self.state, &line);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "Control pipe read failed");
                    broken = true;
                    break;
                }
            }
        }

        if broken {
            self.reopen();
        }
        LoopAction::Continue
    }

    /// Run the listener on its own thread until shutdown is requested
    pub fn spawn(self) -> AppResult<WorkerController> {
        let state = Arc::clone(&self.state);
        WorkerController::start_with_init(
            "control-channel",
            move || Ok(self),
            move || state.is_running(),
            |channel| channel.poll_once(),
        )
        .map_err(AppError::from)
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.file = None;
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Cannot remove control pipe");
        }
    }
}

/// Write command lines into a running server's pipe
///
/// Fails with `NotFound`/`ENXIO` when no server is listening.
pub fn send_commands<S: AsRef<str>>(path: &Path, commands: &[S]) -> io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if !meta.file_type().is_fifo() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a FIFO", path.display()),
        ));
    }

    let mut file = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)?;

    let mut payload = String::new();
    for cmd in commands {
        payload.push_str(cmd.as_ref().trim_end_matches(['\r', '\n']));
        payload.push('\n');
    }
    file.write_all(payload.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_split_across_reads() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"MODE:").is_empty());
        assert_eq!(buf.pending_len(), 5);
        assert_eq!(buf.push(b"4\r\nBLUR:0.2\n\n"), vec!["MODE:4", "BLUR:0.2"]);
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn test_line_buffer_drops_long_lines() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(&vec![b'x'; MAX_LINE_LEN * 2]).is_empty());
        assert_eq!(buf.pending_len(), 0);
        let lines = buf.push(b"\nQUIT\n");
        assert_eq!(lines, vec!["QUIT"]);
    }

    #[test]
    fn test_overlong_background_path_not_applied() {
        let state = SharedState::default();
        let mut buf = LineBuffer::default();
        let mut line = b"BG:/tmp/".to_vec();
        line.extend(std::iter::repeat_n(b'a', 5000));
        line.extend_from_slice(b".png\nQUIT\n");

        // Split across reads the way a pipe would deliver it
        let (head, tail) = line.split_at(3000);
        let mut lines = buf.push(head);
        lines.extend(buf.push(tail));
        assert_eq!(lines, vec!["QUIT"]);

        for l in &lines {
            handle_line(&state, l);
        }
        assert!(state.take_background_change().is_none());
    }

    #[test]
    fn test_line_at_limit_is_kept() {
        let mut buf = LineBuffer::default();
        let mut line = vec![b'y'; MAX_LINE_LEN];
        line.push(b'\n');
        let lines = buf.push(&line);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_LINE_LEN);
    }

    #[test]
    fn test_handle_line_ignores_garbage() {
        let state = SharedState::default();
        let before = state.effect_mode();
        handle_line(&state, "MODE:notanumber");
        handle_line(&state, "HELLO");
        assert_eq!(state.effect_mode(), before);
        assert!(state.is_running());
    }
}
