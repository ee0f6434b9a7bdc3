//! Pseudo-terminal sessions for interactive and detached runs.
//!
//! A [`PtySession`] starts a process on the slave side of a fresh pty and
//! bridges the master either to the invoking terminal or to an internal
//! pipe. Dropping the session tears it down: the resize watcher stops,
//! the master is closed and the terminal mode is restored.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::os::unix::thread::JoinHandleExt;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use capsa_common::error::{CapsaError, Result};
use nix::errno::Errno;
use nix::sys::signal::{SigSet, Signal};
use nix::sys::termios::{self, SetArg, Termios};

/// Where the pty master is bridged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bridge {
    /// The invoking terminal, switched to raw mode.
    Terminal,
    /// An internal pipe; the invoking terminal is left untouched.
    Detached,
}

/// Saved terminal attributes, restored on drop.
#[derive(Debug)]
pub struct RawModeGuard {
    fd: OwnedFd,
    saved: Option<Termios>,
}

impl RawModeGuard {
    /// Switches the terminal behind `fd` to raw mode.
    ///
    /// # Errors
    ///
    /// Returns an error if `fd` is not a terminal or cannot be configured.
    pub fn enter(fd: impl AsFd) -> Result<Self> {
        let fd = fd
            .as_fd()
            .try_clone_to_owned()
            .map_err(|e| CapsaError::io("/dev/stdin", e))?;
        let saved = termios::tcgetattr(&fd).map_err(|e| tty_error("tcgetattr", e))?;
        let mut raw = saved.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(&fd, SetArg::TCSANOW, &raw).map_err(|e| tty_error("tcsetattr", e))?;
        tracing::debug!(fd = fd.as_raw_fd(), "terminal switched to raw mode");
        Ok(Self {
            fd,
            saved: Some(saved),
        })
    }

    /// Restores the saved attributes. Later calls do nothing.
    pub fn restore(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = termios::tcsetattr(&self.fd, SetArg::TCSANOW, &saved) {
                tracing::warn!(error = %e, "failed to restore terminal mode");
            } else {
                tracing::debug!("terminal mode restored");
            }
        }
    }

    /// Returns whether the saved attributes are still to be restored.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.saved.is_some()
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Copies the window size of `source` onto `target`.
///
/// # Errors
///
/// Returns an error if either size ioctl fails.
pub fn inherit_size(source: BorrowedFd<'_>, target: BorrowedFd<'_>) -> io::Result<()> {
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: both descriptors are open for the duration of the borrow and
    // `size` is a valid `winsize` for the kernel to read and write.
    unsafe {
        if libc::ioctl(source.as_raw_fd(), libc::TIOCGWINSZ, &raw mut size) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::ioctl(target.as_raw_fd(), libc::TIOCSWINSZ, &raw const size) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Propagates `SIGWINCH` size changes from a terminal to a pty.
///
/// `SIGWINCH` is blocked on the starting thread and consumed synchronously
/// by a dedicated thread, so no process-wide handler is installed.
#[derive(Debug)]
struct ResizeWatcher {
    mask: SigSet,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ResizeWatcher {
    fn start(source: OwnedFd, target: OwnedFd) -> Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGWINCH);
        mask.thread_block()
            .map_err(|e| tty_error("block SIGWINCH", e))?;

        if let Err(e) = inherit_size(source.as_fd(), target.as_fd()) {
            tracing::warn!(error = %e, "failed to set initial pty size");
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let spawned = std::thread::Builder::new()
            .name("pty-resize".into())
            .spawn(move || {
                while let Ok(_signal) = mask.wait() {
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    if let Err(e) = inherit_size(source.as_fd(), target.as_fd()) {
                        tracing::warn!(error = %e, "failed to resize pty");
                    }
                }
            });

        match spawned {
            Ok(handle) => Ok(Self {
                mask,
                stop,
                handle: Some(handle),
            }),
            Err(e) => {
                let _ = mask.thread_unblock();
                Err(CapsaError::Process {
                    message: format!("cannot start resize watcher: {e}"),
                })
            }
        }
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        if let Err(e) = nix::sys::pthread::pthread_kill(handle.as_pthread_t(), Signal::SIGWINCH) {
            tracing::warn!(error = %e, "failed to wake resize watcher");
        } else if handle.join().is_err() {
            tracing::warn!("resize watcher panicked");
        }
        let _ = self.mask.thread_unblock();
    }
}

impl Drop for ResizeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A process running on a pseudo-terminal.
#[derive(Debug)]
pub struct PtySession {
    master: Option<File>,
    resize: Option<ResizeWatcher>,
    detached_input: Option<File>,
    raw_mode: Option<RawModeGuard>,
}

impl PtySession {
    /// Allocates a pty pair, returning the session and the slave side.
    ///
    /// # Errors
    ///
    /// Returns an error if no pseudo-terminal can be allocated.
    pub fn open() -> Result<(Self, OwnedFd)> {
        let pty = nix::pty::openpty(None, None).map_err(|e| tty_error("openpty", e))?;
        let session = Self {
            master: Some(File::from(pty.master)),
            resize: None,
            detached_input: None,
            raw_mode: None,
        };
        Ok((session, pty.slave))
    }

    /// Starts `command` in a new session whose controlling terminal and
    /// standard streams are the slave side of a fresh pty.
    ///
    /// # Errors
    ///
    /// Returns an error if the pty cannot be allocated or the process
    /// cannot be started.
    pub fn spawn(mut command: Command) -> Result<(Self, Child)> {
        let (session, slave) = Self::open()?;
        let stdio = |fd: &OwnedFd| {
            fd.try_clone()
                .map(Stdio::from)
                .map_err(|e| CapsaError::io("/dev/pts", e))
        };
        let _ = command
            .stdin(stdio(&slave)?)
            .stdout(stdio(&slave)?)
            .stderr(stdio(&slave)?);

        // SAFETY: the hook only makes async-signal-safe calls.
        unsafe {
            let _ = command.pre_exec(acquire_controlling_terminal);
        }

        let child = command.spawn().map_err(|e| CapsaError::Process {
            message: format!("cannot start {:?} on pty: {e}", command.get_program()),
        })?;
        // The parent must hold no slave descriptor, or the master never
        // reports end of output.
        drop(command);
        drop(slave);

        tracing::info!(pid = child.id(), "process started on pty");
        Ok((session, child))
    }

    /// Bridges input to the pty master.
    ///
    /// In [`Bridge::Terminal`] mode the invoking terminal on standard input
    /// is bridged as by [`PtySession::attach_terminal`]. In
    /// [`Bridge::Detached`] mode an internal pipe is copied instead.
    /// Copying runs on a background thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the master is closed or the bridge cannot be
    /// set up.
    pub fn attach(&mut self, bridge: Bridge) -> Result<()> {
        let input: Box<dyn Read + Send> = match bridge {
            Bridge::Terminal => Box::new(self.bridge_terminal(io::stdin().as_fd())?),
            Bridge::Detached => {
                if self.master.is_none() {
                    return Err(closed_master());
                }
                let (read, write) = nix::unistd::pipe().map_err(|e| tty_error("pipe", e))?;
                self.detached_input = Some(File::from(write));
                Box::new(File::from(read))
            }
        };
        self.copy_to_master(input)?;
        tracing::debug!(?bridge, "pty attached");
        Ok(())
    }

    /// Bridges `terminal` to the pty master: it is switched to raw mode
    /// until the session is dropped, its window-size changes are forwarded
    /// and its input is copied to the master.
    ///
    /// # Errors
    ///
    /// Returns an error if the master is closed or the bridge cannot be
    /// set up.
    pub fn attach_terminal(&mut self, terminal: impl AsFd) -> Result<()> {
        let input = self.bridge_terminal(terminal.as_fd())?;
        self.copy_to_master(Box::new(input))?;
        tracing::debug!(fd = terminal.as_fd().as_raw_fd(), "pty attached to terminal");
        Ok(())
    }

    fn bridge_terminal(&mut self, terminal: BorrowedFd<'_>) -> Result<File> {
        let master = self.master.as_ref().ok_or_else(closed_master)?;
        let target = master
            .as_fd()
            .try_clone_to_owned()
            .map_err(|e| CapsaError::io("/dev/ptmx", e))?;
        match RawModeGuard::enter(terminal) {
            Ok(guard) => self.raw_mode = Some(guard),
            Err(e) => tracing::warn!(error = %e, "input is not a terminal, keeping its mode"),
        }
        let source = terminal
            .try_clone_to_owned()
            .map_err(|e| CapsaError::io("/dev/stdin", e))?;
        let input = source
            .try_clone()
            .map_err(|e| CapsaError::io("/dev/stdin", e))?;
        self.resize = Some(ResizeWatcher::start(source, target)?);
        Ok(File::from(input))
    }

    fn copy_to_master(&self, input: Box<dyn Read + Send>) -> Result<()> {
        let master = self.master.as_ref().ok_or_else(closed_master)?;
        let writer = master
            .try_clone()
            .map_err(|e| CapsaError::io("/dev/ptmx", e))?;
        let _input_thread = std::thread::Builder::new()
            .name("pty-input".into())
            .spawn(move || copy_input(input, writer))
            .map_err(|e| CapsaError::Process {
                message: format!("cannot start pty input copy: {e}"),
            })?;
        Ok(())
    }

    /// Copies everything the process writes to `out` until the slave side
    /// is closed by every process holding it, returning the byte count.
    ///
    /// # Errors
    ///
    /// Returns an error if the master is closed or reading or writing fails.
    pub fn drain_output<W: Write>(&mut self, out: &mut W) -> Result<u64> {
        let master = self.master.as_mut().ok_or_else(closed_master)?;
        let mut buf = [0_u8; 8192];
        let mut total = 0_u64;
        loop {
            let n = match master.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Linux reports a hung-up slave as EIO.
                Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => break,
                Err(e) => return Err(CapsaError::io("/dev/ptmx", e)),
            };
            out.write_all(&buf[..n])
                .and_then(|()| out.flush())
                .map_err(|e| CapsaError::io("/dev/stdout", e))?;
            total += n as u64;
        }
        tracing::debug!(bytes = total, "pty output drained");
        Ok(total)
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if let Some(mut resize) = self.resize.take() {
            resize.stop();
        }
        drop(self.master.take());
        drop(self.detached_input.take());
        if let Some(mut guard) = self.raw_mode.take() {
            guard.restore();
        }
    }
}

/// Runs in the child: becomes a session leader and takes its stdin, the
/// pty slave, as controlling terminal.
fn acquire_controlling_terminal() -> io::Result<()> {
    // SAFETY: plain syscalls on the child's own descriptors.
    unsafe {
        if libc::setsid() < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::ioctl(0, libc::TIOCSCTTY, 0) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn copy_input(mut input: Box<dyn Read + Send>, mut master: File) {
    match io::copy(&mut input, &mut master) {
        Ok(bytes) => tracing::debug!(bytes, "pty input closed"),
        Err(e) => tracing::debug!(error = %e, "pty input copy stopped"),
    }
}

fn closed_master() -> CapsaError {
    CapsaError::Process {
        message: "pty master already closed".into(),
    }
}

fn tty_error(operation: &'static str, errno: Errno) -> CapsaError {
    CapsaError::syscall(operation, "/dev/pts", errno)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_size(fd: BorrowedFd<'_>, rows: u16, cols: u16) {
        let size = libc::winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCSWINSZ, &raw const size) };
        assert_eq!(rc, 0);
    }

    fn get_size(fd: BorrowedFd<'_>) -> (u16, u16) {
        let mut size = libc::winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCGWINSZ, &raw mut size) };
        assert_eq!(rc, 0);
        (size.ws_row, size.ws_col)
    }

    #[test]
    fn raw_mode_is_restored_exactly_once() {
        let pty = nix::pty::openpty(None, None).expect("openpty");
        let before = termios::tcgetattr(&pty.slave).unwrap().local_flags;

        let mut guard = RawModeGuard::enter(&pty.slave).unwrap();
        assert!(guard.is_active());
        let raw = termios::tcgetattr(&pty.slave).unwrap().local_flags;
        assert!(!raw.contains(termios::LocalFlags::ECHO));
        assert!(!raw.contains(termios::LocalFlags::ICANON));

        guard.restore();
        assert!(!guard.is_active());
        assert_eq!(termios::tcgetattr(&pty.slave).unwrap().local_flags, before);
        guard.restore();
        drop(guard);
        assert_eq!(termios::tcgetattr(&pty.slave).unwrap().local_flags, before);
    }

    #[test]
    fn raw_mode_on_non_terminal_fails() {
        let file = tempfile::tempfile().expect("tempfile");
        assert!(RawModeGuard::enter(&file).is_err());
    }

    #[test]
    fn window_size_is_copied_between_ptys() {
        let source = nix::pty::openpty(None, None).expect("openpty");
        let target = nix::pty::openpty(None, None).expect("openpty");
        set_size(source.master.as_fd(), 42, 120);

        inherit_size(source.slave.as_fd(), target.master.as_fd()).unwrap();
        assert_eq!(get_size(target.slave.as_fd()), (42, 120));
    }

    #[test]
    fn detached_session_captures_output_and_exit_code() {
        let mut command = Command::new("/bin/sh");
        let _ = command
            .args(["-c", "printf \"$FOO\""])
            .env_clear()
            .env("FOO", "bar");

        let (mut session, mut child) = PtySession::spawn(command).unwrap();
        session.attach(Bridge::Detached).unwrap();
        let mut out = Vec::new();
        let _ = session.drain_output(&mut out).unwrap();
        let status = child.wait().unwrap();
        drop(session);

        assert!(String::from_utf8_lossy(&out).contains("bar"));
        assert_eq!(status.code(), Some(0));
    }

    #[test]
    fn terminal_mode_is_restored_after_failing_command() {
        let terminal = nix::pty::openpty(None, None).expect("openpty");
        let before = termios::tcgetattr(&terminal.slave).unwrap();

        let mut command = Command::new("/bin/sh");
        let _ = command.args(["-c", "exit 3"]).env_clear();
        let (mut session, mut child) = PtySession::spawn(command).unwrap();
        session.attach_terminal(&terminal.slave).unwrap();

        let raw = termios::tcgetattr(&terminal.slave).unwrap();
        assert!(!raw.local_flags.contains(termios::LocalFlags::ECHO));

        let _ = session.drain_output(&mut io::sink()).unwrap();
        assert_eq!(child.wait().unwrap().code(), Some(3));
        drop(session);

        let after = termios::tcgetattr(&terminal.slave).unwrap();
        assert_eq!(after.local_flags, before.local_flags);
        assert_eq!(after.input_flags, before.input_flags);
        assert_eq!(after.output_flags, before.output_flags);
    }

    #[test]
    fn closed_session_rejects_terminal_attach() {
        let terminal = nix::pty::openpty(None, None).expect("openpty");
        let before = termios::tcgetattr(&terminal.slave).unwrap().local_flags;
        let (mut session, _slave) = PtySession::open().unwrap();
        drop(session.master.take());

        assert!(session.attach_terminal(&terminal.slave).is_err());
        assert_eq!(termios::tcgetattr(&terminal.slave).unwrap().local_flags, before);
    }

    #[test]
    fn closed_session_rejects_attach() {
        let (mut session, _slave) = PtySession::open().unwrap();
        drop(session.master.take());
        assert!(session.attach(Bridge::Detached).is_err());
    }
}
