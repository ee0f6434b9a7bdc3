//! Two-phase namespace bootstrap.
//!
//! The launcher clones a child into new namespaces and re-executes itself
//! there. The child blocks on a pipe until the launcher has written its
//! UID/GID maps, then `execve`s with an environment holding nothing but
//! the serialized runtime options. The re-executed image recognizes itself
//! by its `argv[0]`.

use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use capsa_common::constants;
use capsa_common::error::{CapsaError, Result};
use capsa_core::namespace::NamespaceConfig;
use capsa_core::namespace::user::{self, IdMap};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sched::{CloneCb, CloneFlags};
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

const STACK_SIZE: usize = 1024 * 1024;

/// Everything needed to start the inner phase.
#[derive(Debug, Clone)]
pub struct ReexecRequest {
    /// Executable to run, normally the launcher itself.
    pub program: PathBuf,
    /// Name the new image sees as `argv[0]`.
    pub arg0: String,
    /// Remaining arguments.
    pub args: Vec<String>,
    /// The complete environment of the new image.
    pub env: Vec<(String, String)>,
    /// Namespaces to create.
    pub namespaces: NamespaceConfig,
    /// UID mapping written when a user namespace is created.
    pub uid_map: IdMap,
    /// GID mapping written when a user namespace is created.
    pub gid_map: IdMap,
}

impl ReexecRequest {
    /// Re-executes the running binary as the inner phase with `args`,
    /// mapping root onto the caller's real IDs.
    #[must_use]
    pub fn inner_phase(args: Vec<String>, env: Vec<(String, String)>) -> Self {
        Self {
            program: PathBuf::from(constants::SELF_EXE),
            arg0: constants::REEXEC_ARG0.to_owned(),
            args,
            env,
            namespaces: NamespaceConfig::default(),
            uid_map: IdMap::current_uid(),
            gid_map: IdMap::current_gid(),
        }
    }
}

/// Returns whether `arg0` names the re-executed inner phase.
#[must_use]
pub fn is_inner_phase(arg0: &OsStr) -> bool {
    Path::new(arg0).file_name() == Some(OsStr::new(constants::REEXEC_ARG0))
}

/// Handle on a started inner phase.
#[derive(Debug)]
#[must_use = "the child must be waited for or detached"]
pub struct ReexecChild {
    pid: Pid,
}

impl ReexecChild {
    /// Waits for the child to terminate and returns its exit code, or
    /// `128 + n` when it was killed by signal `n`.
    ///
    /// # Errors
    ///
    /// Returns an error if the child cannot be waited for.
    pub fn wait(self) -> Result<i32> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => {
                    tracing::debug!(pid = %self.pid, code, "inner phase exited");
                    return Ok(code);
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    tracing::debug!(pid = %self.pid, ?signal, "inner phase killed");
                    return Ok(128 + signal as i32);
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => {
                    return Err(CapsaError::Namespace {
                        message: format!("cannot wait for inner phase {}: {e}", self.pid),
                    });
                }
            }
        }
    }

    /// Releases the child without waiting for it.
    pub fn detach(self) {
        tracing::info!(pid = %self.pid, "inner phase detached");
    }
}

/// Starts `request.program` in new namespaces.
///
/// # Errors
///
/// Returns an error if an argument contains a NUL byte, the child cannot
/// be cloned, or its ID maps cannot be written.
pub fn spawn_reexec(request: &ReexecRequest) -> Result<ReexecChild> {
    let program = c_string(request.program.as_os_str().as_encoded_bytes())?;
    let argv = std::iter::once(request.arg0.as_str())
        .chain(request.args.iter().map(String::as_str))
        .map(|a| c_string(a.as_bytes()))
        .collect::<Result<Vec<_>>>()?;
    let envp = request
        .env
        .iter()
        .map(|(k, v)| c_string(format!("{k}={v}").as_bytes()))
        .collect::<Result<Vec<_>>>()?;

    let (ready_rx, ready_tx) =
        nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| namespace_error("pipe2", e))?;
    let (rx_fd, tx_fd) = (ready_rx.as_raw_fd(), ready_tx.as_raw_fd());

    let flags: CloneFlags = request.namespaces.clone_flags();
    let mut stack = vec![0_u8; STACK_SIZE];
    let callback: CloneCb<'_> = Box::new(move || {
        // SAFETY: the child owns copies of both descriptors.
        unsafe {
            let _ = libc::close(tx_fd);
        }
        if !wait_ready(rx_fd) {
            return 1;
        }
        match nix::unistd::execve(&program, &argv, &envp) {
            Ok(never) => match never {},
            Err(_) => 127,
        }
    });

    // SAFETY: the child only closes, reads and execs; it shares no memory
    // with the parent since CLONE_VM is not set.
    let pid = unsafe { nix::sched::clone(callback, &mut stack, flags, Some(Signal::SIGCHLD as i32)) }
        .map_err(|e| namespace_error("clone", e))?;
    drop(ready_rx);
    let child = ReexecChild { pid };
    tracing::info!(pid = %pid, flags = ?flags, "inner phase cloned");

    if request.namespaces.user {
        if let Err(e) = user::write_id_mappings(pid, &request.uid_map, &request.gid_map) {
            drop(ready_tx);
            let _ = child.wait();
            return Err(e);
        }
    }

    if let Err(e) = release(ready_tx) {
        let _ = child.wait();
        return Err(e);
    }
    Ok(child)
}

/// Blocks until the parent signals readiness. EOF means it gave up.
fn wait_ready(fd: i32) -> bool {
    let mut byte = 0_u8;
    loop {
        // SAFETY: reads one byte into a valid stack buffer.
        let n = unsafe { libc::read(fd, (&raw mut byte).cast(), 1) };
        if n == 1 {
            return true;
        }
        if n < 0 && Errno::last() == Errno::EINTR {
            continue;
        }
        return false;
    }
}

fn release(ready_tx: OwnedFd) -> Result<()> {
    File::from(ready_tx)
        .write_all(&[1])
        .map_err(|e| CapsaError::Namespace {
            message: format!("cannot release inner phase: {e}"),
        })
}

fn c_string(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|e| CapsaError::Config {
        message: format!("argument contains a NUL byte: {e}"),
    })
}

fn namespace_error(operation: &str, errno: Errno) -> CapsaError {
    CapsaError::Namespace {
        message: format!("{operation}: {errno}"),
    }
}
