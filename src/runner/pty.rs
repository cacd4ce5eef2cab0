//! Pseudo-terminal session driver.
//!
//! Runs a process attached to the peer side of a PTY pair and drives it
//! through a small state machine:
//!
//! ```text
//! Reading ──prompt seen──▶ Responding ──▶ Reading
//!    │
//!    ├──process exited──▶ Draining ──▶ Done(Exited)
//!    └──deadline passed──▶ (terminate, grace, kill) ──▶ Done(TimedOut)
//! ```
//!
//! Everything here is blocking; callers run it on a blocking thread.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::prompts::{PromptResponder, PromptSignature};
use crate::error::ControllerError;

const CHUNK_SIZE: usize = 4096;
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Timing knobs for a session.
#[derive(Debug, Clone)]
pub struct PtySessionConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub grace: Duration,
}

/// What happened in a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Exited(i32),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct PtyOutcome {
    pub end: SessionEnd,
    /// All terminal output in arrival order.
    pub output: String,
    /// Patterns that triggered a scripted response, in order.
    pub responses: Vec<String>,
    pub elapsed: Duration,
}

enum SessionState {
    Reading,
    Responding(PromptSignature),
    Draining(ExitStatus),
    Done(SessionEnd),
}

/// Kills the child if it is still running when dropped.
struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }
}

/// Runs `program` on a fresh terminal until it exits or `config.timeout` passes.
pub fn run_session(
    program: &str,
    args: &[String],
    cwd: &Path,
    config: &PtySessionConfig,
    responder: &PromptResponder,
) -> Result<PtyOutcome, ControllerError> {
    let (master, slave) = open_pty().map_err(|e| ControllerError::Pty(e.to_string()))?;
    let child = spawn_on_terminal(program, args, cwd, slave)?;
    let mut session = Session {
        master: File::from(master),
        child: ChildGuard(child),
        output: Vec::new(),
        responses: Vec::new(),
        terminal_closed: false,
    };

    let started = Instant::now();
    let mut state = SessionState::Reading;
    let end = loop {
        state = match state {
            SessionState::Reading => session.read_step(started, config, responder)?,
            SessionState::Responding(signature) => session.respond(&signature)?,
            SessionState::Draining(status) => {
                session.drain();
                SessionState::Done(SessionEnd::Exited(status.code().unwrap_or(-1)))
            }
            SessionState::Done(end) => break end,
        };
    };

    Ok(PtyOutcome {
        end,
        output: String::from_utf8_lossy(&session.output).into_owned(),
        responses: session.responses,
        elapsed: started.elapsed(),
    })
}

struct Session {
    master: File,
    child: ChildGuard,
    output: Vec<u8>,
    responses: Vec<String>,
    terminal_closed: bool,
}

impl Session {
    fn read_step(
        &mut self,
        started: Instant,
        config: &PtySessionConfig,
        responder: &PromptResponder,
    ) -> Result<SessionState, ControllerError> {
        if started.elapsed() >= config.timeout {
            info!(
                timeout_secs = config.timeout.as_secs(),
                "Interactive session timed out, terminating"
            );
            self.terminate(config.grace);
            return Ok(SessionState::Done(SessionEnd::TimedOut));
        }

        if let Some(status) = self.child.0.try_wait()? {
            return Ok(SessionState::Draining(status));
        }

        if self.terminal_closed {
            std::thread::sleep(config.poll_interval);
            return Ok(SessionState::Reading);
        }

        if !wait_readable(self.master.as_raw_fd(), config.poll_interval)? {
            return Ok(SessionState::Reading);
        }

        let mut buf = [0u8; CHUNK_SIZE];
        match read_chunk(&mut self.master, &mut buf)? {
            Some(n) => {
                self.output.extend_from_slice(&buf[..n]);
                let chunk = String::from_utf8_lossy(&buf[..n]);
                match responder.match_chunk(&chunk) {
                    Some(signature) => Ok(SessionState::Responding(signature.clone())),
                    None => Ok(SessionState::Reading),
                }
            }
            None => {
                debug!("Terminal closed, waiting for process exit");
                self.terminal_closed = true;
                Ok(SessionState::Reading)
            }
        }
    }

    fn respond(&mut self, signature: &PromptSignature) -> Result<SessionState, ControllerError> {
        debug!(pattern = %signature.pattern, "Answering interactive prompt");
        self.master.write_all(signature.response.as_bytes())?;
        self.master.flush()?;
        self.responses.push(signature.pattern.clone());
        Ok(SessionState::Reading)
    }

    /// Best-effort read of whatever the process left in the terminal buffer.
    fn drain(&mut self) {
        if self.terminal_closed {
            return;
        }
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            match wait_readable(self.master.as_raw_fd(), DRAIN_POLL) {
                Ok(true) => {}
                _ => break,
            }
            match read_chunk(&mut self.master, &mut buf) {
                Ok(Some(n)) => self.output.extend_from_slice(&buf[..n]),
                _ => break,
            }
        }
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL.
    fn terminate(&mut self, grace: Duration) {
        let child = &mut self.child.0;
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: pid belongs to a child we spawned and have not reaped yet.
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        warn!("Process ignored SIGTERM, killing");
        let _ = child.kill();
        let _ = child.wait();
    }
}

fn open_pty() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut master: libc::c_int = -1;
    let mut slave: libc::c_int = -1;
    // SAFETY: out-pointers are valid for writes, optional arguments are null.
    let rc = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            std::ptr::null_mut(),
            std::ptr::null_mut::<libc::termios>(),
            std::ptr::null_mut::<libc::winsize>(),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: openpty succeeded, both descriptors are fresh and owned by us.
    let (master, slave) = unsafe { (OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave)) };

    // The child must not inherit the master side.
    // SAFETY: valid descriptor, F_SETFD takes an int flag.
    if unsafe { libc::fcntl(master.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((master, slave))
}

/// Spawns the process with all three standard streams on the terminal peer.
///
/// The parent's copies of the peer descriptor are closed on return so the
/// master side sees end-of-file once the process exits.
fn spawn_on_terminal(
    program: &str,
    args: &[String],
    cwd: &Path,
    slave: OwnedFd,
) -> Result<Child, ControllerError> {
    let stdin = slave.try_clone()?;
    let stdout = slave.try_clone()?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(slave));

    cmd.spawn().map_err(|e| ControllerError::Spawn {
        program: program.to_string(),
        message: e.to_string(),
    })
}

fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    // SAFETY: pfd is a valid pollfd array of length 1.
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0 && pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
}

/// Reads one chunk; `None` once the terminal is closed.
///
/// Linux reports a closed peer as `EIO` rather than a zero-length read.
fn read_chunk(master: &mut File, buf: &mut [u8]) -> io::Result<Option<usize>> {
    match master.read(buf) {
        Ok(0) => Ok(None),
        Ok(n) => Ok(Some(n)),
        Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Some(0)),
        Err(e) => Err(e),
    }
}
