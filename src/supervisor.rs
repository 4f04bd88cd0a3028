/// Single supervised run: fork the target with stdout+stderr on a pipe,
/// mirror the pipe until EOF, then reap and classify the child.
use crate::fatal;
use crate::launch::LaunchPlan;
use crate::multiplexer::OutputMultiplexer;
use crate::outcome::{ProcessOutcome, Termination};
use crate::ring_buffer::RingBuffer;
use crate::webhook::MESSAGE_LIMIT;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, pipe2, ForkResult, Pid};
use std::ffi::NulError;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Durable log of the most recent run, relative to the working directory.
pub const LOG_FILE: &str = "squiredesktop.log";

/// Result of a completed supervised run.
#[derive(Debug)]
pub struct SupervisedRun {
    pub pid: Pid,
    pub outcome: ProcessOutcome,
    /// The most recent output, bounded by the tail capacity.
    pub tail: RingBuffer,
    /// Total bytes the child wrote (not bounded by the tail).
    pub bytes_captured: u64,
    pub duration: Duration,
}

/// Errors that can occur while supervising the target.
#[derive(Debug)]
pub enum SupervisorError {
    /// Failed to create the durable log file.
    LogFile {
        path: PathBuf,
        source: io::Error,
    },
    /// The target name cannot be passed to exec.
    Target { target: String, source: NulError },
    /// Failed to create the output pipe.
    Pipe { source: Errno },
    /// Failed to fork the child.
    Fork { source: Errno },
    /// Failed to read from the output pipe. The child was still reaped.
    Read {
        source: io::Error,
        termination: Termination,
    },
    /// The durable log rejected a byte. The child was still reaped.
    LogWrite {
        source: io::Error,
        termination: Termination,
    },
    /// Failed to reap the child.
    Wait { source: Errno },
}

impl SupervisorError {
    /// Resource-setup and reaping failures mean the environment broke an
    /// assumption the supervisor relies on; they abort rather than exit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SupervisorError::Pipe { .. } | SupervisorError::Fork { .. } | SupervisorError::Wait { .. }
        )
    }
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::LogFile { path, source } => {
                write!(f, "cannot open log file {}: {}", path.display(), source)
            }
            SupervisorError::Target { target, source } => {
                write!(f, "invalid target {:?}: {}", target, source)
            }
            SupervisorError::Pipe { source } => write!(f, "failed to create output pipe: {}", source),
            SupervisorError::Fork { source } => write!(f, "failed to fork child process: {}", source),
            SupervisorError::Read { source, termination } => write!(
                f,
                "failed to read child output: {} (child ended with {})",
                source, termination
            ),
            SupervisorError::LogWrite { source, termination } => write!(
                f,
                "failed to write child output to the log: {} (child ended with {})",
                source, termination
            ),
            SupervisorError::Wait { source } => {
                write!(f, "failed to wait for child process: {}", source)
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::LogFile { source, .. } => Some(source),
            SupervisorError::Target { source, .. } => Some(source),
            SupervisorError::Pipe { source } => Some(source),
            SupervisorError::Fork { source } => Some(source),
            SupervisorError::Read { source, .. } => Some(source),
            SupervisorError::LogWrite { source, .. } => Some(source),
            SupervisorError::Wait { source } => Some(source),
        }
    }
}

/// Create or truncate the durable log file.
pub fn open_log(path: &Path) -> Result<File, SupervisorError> {
    File::create(path).map_err(|e| SupervisorError::LogFile {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Launches one target and watches it until it exits.
#[derive(Debug, Clone)]
pub struct Supervisor {
    target: String,
    tail_capacity: usize,
}

impl Supervisor {
    /// Tail capacity defaults to the webhook message limit.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            tail_capacity: MESSAGE_LIMIT,
        }
    }

    #[cfg(test)]
    pub fn with_tail_capacity(mut self, capacity: usize) -> Self {
        self.tail_capacity = capacity;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Spawn the target and mirror its combined output into `console` and
    /// `log` until the pipe closes, then reap it.
    ///
    /// Blocks until the child exits. A child that never exits hangs the
    /// supervisor; there is deliberately no timeout.
    pub fn run<C: Write, L: Write>(
        &self,
        console: C,
        log: L,
    ) -> Result<SupervisedRun, SupervisorError> {
        let plan = LaunchPlan::new(&self.target).map_err(|e| SupervisorError::Target {
            target: self.target.clone(),
            source: e,
        })?;
        // CLOEXEC keeps these ends out of unrelated children forked
        // concurrently; dup2 onto stdout/stderr clears it in our child.
        let (read_end, write_end) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| SupervisorError::Pipe { source: e })?;

        let start = Instant::now();

        // SAFETY: the child branch only runs `exec_child`, which restricts
        // itself to async-signal-safe calls and never returns.
        let pid = match unsafe { fork() }.map_err(|e| SupervisorError::Fork { source: e })? {
            ForkResult::Child => plan.exec_child(read_end, write_end),
            ForkResult::Parent { child } => child,
        };
        // The child is now the only writer, so EOF means it has exited
        // (or closed its output).
        drop(write_end);
        tracing::info!(program = %self.target, pid = pid.as_raw(), "target process started");

        let mut tail = RingBuffer::new(self.tail_capacity);
        // The read end is closed once `pump` returns, so a child that keeps
        // writing after a capture failure gets SIGPIPE instead of blocking.
        let pumped = pump(File::from(read_end), console, log, &mut tail);

        let termination = wait_for(pid)?;
        let bytes_captured = match pumped {
            Ok(n) => n,
            Err(PumpError::Read(source)) => {
                return Err(SupervisorError::Read { source, termination })
            }
            Err(PumpError::Log(source)) => {
                return Err(SupervisorError::LogWrite { source, termination })
            }
        };
        let outcome = ProcessOutcome::new(termination);
        let duration = start.elapsed();

        Ok(SupervisedRun {
            pid,
            outcome,
            tail,
            bytes_captured,
            duration,
        })
    }
}

enum PumpError {
    Read(io::Error),
    Log(io::Error),
}

/// Copy the pipe into the multiplexer until EOF. The pipe is closed on
/// every return path.
fn pump<C: Write, L: Write>(
    mut pipe: File,
    console: C,
    log: L,
    tail: &mut RingBuffer,
) -> Result<u64, PumpError> {
    let mut mux = OutputMultiplexer::new(console, log, tail);
    let mut buf = [0u8; 4096];
    loop {
        let n = match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PumpError::Read(e)),
        };
        mux.on_bytes(&buf[..n]).map_err(PumpError::Log)?;
    }
    Ok(mux.bytes())
}

/// Block until `pid` terminates.
///
/// Reaping a different process would mean the supervisor lost track of its
/// own child; that is an invariant violation and aborts.
fn wait_for(pid: Pid) -> Result<Termination, SupervisorError> {
    loop {
        let status = match waitpid(pid, None) {
            Ok(status) => status,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(SupervisorError::Wait { source: e }),
        };
        if let Some(waited) = status.pid() {
            fatal::ensure(
                waited == pid,
                format_args!("waited for pid {waited}, expected child {pid}"),
            );
        }
        match status {
            WaitStatus::Exited(_, code) => return Ok(Termination::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => return Ok(Termination::Signaled(signal)),
            _ => continue,
        }
    }
}
