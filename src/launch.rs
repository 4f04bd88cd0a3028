/// Child-side launch of the monitored application.
///
/// Everything that allocates is done in `LaunchPlan::new`, before the fork,
/// including the null-terminated argv pointer array. After the fork only
/// async-signal-safe calls are made (dup2, execv, execvp, write, _exit),
/// since the parent may have other threads holding allocator locks. The
/// exec calls go straight to libc because the nix wrappers build their
/// pointer arrays on the heap.
use crate::outcome::NO_START_EXIT_CODE;
use nix::errno::Errno;
use nix::libc::{self, c_char};
use nix::unistd::dup2;
use std::ffi::{CString, NulError};
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd};

/// Argument passed to the target so it knows it runs under supervision.
pub const SUPERVISION_FLAG: &str = "--crash-handler";

/// Ways of resolving the target, tried in order until one replaces the
/// child process image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStrategy {
    /// Execute the target as a path (absolute or relative to the cwd).
    DirectPath,
    /// Search `PATH` for the target name.
    PathLookup,
}

impl LaunchStrategy {
    pub const ORDER: [LaunchStrategy; 2] = [LaunchStrategy::DirectPath, LaunchStrategy::PathLookup];

    /// Only returns if the exec failed.
    fn exec(self, plan: &LaunchPlan) -> Errno {
        let (program, argv) = (plan.program.as_ptr(), plan.argv_ptrs.as_ptr());
        // SAFETY: `program` and every non-null entry of `argv_ptrs` point
        // into CStrings owned by `plan`, and the array ends with a null.
        unsafe {
            match self {
                LaunchStrategy::DirectPath => libc::execv(program, argv),
                LaunchStrategy::PathLookup => libc::execvp(program, argv),
            };
        }
        Errno::last()
    }
}

/// Pick the errno worth reporting when several strategies failed.
///
/// "Not found" from one strategy says less than, say, "permission denied"
/// from another, so the first specific error wins.
fn prefer_informative(kept: Errno, next: Errno) -> Errno {
    match kept {
        Errno::ENOENT | Errno::UnknownErrno => next,
        _ => kept,
    }
}

/// Pre-built exec arguments for one target.
#[derive(Debug)]
pub struct LaunchPlan {
    target: String,
    program: CString,
    argv: Vec<CString>,
    /// Null-terminated pointers into `argv`. A CString's buffer does not
    /// move when the CString itself does, so these stay valid.
    argv_ptrs: Vec<*const c_char>,
}

impl LaunchPlan {
    pub fn new(target: &str) -> Result<Self, NulError> {
        let program = CString::new(target)?;
        let argv = vec![program.clone(), CString::new(SUPERVISION_FLAG)?];
        let argv_ptrs = argv
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        Ok(Self {
            target: target.to_string(),
            program,
            argv,
            argv_ptrs,
        })
    }

    /// Body of the forked child: point stdout and stderr at `output`, then
    /// try each strategy. If none replaces the process, report why on
    /// `output` and exit with `NO_START_EXIT_CODE`.
    pub fn exec_child(&self, input: OwnedFd, output: OwnedFd) -> ! {
        drop(input);

        let fd = output.as_raw_fd();
        let redirected = dup2(fd, nix::libc::STDOUT_FILENO)
            .and_then(|_| dup2(fd, nix::libc::STDERR_FILENO));

        let errno = match redirected {
            Ok(_) => {
                LaunchStrategy::ORDER
                    .into_iter()
                    .fold(Errno::UnknownErrno, |kept, strategy| {
                        prefer_informative(kept, strategy.exec(self))
                    })
            }
            Err(errno) => errno,
        };

        let mut buf = [0u8; 512];
        let len = self.write_diagnostic(&mut buf, errno);
        let _ = nix::unistd::write(&output, &buf[..len]);

        // SAFETY: _exit skips atexit handlers and stdio flushing, which is
        // what a forked child that failed to exec must do.
        unsafe { nix::libc::_exit(NO_START_EXIT_CODE) }
    }

    /// Format the launch failure into `buf` without allocating. Output that
    /// does not fit is truncated.
    fn write_diagnostic(&self, buf: &mut [u8], errno: Errno) -> usize {
        let mut cursor = std::io::Cursor::new(buf);
        let _ = writeln!(
            cursor,
            "Cannot start {}: {} (errno {})",
            self.target,
            errno.desc(),
            errno as i32
        );
        cursor.position() as usize
    }
}
