use nix::sys::signal::Signal;

/// Exit code the child bootstrap uses when no launch strategy could start
/// the target.
///
/// This is a contract between the supervisor and the monitored application:
/// the application must never exit with this code on its own, otherwise a
/// real failure would be reported as "did not start".
pub const NO_START_EXIT_CODE: i32 = 180;

/// How the child process ended, as reported by `waitpid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Normal exit with the given status code.
    Exited(i32),
    /// Terminated by a signal.
    Signaled(Signal),
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exit code {code}"),
            Termination::Signaled(signal) => write!(f, "signal {signal}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Normal,
    /// SIGKILL. Not counted as a crash even though the OOM killer also
    /// sends it; that is a policy choice, see DESIGN.md.
    IntentionallyKilled,
    FailedToStart,
    Crashed,
}

impl Classification {
    /// Exit code the supervisor itself reports for this classification.
    pub fn exit_code(self) -> u8 {
        match self {
            Classification::Crashed => 1,
            Classification::Normal
            | Classification::IntentionallyKilled
            | Classification::FailedToStart => 0,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Classification::Normal => "normal",
            Classification::IntentionallyKilled => "intentionally killed",
            Classification::FailedToStart => "failed to start",
            Classification::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

pub fn classify(termination: Termination) -> Classification {
    match termination {
        Termination::Exited(0) => Classification::Normal,
        Termination::Exited(NO_START_EXIT_CODE) => Classification::FailedToStart,
        Termination::Exited(_) => Classification::Crashed,
        Termination::Signaled(Signal::SIGKILL) => Classification::IntentionallyKilled,
        Termination::Signaled(_) => Classification::Crashed,
    }
}

/// Raw termination of the child together with its classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub termination: Termination,
    pub classification: Classification,
}

impl ProcessOutcome {
    pub fn new(termination: Termination) -> Self {
        Self {
            termination,
            classification: classify(termination),
        }
    }
}
