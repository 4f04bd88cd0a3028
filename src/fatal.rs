/// Fatal invariant violations.
///
/// These indicate a defect in the supervisor or a broken operating
/// environment (no pipes, no fork), never bad external input. They are not
/// recoverable: the violation is logged and the process aborts.
use std::fmt::Display;

pub fn violation(what: impl Display) -> ! {
    tracing::error!(violation = %what, "fatal invariant violation, aborting");
    std::process::abort()
}

/// Abort unless `condition` holds.
pub fn ensure(condition: bool, what: impl Display) {
    if !condition {
        violation(what);
    }
}
