/// One supervised run end to end: supervise, classify, report a crash.
use crate::consent::Consent;
use crate::outcome::{Classification, ProcessOutcome};
use crate::report::{CrashReporter, ReportError, ReportOutcome};
use crate::supervisor::{Supervisor, SupervisorError};
use crate::webhook::WebhookTransport;
use nix::unistd::Pid;
use std::io::Write;
use std::time::Duration;

#[derive(Debug)]
pub struct RunSummary {
    pub pid: Pid,
    pub outcome: ProcessOutcome,
    pub bytes_captured: u64,
    pub duration: Duration,
    /// Only set when the run crashed.
    pub report: Option<Result<ReportOutcome, ReportError>>,
}

impl RunSummary {
    pub fn report_delivered(&self) -> bool {
        matches!(self.report, Some(Ok(outcome)) if outcome.delivered())
    }

    /// Exit code for the supervisor process. A crash exits 1 whether or not
    /// the report went out.
    pub fn exit_code(&self) -> u8 {
        self.outcome.classification.exit_code()
    }
}

pub fn run<C, L, G, T>(
    supervisor: &Supervisor,
    console: C,
    log: L,
    consent: &G,
    transport: &T,
) -> Result<RunSummary, SupervisorError>
where
    C: Write,
    L: Write,
    G: Consent + ?Sized,
    T: WebhookTransport + ?Sized,
{
    let run = supervisor.run(console, log)?;

    let report = match run.outcome.classification {
        Classification::Normal | Classification::IntentionallyKilled => None,
        Classification::FailedToStart => {
            // Exits 0: nothing crashed, the launch just didn't happen.
            tracing::error!(program = %supervisor.target(), "target could not be started");
            None
        }
        Classification::Crashed => {
            tracing::error!(
                program = %supervisor.target(),
                termination = %run.outcome.termination,
                "crash detected"
            );
            let result = CrashReporter::new(transport).report(&run.tail, consent);
            if let Err(e) = &result {
                tracing::error!(error = %e, "crash report skipped");
            }
            Some(result)
        }
    };

    Ok(RunSummary {
        pid: run.pid,
        outcome: run.outcome,
        bytes_captured: run.bytes_captured,
        duration: run.duration,
        report,
    })
}
