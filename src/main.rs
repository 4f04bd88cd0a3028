mod config;
mod consent;
mod fatal;
mod launch;
mod multiplexer;
mod outcome;
mod report;
mod ring_buffer;
mod run;
mod supervisor;
mod webhook;

use clap::Parser;
use config::{CrashHandlerConfig, CONFIG_FILE};
use consent::ConsentGate;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use supervisor::{Supervisor, LOG_FILE};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use webhook::DiscordWebhook;

/// Executable launched when no target is given.
const DEFAULT_TARGET: &str = "SquireDesktop";

/// Launch an application, mirror its output to the console and a log file,
/// and report the tail of the output if it crashes.
#[derive(Parser, Debug)]
#[command(name = "crash-handler", version, about)]
pub struct Cli {
    /// Executable to supervise (path, or name looked up on PATH)
    #[arg(value_name = "TARGET", default_value = DEFAULT_TARGET)]
    target: String,

    /// Crash-report config file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Usage errors exit 1; --help and --version are not errors.
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    ExitCode::from(start(cli, Path::new(LOG_FILE), std::io::stdout(), init_tracing))
}

/// Supervise one run of `cli.target` and return the process exit code.
///
/// `init_logging` receives the diagnostics handle on the log file, or `None`
/// if the log could not be opened.
fn start<C: Write>(
    cli: Cli,
    log_path: &Path,
    console: C,
    init_logging: impl FnOnce(Option<File>),
) -> u8 {
    // Opened before anything is spawned so a failure never leaves an
    // unobserved child behind.
    let log = match open_logs(log_path) {
        Ok((log, diagnostics)) => {
            init_logging(Some(diagnostics));
            log
        }
        Err(e) => {
            init_logging(None);
            tracing::error!(error = %e, "cannot log the application");
            return 1;
        }
    };

    tracing::info!(program = %cli.target, "starting");
    tracing::debug!(?cli, "parsed CLI arguments");

    let supervisor = Supervisor::new(cli.target);
    let consent = ConsentGate::new(&cli.config);
    let transport =
        DiscordWebhook::from_config(&CrashHandlerConfig::load_or_default(&cli.config).crash_reports);

    match run::run(&supervisor, console, log, &consent, &transport) {
        Ok(summary) => {
            tracing::info!(
                pid = summary.pid.as_raw(),
                termination = %summary.outcome.termination,
                classification = %summary.outcome.classification,
                bytes = summary.bytes_captured,
                duration_ms = summary.duration.as_millis() as u64,
                report_delivered = summary.report_delivered(),
                "supervision finished"
            );
            summary.exit_code()
        }
        Err(e) if e.is_fatal() => fatal::violation(e),
        Err(e) => {
            tracing::error!(error = %e, "supervision failed");
            1
        }
    }
}

/// Open the durable log for the child's output plus a second handle on the
/// same file for the supervisor's own diagnostics.
fn open_logs(path: &Path) -> Result<(File, File), supervisor::SupervisorError> {
    let log = supervisor::open_log(path)?;
    let diagnostics = log
        .try_clone()
        .map_err(|e| supervisor::SupervisorError::LogFile {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok((log, diagnostics))
}

/// Diagnostics go to stderr and, when available, into the durable log.
fn init_tracing(log: Option<File>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crash_handler=info"));
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    let file = log.map(|f| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(Arc::new(f))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_arguments_uses_default_target() {
        let cli = Cli::try_parse_from(["crash-handler"]).unwrap();
        assert_eq!(cli.target, DEFAULT_TARGET);
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILE));
    }

    #[test]
    fn test_one_argument_is_target() {
        let cli = Cli::try_parse_from(["crash-handler", "./build/app"]).unwrap();
        assert_eq!(cli.target, "./build/app");
    }

    #[test]
    fn test_two_arguments_is_usage_error() {
        let err = Cli::try_parse_from(["crash-handler", "a", "b"]).unwrap_err();
        assert!(err.use_stderr());
    }

    #[test]
    fn test_config_flag_does_not_count_as_target() {
        let cli =
            Cli::try_parse_from(["crash-handler", "--config", "other.toml", "app"]).unwrap();
        assert_eq!(cli.target, "app");
        assert_eq!(cli.config, PathBuf::from("other.toml"));
    }

    #[test]
    fn test_help_is_not_an_error_exit() {
        let err = Cli::try_parse_from(["crash-handler", "--help"]).unwrap_err();
        assert!(!err.use_stderr());
    }

    #[test]
    fn test_open_logs_shares_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let (mut log, mut diagnostics) = open_logs(&path).unwrap();
        log.write_all(b"child\n").unwrap();
        diagnostics.write_all(b"supervisor\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "child\nsupervisor\n");
    }

    fn script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn cli_for(target: String, dir: &Path) -> Cli {
        Cli {
            target,
            config: dir.join("absent.toml"),
        }
    }

    #[test]
    fn test_unopenable_log_exits_one_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let target = script(dir.path(), "app.sh", &format!("touch '{}'", marker.display()));
        let log_path = dir.path().join("no-such-dir").join("app.log");
        let mut logging = None;

        let code = start(
            cli_for(target, dir.path()),
            &log_path,
            std::io::sink(),
            |log| logging = Some(log.is_some()),
        );

        assert_eq!(code, 1);
        assert_eq!(logging, Some(false));
        assert!(!marker.exists());
    }

    #[test]
    fn test_clean_run_exits_zero_and_logs_output() {
        let dir = tempfile::tempdir().unwrap();
        let target = script(dir.path(), "app.sh", "echo hello");
        let log_path = dir.path().join("app.log");
        let mut console = Vec::new();

        let code = start(cli_for(target, dir.path()), &log_path, &mut console, |_| {});

        assert_eq!(code, 0);
        assert_eq!(console, b"hello\n");
        assert_eq!(std::fs::read_to_string(&log_path).unwrap(), "hello\n");
    }

    #[test]
    fn test_crash_without_config_exits_one() {
        let dir = tempfile::tempdir().unwrap();
        let target = script(dir.path(), "app.sh", "echo oops; exit 139");
        let log_path = dir.path().join("app.log");

        let code = start(cli_for(target, dir.path()), &log_path, std::io::sink(), |_| {});

        assert_eq!(code, 1);
        assert_eq!(std::fs::read_to_string(&log_path).unwrap(), "oops\n");
    }

    /// In-memory writer for capturing formatted diagnostics.
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_run_end_is_logged_once() {
        let dir = tempfile::tempdir().unwrap();
        let target = script(dir.path(), "app.sh", "echo hello; exit 3");
        let log_path = dir.path().join("app.log");
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();

        let code = tracing::subscriber::with_default(subscriber, || {
            start(cli_for(target, dir.path()), &log_path, std::io::sink(), |_| {})
        });

        assert_eq!(code, 1);
        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.matches("supervision finished").count(), 1, "{text}");
        assert!(text.contains("exit code 3"), "{text}");
        assert!(!text.contains("target process exited"), "{text}");
    }
}
