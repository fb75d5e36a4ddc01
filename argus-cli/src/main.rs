// Argus command line interface
// Live detection sessions, offline replay and report rendering

mod output;

use anyhow::{bail, Context};
use argus_core::ThreatAnalysisReport;
use argus_session::{
    Aggregator, DisconnectPolicy, FailureKind, ReportFallback, SessionConfig, SessionController,
    SessionEvent, SessionState,
};
use clap::{Parser, Subcommand};
use output::Printer;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "argus_cli=info,argus_session=info,argus_core=info";

#[derive(Parser)]
#[command(name = "argus")]
#[command(about = "Live object-detection threat monitoring", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit JSON lines instead of text
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, short, global = true)]
    verbose: bool,

    /// Log as JSON on stderr
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a live detection session
    Watch {
        /// Configuration file path
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Control service base URL
        #[arg(long)]
        control_url: Option<String>,

        /// Detection stream URL
        #[arg(long)]
        stream_url: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Submit the registry collected so far if the stream drops
        #[arg(long)]
        submit_partial: bool,

        /// Build a local report if the control service cannot
        #[arg(long)]
        heuristic_fallback: bool,
    },

    /// Feed recorded frame messages (one per line) through the aggregator
    Replay {
        file: PathBuf,
    },

    /// Print a saved analysis report
    Render {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);
    let printer = Printer::new(cli.json);

    match cli.command {
        Commands::Watch {
            config,
            control_url,
            stream_url,
            duration,
            submit_partial,
            heuristic_fallback,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(url) = control_url {
                config.control_url = url;
            }
            if let Some(url) = stream_url {
                config.stream_url = url;
            }
            if submit_partial {
                config.disconnect_policy = DisconnectPolicy::SubmitPartial;
            }
            if heuristic_fallback {
                config.report_fallback = ReportFallback::Heuristic;
            }
            watch(config, duration.map(Duration::from_secs), &printer).await?;
        }
        Commands::Replay { file } => {
            replay(&file, &printer)?;
        }
        Commands::Render { file } => {
            render(&file, &printer)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, log_json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SessionConfig> {
    let config = match path {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let mut config = SessionConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    Ok(config)
}

/// Tracks session events and decides when `watch` has seen the session end.
struct WatchExit {
    submit_partial: bool,
    heuristic: bool,
    state: SessionState,
    partial_in_flight: bool,
}

impl WatchExit {
    fn new(config: &SessionConfig) -> Self {
        Self {
            submit_partial: config.disconnect_policy == DisconnectPolicy::SubmitPartial,
            heuristic: config.report_fallback == ReportFallback::Heuristic,
            state: SessionState::Idle,
            partial_in_flight: false,
        }
    }

    /// Returns true once no further session outcome is coming.
    fn observe(&mut self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::StateChanged { from, to } => {
                self.state = *to;
                // Only a drop while streaming submits the partial registry
                self.partial_in_flight = self.submit_partial
                    && *to == SessionState::Disconnected
                    && *from == SessionState::Streaming;
                false
            }
            SessionEvent::ReportReady(_) => true,
            SessionEvent::Failure { kind: FailureKind::Control, .. } => {
                !self.heuristic || self.state == SessionState::Error
            }
            SessionEvent::Failure { kind: FailureKind::Transport, .. } => !self.partial_in_flight,
            _ => false,
        }
    }
}

async fn watch(config: SessionConfig, duration: Option<Duration>, printer: &Printer) -> anyhow::Result<()> {
    let mut exit = WatchExit::new(&config);

    let controller = SessionController::from_config(config).context("Invalid session configuration")?;
    let (handle, task) = controller.spawn();
    let mut events = handle.subscribe();
    handle.start().await?;

    let deadline = wait_for(duration);
    tokio::pin!(deadline);
    let mut stop_requested = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !stop_requested => {
                info!("Interrupted, stopping session");
                stop_requested = true;
                if exit.state == SessionState::Streaming {
                    handle.stop().await?;
                } else if !exit.state.is_busy() {
                    break;
                }
            }
            _ = &mut deadline, if !stop_requested => {
                info!("Duration elapsed, stopping session");
                stop_requested = true;
                if exit.state == SessionState::Streaming {
                    handle.stop().await?;
                } else if !exit.state.is_busy() {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    printer.event(&event);
                    if exit.observe(&event) {
                        break;
                    }
                    // A stop asked for while starting is sent once streaming begins
                    if stop_requested && exit.state == SessionState::Streaming {
                        handle.stop().await?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Output fell behind, skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await?;
    let ctx = task.await.context("Session controller panicked")?;

    info!(
        "Session finished in state {}: {} frames processed, {} dropped, {} classes",
        ctx.state(),
        ctx.frames_processed(),
        ctx.frames_dropped(),
        ctx.registry().len()
    );
    if ctx.state() == SessionState::Error {
        bail!("{}", ctx.last_failure().unwrap_or("session failed"));
    }
    Ok(())
}

async fn wait_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

fn replay(path: &Path, printer: &Printer) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut aggregator = Aggregator::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match aggregator.ingest_message(line) {
            Ok(_) => {
                if let Some(frame) = aggregator.latest() {
                    let level = argus_session::live_threat_level(frame);
                    printer.frame(frame, level, Some(aggregator.registry().len()));
                }
            }
            Err(e) => warn!("Line {}: {}", line_no + 1, e),
        }
    }

    info!(
        "Replayed {} frames ({} dropped)",
        aggregator.frames_processed(),
        aggregator.frames_dropped()
    );
    printer.registry(aggregator.registry());
    printer.report(&ThreatAnalysisReport::heuristic(&aggregator.registry().values()));
    Ok(())
}

fn render(path: &Path, printer: &Printer) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))?;

    // Accept a bare report or a saved end-session response
    let report = match value.get("analysis") {
        Some(analysis) => ThreatAnalysisReport::from_value(analysis)?,
        None => ThreatAnalysisReport::from_value(&value)?,
    };
    printer.report(&report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parses_watch_flags() {
        let cli = Cli::try_parse_from([
            "argus",
            "watch",
            "--control-url",
            "http://camera.local:8000",
            "--duration",
            "30",
            "--submit-partial",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Watch { control_url, duration, submit_partial, heuristic_fallback, .. } => {
                assert_eq!(control_url.as_deref(), Some("http://camera.local:8000"));
                assert_eq!(duration, Some(30));
                assert!(submit_partial);
                assert!(!heuristic_fallback);
            }
            _ => panic!("Expected watch command"),
        }
    }

    fn transition(from: SessionState, to: SessionState) -> SessionEvent {
        SessionEvent::StateChanged { from, to }
    }

    fn failure(kind: FailureKind) -> SessionEvent {
        SessionEvent::Failure { kind, message: "boom".to_string() }
    }

    #[test]
    fn test_watch_ends_when_stream_drops_before_streaming() {
        let config = SessionConfig {
            disconnect_policy: DisconnectPolicy::SubmitPartial,
            ..Default::default()
        };
        let mut exit = WatchExit::new(&config);
        assert!(!exit.observe(&transition(SessionState::Idle, SessionState::Starting)));
        assert!(!exit.observe(&transition(SessionState::Starting, SessionState::Disconnected)));
        assert!(exit.observe(&failure(FailureKind::Transport)));
    }

    #[test]
    fn test_watch_waits_for_partial_report() {
        let config = SessionConfig {
            disconnect_policy: DisconnectPolicy::SubmitPartial,
            ..Default::default()
        };
        let mut exit = WatchExit::new(&config);
        exit.observe(&transition(SessionState::Idle, SessionState::Starting));
        exit.observe(&transition(SessionState::Starting, SessionState::Streaming));
        assert!(!exit.observe(&transition(SessionState::Streaming, SessionState::Disconnected)));
        assert!(!exit.observe(&failure(FailureKind::Transport)));
        assert!(exit.observe(&SessionEvent::ReportReady(ThreatAnalysisReport::default())));

        let mut exit = WatchExit::new(&config);
        exit.observe(&transition(SessionState::Streaming, SessionState::Disconnected));
        assert!(exit.observe(&failure(FailureKind::Control)));
    }

    #[test]
    fn test_watch_exit_without_partial_submission() {
        let mut exit = WatchExit::new(&SessionConfig::default());
        exit.observe(&transition(SessionState::Streaming, SessionState::Disconnected));
        assert!(exit.observe(&failure(FailureKind::Transport)));

        let config = SessionConfig {
            report_fallback: ReportFallback::Heuristic,
            ..Default::default()
        };
        let mut exit = WatchExit::new(&config);
        exit.observe(&transition(SessionState::Stopping, SessionState::Idle));
        assert!(!exit.observe(&failure(FailureKind::Control)));
        exit.observe(&transition(SessionState::Starting, SessionState::Error));
        assert!(exit.observe(&failure(FailureKind::Control)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "control_url = \"http://camera.local:9000\"").unwrap();
        writeln!(file, "disconnect_policy = \"submit_partial\"").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.disconnect_policy, DisconnectPolicy::SubmitPartial);
    }

    #[test]
    fn test_replay_and_render_files() {
        let mut frames = tempfile::NamedTempFile::new().unwrap();
        writeln!(frames, r#"{{"objects": [{{"class_name": "knife", "confidence": 0.4, "bbox": [0, 0, 5, 5]}}]}}"#).unwrap();
        writeln!(frames, "not a frame").unwrap();
        writeln!(frames).unwrap();
        assert!(replay(frames.path(), &Printer::new(true)).is_ok());

        let mut report = tempfile::NamedTempFile::new().unwrap();
        write!(report, r#"{{"message": "Streaming stopped", "analysis": {{"threat_level": "low"}}}}"#).unwrap();
        assert!(render(report.path(), &Printer::new(false)).is_ok());

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "[1, 2]").unwrap();
        assert!(render(broken.path(), &Printer::new(false)).is_err());
    }
}
