//! Command-line front end for the provisioning orchestrator.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use provisio::fetcher::{ArtifactCache, detect_architecture, is_installed};
use provisio::{
    ProvisionOptions, ProvisionSink, ProvisioningOrchestrator, SessionOutcome, Step, StepId,
    init_logging,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "provisio",
    version,
    about = "Provision a self-contained runtime prefix",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    /// JSON options file; defaults apply when omitted
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Write daily-rolling log files here
    #[arg(long, value_name = "DIR", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every provisioning step
    Run,
    /// Print the detected architecture tag
    DetectArch,
    /// Show installation and cache state
    Status,
    /// Discard a step's outputs, then run
    Rerun {
        /// Step name, e.g. `download` or `install_dependencies`
        step: StepId,
    },
}

/// Prints log lines to stdout and redraws one progress line on stderr.
#[derive(Default)]
struct TerminalSink {
    bar_visible: Mutex<bool>,
}

impl TerminalSink {
    fn clear_bar(&self) {
        let mut visible = self.bar_visible.lock();
        if *visible {
            eprint!("\r{}\r", " ".repeat(terminal_width()));
            *visible = false;
        }
    }
}

impl ProvisionSink for TerminalSink {
    fn on_progress(&self, percent: Option<u8>, transferred: u64, total: Option<u64>) {
        let line = render_progress(percent, transferred, total, terminal_width());
        eprint!("\r{}", line);
        let _ = std::io::stderr().flush();
        *self.bar_visible.lock() = percent != Some(100);
        if percent == Some(100) {
            eprintln!();
        }
    }

    fn on_log(&self, line: &str) {
        self.clear_bar();
        println!("{}", line);
    }

    fn on_step_changed(&self, step: &Step) {
        tracing::debug!(step = %step.id, status = ?step.status, "Step changed");
    }
}

fn terminal_width() -> usize {
    term_size::dimensions_stderr()
        .or_else(term_size::dimensions)
        .map(|(w, _)| w)
        .unwrap_or(80)
        .max(20)
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn render_progress(percent: Option<u8>, transferred: u64, total: Option<u64>, width: usize) -> String {
    let (Some(percent), Some(total)) = (percent, total) else {
        return format!("{} downloaded", human_bytes(transferred));
    };

    let counts = format!(
        " {:>3}% {}/{}",
        percent,
        human_bytes(transferred),
        human_bytes(total)
    );
    let bar_width = width.saturating_sub(counts.len() + 3).clamp(10, 60);
    let filled = bar_width * percent as usize / 100;
    format!(
        "[{}{}]{}",
        "#".repeat(filled),
        " ".repeat(bar_width - filled),
        counts
    )
}

fn load_options(cli: &Cli) -> Result<ProvisionOptions> {
    let mut options = match &cli.config {
        Some(path) => ProvisionOptions::load(path)
            .with_context(|| format!("loading options from {}", path.display()))?,
        None => ProvisionOptions::default(),
    };
    if let Some(dir) = &cli.log_dir {
        options.log_dir = Some(dir.clone());
    }
    Ok(options)
}

async fn run_session(options: ProvisionOptions, rerun: Option<StepId>) -> Result<ExitCode> {
    let orchestrator = ProvisioningOrchestrator::builder(options)
        .sink(Arc::new(TerminalSink::default()))
        .build()
        .context("building orchestrator")?;

    if let Some(step) = rerun {
        orchestrator
            .discard_outputs(step)
            .await
            .with_context(|| format!("discarding outputs of {}", step))?;
    }

    let stopper = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping");
            stopper.stop();
        }
    });

    let outcome = orchestrator.start().await;
    Ok(match outcome {
        Some(SessionOutcome::Completed) => ExitCode::SUCCESS,
        Some(SessionOutcome::Failed { step, kind }) => {
            let detail = orchestrator
                .step(step)
                .ok()
                .and_then(|s| s.last_error)
                .unwrap_or_default();
            eprintln!("error: {} failed ({:?}): {}", step, kind, detail);
            ExitCode::FAILURE
        }
        Some(SessionOutcome::Cancelled) => {
            eprintln!("cancelled");
            ExitCode::from(130)
        }
        None => {
            eprintln!("provisioning is already running");
            ExitCode::FAILURE
        }
    })
}

fn print_status(options: &ProvisionOptions) -> Result<()> {
    println!(
        "prefix     {} ({})",
        options.prefix_dir.display(),
        if is_installed(&options.prefix_dir) {
            "installed"
        } else {
            "not installed"
        }
    );

    let tag = match detect_architecture(&options.artifact.abi_overrides) {
        Ok(tag) => tag,
        Err(e) => {
            println!("arch       {}", e);
            return Ok(());
        }
    };
    println!("arch       {}", tag);

    let cache = ArtifactCache::new(
        options.cache_dir.clone(),
        options.artifact.file_name_template.clone(),
    );
    let artifact = cache.artifact_path(tag);
    let state = match cache.cached_version(tag) {
        _ if !artifact.is_file() => "absent".to_string(),
        Some(version) if version == options.artifact.version => format!("version {}", version),
        Some(version) => format!("stale version {}", version),
        None => "unversioned".to_string(),
    };
    println!("artifact   {} ({})", artifact.display(), state);
    if cache.partial_path(tag).is_file() {
        println!("partial    {}", cache.partial_path(tag).display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let options = load_options(&cli)?;
    let _guard = init_logging(options.log_dir.as_deref())?;

    match cli.command {
        Command::Run => run_session(options, None).await,
        Command::Rerun { step } => run_session(options, Some(step)).await,
        Command::DetectArch => {
            let tag = detect_architecture(&options.artifact.abi_overrides)?;
            println!("{}", tag);
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            print_status(&options)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_progress() {
        let line = render_progress(Some(50), 512, Some(1024), 60);
        assert!(line.starts_with('['));
        assert!(line.ends_with(" 50% 512 B/1.0 KiB"));
        assert_eq!(line.matches('#').count(), (line.find(']').unwrap() - 1) / 2);
    }

    #[test]
    fn test_render_indeterminate() {
        assert_eq!(render_progress(None, 2048, None, 80), "2.0 KiB downloaded");
    }

    #[test]
    fn test_parse_rerun_step() {
        let cli = Cli::parse_from(["provisio", "rerun", "download"]);
        assert!(matches!(cli.command, Command::Rerun { step: StepId::Download }));
    }
}
