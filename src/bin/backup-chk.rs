//! # backup-chk CLI - verify backups against their originals
//!
//! Walks each reference tree and checks that the backup tree holds the same
//! files, directories and symlinks. Interrupted runs resume where they
//! stopped.
//!
//! ## Usage
//! ```bash
//! # Check a home directory against its backup
//! backup-chk /Users/:/Volumes/Backup/Users
//!
//! # Skip caches and trash, show what is being checked
//! backup-chk -v --macos-excludes -x 'Library/Developer' /Users/:/Volumes/Backup/Users
//!
//! # Start over instead of resuming, print the result as JSON
//! backup-chk --no-resume --json /data:/mnt/backup/data
//! ```

use backup_chk::checker::default_config_dir;
use backup_chk::utils::{expand_user, format_bytes, format_count};
use backup_chk::{
    BackupChecker, CheckConfig, CheckSummary, Mismatch, Progress, ReportSink, Result, RootPair,
    ShutdownSignal, MACOS_EXCLUDES,
};
use clap::error::ErrorKind;
use clap::{ArgAction, Parser};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// backup-chk - verify that backups match their reference trees
#[derive(Parser)]
#[command(name = "backup-chk")]
#[command(version)]
#[command(about = "Verify that backup trees match their reference trees")]
#[command(long_about = None)]
struct Cli {
    /// Pairs to check, e.g. /Users/:/Volumes/Backup/Users
    #[arg(value_name = "REFERENCE_DIR:BACKUP_DIR", required = true, value_parser = parse_pair)]
    pairs: Vec<RootPair>,

    /// More output (-v: info, -vv: debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Exclude paths containing PATTERN (`*` matches anything)
    #[arg(short = 'x', long = "exclude", value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Configuration and state directory (defaults to ~/.backup-chk)
    #[arg(short, long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Add the built-in macOS cache and trash exclusions
    #[arg(long)]
    macos_excludes: bool,

    /// Discard saved progress and start every walk from the root
    #[arg(long)]
    no_resume: bool,

    /// Print mismatches and summaries as JSON
    #[arg(long)]
    json: bool,

    /// Seconds between progress checkpoints (0 saves only on exit)
    #[arg(long, value_name = "SECS")]
    flush_interval: Option<u64>,
}

fn parse_pair(arg: &str) -> std::result::Result<RootPair, String> {
    RootPair::parse(arg).map_err(|e| e.user_message())
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    // Set up logging
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() || cli.json {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let config_dir = cli
        .config_dir
        .as_deref()
        .map(expand_user)
        .unwrap_or_else(default_config_dir);
    std::fs::create_dir_all(&config_dir)?;

    let mut config = CheckConfig::load(&config_dir)?;
    config.exclude.extend(cli.exclude);
    if cli.macos_excludes {
        config
            .exclude
            .extend(MACOS_EXCLUDES.iter().map(|pattern| pattern.to_string()));
    }
    if let Some(secs) = cli.flush_interval {
        config.flush_interval_secs = secs;
    }

    let checker = BackupChecker::builder()
        .config_dir(&config_dir)
        .config(config)
        .resume(!cli.no_resume)
        .shutdown(ShutdownSignal::install()?)
        .build()?;

    let mut sink = ConsoleSink::new(cli.json);
    let result = checker.check_all(&cli.pairs, &mut sink);
    sink.clear();
    let summaries = result?;

    if cli.json {
        let report = JsonReport {
            mismatches: &sink.mismatches,
            summaries: &summaries,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    mismatches: &'a [Mismatch],
    summaries: &'a [CheckSummary],
}

/// Terminal output: a spinner for progress, one line per mismatch
struct ConsoleSink {
    json: bool,
    spinner: Option<ProgressBar>,
    mismatches: Vec<Mismatch>,
}

impl ConsoleSink {
    fn new(json: bool) -> Self {
        Self {
            json,
            spinner: None,
            mismatches: Vec::new(),
        }
    }

    fn clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    fn println(&self, line: String) {
        match &self.spinner {
            Some(spinner) => spinner.suspend(|| println!("{}", line)),
            None => println!("{}", line),
        }
    }
}

impl ReportSink for ConsoleSink {
    fn begin(&mut self, pair: &RootPair, state_dir: &Path) -> Result<()> {
        self.clear();
        if self.json {
            return Ok(());
        }
        println!("{} {}", "Checking".blue().bold(), pair.to_string().cyan());
        tracing::info!("State directory: {}", state_dir.display());

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner.set_message("Scanning...");
        self.spinner = Some(spinner);
        Ok(())
    }

    fn mismatch(&mut self, mismatch: &Mismatch) -> Result<()> {
        if self.json {
            self.mismatches.push(mismatch.clone());
        } else {
            self.println(format!("{}: {}", mismatch.path.yellow(), mismatch.reason().red()));
        }
        Ok(())
    }

    fn progress(&mut self, progress: &Progress) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!(
                "{} checked / {} errors @ {}/s ({})",
                format_count(progress.items_checked),
                format_count(progress.mismatches),
                format_bytes(progress.bytes_per_sec() as u64),
                progress.current.as_deref().unwrap_or(""),
            ));
        }
    }

    fn finish(&mut self, summary: &CheckSummary) {
        self.clear();
        if self.json {
            return;
        }

        let elapsed = Duration::from_millis(summary.elapsed_ms);
        let (mark, errors) = if summary.is_clean() {
            ("✓".green().bold(), format_count(summary.mismatches).green())
        } else {
            ("✗".red().bold(), format_count(summary.mismatches).red())
        };
        println!(
            "{} Finished! {} checked, {} errors, {} read in {}{}",
            mark,
            format_count(summary.items_checked).cyan(),
            errors,
            format_bytes(summary.bytes_read).cyan(),
            format_duration(Duration::from_secs(elapsed.as_secs())),
            if summary.resumed { " (resumed)".dimmed().to_string() } else { String::new() },
        );
        if let (false, Some(log)) = (summary.is_clean(), &summary.session_log) {
            println!("  Mismatches logged to {}", log.display().to_string().cyan());
        }
    }
}
