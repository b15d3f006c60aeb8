//! Inkstream CLI - binary entry point and terminal driver.
//!
//! A line-oriented REPL: each line of stdin becomes one user turn run
//! through the stream orchestrator, with protocol tags intercepted and the
//! visible transcript printed to stdout as it arrives.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use inkstream_engine::{StreamOrchestrator, SyncCallbacks};
use inkstream_providers::claude::ClaudeInference;
use inkstream_types::settings::Settings;

const API_KEY_ENV_VAR: &str = "ANTHROPIC_API_KEY";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Prefer silence over interleaving log lines with the streamed
    // transcript on stdout.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warnings.push(format!("failed to create log dir {}: {e}", parent.display()));
                continue;
            }
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => warnings.push(format!("failed to open log file {}: {e}", candidate.display())),
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(config_dir) = dirs::config_dir() {
        candidates.push(config_dir.join("inkstream").join("logs").join("inkstream.log"));
    }
    candidates.push(PathBuf::from(".inkstream").join("logs").join("inkstream.log"));
    candidates
}

fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("inkstream").join("settings.json"))
}

fn load_settings() -> Result<Settings> {
    let Some(path) = settings_path() else {
        return Ok(Settings::default());
    };
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Prints the visible transcript to stdout as the orchestrator produces it.
/// None of these sinks suspend, so the synchronous-closure adapter fits.
fn terminal_callbacks() -> SyncCallbacks<
    impl FnMut(String),
    impl FnMut(inkstream_types::Backtrack, String),
    impl FnMut(String),
    impl FnMut(String),
> {
    SyncCallbacks {
        on_text: |text: String| {
            print!("{text}");
            let _ = std::io::stdout().flush();
        },
        on_backtrack: |event: inkstream_types::Backtrack, _rewound_text: String| {
            eprintln!("\n[rewinding: {}]", event.reason);
        },
        on_error: |message: String| {
            eprintln!("\nerror: {message}");
        },
        on_done: |_final_text: String| {
            println!();
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let api_key = std::env::var(API_KEY_ENV_VAR)
        .with_context(|| format!("{API_KEY_ENV_VAR} must be set"))?;
    let settings = load_settings()?;

    let inference = ClaudeInference::new(api_key, settings.model().to_string(), settings.modes().clone());
    let mut orchestrator = StreamOrchestrator::new(inference, settings);
    let mut callbacks = terminal_callbacks();

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if matches!(line.trim(), "exit" | "quit") {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        orchestrator.run(line, &mut callbacks).await;
    }

    Ok(())
}
