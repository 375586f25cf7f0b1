//! Streat CLI - Extract metadata from files and streams
//!
//! Usage:
//!   streat extract <FILE|->... [--limit <bytes>] [--step <bytes>]
//!   streat config
//!
//! Examples:
//!   streat extract photo.jpg clip.mp4
//!   curl -s https://example.org/big.tif | streat extract - --limit 1048576
//!   streat config > streat.toml

use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use streat::logging::{self, LogConfig, LogFormat};
use streat::{ExtractOptions, Extraction, Extractor, Settings};

#[derive(Parser)]
#[command(name = "streat")]
#[command(about = "Streat - incremental metadata extraction from streams")]
#[command(version)]
struct Cli {
    /// Path to a settings file (default: $STREAT_CONFIG, ./streat.toml, user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log format on stderr
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract metadata from files (use `-` for stdin)
    Extract {
        /// Files to analyze, in order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Stop reading each input after this many bytes (0 = unlimited)
        #[arg(short, long)]
        limit: Option<u64>,

        /// Bytes added to the scratch buffer per window
        #[arg(short, long)]
        step: Option<u64>,

        /// Print one JSON object per line instead of pretty output
        #[arg(long)]
        compact: bool,
    },

    /// Print the resolved settings as TOML
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(LogConfig::new().with_format(cli.log_format).with_env_overrides());

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Extract {
            inputs,
            limit,
            step,
            compact,
        } => {
            let mut options = ExtractOptions::new();
            options.limit = limit;
            options.step = step;
            cmd_extract(settings, inputs, options, compact).await
        }
        Commands::Config => cmd_config(&settings),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, streat::config::SettingsError> {
    match path {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    }
}

async fn cmd_extract(
    settings: Settings,
    inputs: Vec<PathBuf>,
    options: ExtractOptions,
    compact: bool,
) -> ExitCode {
    let extractor = match Extractor::new(settings) {
        Ok(extractor) => extractor,
        Err(e) => {
            eprintln!("Error starting extractor: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Queue everything up front; the engine works through it in order.
    let mut pending = Vec::with_capacity(inputs.len());
    for input in &inputs {
        pending.push(submit(&extractor, input, options).await);
    }

    let mut failed = false;
    for (input, outcome) in inputs.iter().zip(join_all(pending.into_iter().map(resolve)).await) {
        let record = match outcome {
            Ok(metadata) => json!({ "source": label(input), "metadata": metadata }),
            Err(message) => {
                failed = true;
                json!({ "source": label(input), "error": message })
            }
        };
        print_record(&record, compact);
    }

    extractor.shutdown().await;
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn submit(
    extractor: &Extractor,
    input: &Path,
    options: ExtractOptions,
) -> Result<Extraction, String> {
    let submitted = if input == Path::new("-") {
        extractor.submit(tokio::io::stdin(), options)
    } else {
        let file = tokio::fs::File::open(input)
            .await
            .map_err(|e| format!("cannot open '{}': {}", input.display(), e))?;
        extractor.submit(file, options)
    };
    let pending = submitted.map_err(|e| e.to_string())?;
    tracing::debug!(id = %pending.id(), input = %label(input), "input queued");
    Ok(pending)
}

async fn resolve(
    pending: Result<Extraction, String>,
) -> Result<streat::Metadata, String> {
    pending?.await.map_err(|e| e.to_string())
}

fn label(input: &Path) -> String {
    if input == Path::new("-") {
        "<stdin>".to_string()
    } else {
        input.display().to_string()
    }
}

fn print_record(record: &Value, compact: bool) {
    let rendered = if compact {
        serde_json::to_string(record)
    } else {
        serde_json::to_string_pretty(record)
    };
    match rendered {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error rendering output: {}", e),
    }
}

fn cmd_config(settings: &Settings) -> ExitCode {
    match settings.to_toml() {
        Ok(text) => {
            print!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error rendering settings: {}", e);
            ExitCode::FAILURE
        }
    }
}
