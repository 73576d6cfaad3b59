// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Parkwatch: entry point. One invocation is one sampling run.

mod args;

use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use args::{ConfigArgs, LogFormat};
use parkwatch::error::exit_codes;
use parkwatch::model::format_timestamp;
use parkwatch::pipeline::RunStatus;
use parkwatch::{run_once, ObservationStore, ScrapeError, ScrapeResult};

#[derive(Parser)]
#[command(
    name = "parkwatch",
    about = "Sample a parking facility's free spaces into a deduplicated CSV series",
    version
)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Print machine-readable JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Log level (trace, debug, info, warn, error). RUST_LOG overrides.
    #[arg(long, global = true, default_value = "info", env = "PARKWATCH_LOG_LEVEL")]
    log_level: String,

    /// Log format.
    #[arg(long, global = true, value_enum, default_value = "text", env = "PARKWATCH_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, extract and append one observation (default).
    Run,

    /// Create the store with its header if it does not exist.
    Init,

    /// Print the most recent stored record.
    Last,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   parkwatch completions bash > ~/.local/share/bash-completion/completions/parkwatch
    ///   parkwatch completions zsh > ~/.zfunc/_parkwatch
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Exit code for a failure: library errors carry their own, anything else is 1.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ScrapeError>()
        .map(ScrapeError::exit_code)
        .unwrap_or(exit_codes::OTHER)
}

async fn blocking<T, F>(f: F) -> ScrapeResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ScrapeResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ScrapeError::Io(std::io::Error::other(e)))?
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.config.to_config()?;
    let report = run_once(&config).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let note = match report.status {
            RunStatus::Appended => "appended".to_string(),
            RunStatus::Skipped => format!(
                "skipped: {}",
                report
                    .skip_reason
                    .map(|r| format!("{r:?}").to_lowercase())
                    .unwrap_or_default()
            ),
        };
        println!(
            "OK: {} {} available={} ({note})",
            report.timestamp, report.facility, report.available
        );
    }
    Ok(())
}

async fn init(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.config.to_config()?;
    let store = ObservationStore::new(&config.store);
    let path = store.path().to_path_buf();
    blocking(move || store.initialize()).await?;

    if cli.json {
        println!("{}", serde_json::json!({ "store": path, "initialized": true }));
    } else {
        println!("Store ready: {}", path.display());
    }
    Ok(())
}

async fn last(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.config.to_config()?;
    let store = ObservationStore::new(&config.store);
    let path = store.path().to_path_buf();
    let record = blocking(move || store.last()).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }
    match record {
        Some(r) => {
            let age = chrono::Utc::now().signed_duration_since(r.timestamp);
            println!(
                "{} {} available={} ({} min ago)",
                format_timestamp(&r.timestamp),
                if r.facility_name.is_empty() { "-" } else { r.facility_name.as_str() },
                r.available,
                age.num_minutes()
            );
        }
        None => println!("No records in {}", path.display()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    let result = match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => run(&cli).await,
        Commands::Init => init(&cli).await,
        Commands::Last => last(&cli).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "parkwatch", &mut std::io::stdout());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_codes_follow_error_kind() {
        let lock = anyhow::Error::new(ScrapeError::LockTimeout {
            path: "log.csv.lock".into(),
            waited: std::time::Duration::from_secs(10),
        });
        assert_eq!(exit_code_for(&lock), exit_codes::IO);

        let config = anyhow::Error::new(ScrapeError::Config("bad".into()));
        assert_eq!(exit_code_for(&config), exit_codes::USAGE);

        let other = anyhow::anyhow!("unexpected");
        assert_eq!(exit_code_for(&other), exit_codes::OTHER);
    }

    #[test]
    fn test_subcommand_defaults_to_run() {
        let cli = Cli::try_parse_from(["parkwatch", "--facility", "Lot", "--json"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.json);

        let cli = Cli::try_parse_from(["parkwatch", "last", "--store", "x.csv"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Last)));
        assert_eq!(cli.config.store.as_deref(), Some("x.csv"));
    }

    #[tokio::test]
    async fn test_init_then_last_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("log.csv");
        let cli = Cli::try_parse_from([
            "parkwatch",
            "init",
            "--store",
            store.to_str().unwrap(),
        ])
        .unwrap();
        init(&cli).await.unwrap();
        last(&cli).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&store).unwrap(),
            "timestamp,facility_name,available_count\n"
        );
    }
}
