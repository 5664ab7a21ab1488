//! speedexd: Ookla speedtest results as a Prometheus scrape target.
//!
//! Assembles the exporter:
//! - Config (TOML file + environment overrides)
//! - Speedtest runner (subprocess)
//! - Single-flight coordinator + result cache
//! - Background schedule and state-file follower (cached mode)
//! - HTTP API (`/metrics`, `/healthz`)
//!
//! # Usage
//!
//! ```text
//! speedexd serve --config /etc/speedex/speedex.toml
//! speedexd once --config /etc/speedex/speedex.toml
//! speedexd check-config --config /etc/speedex/speedex.toml
//! ```

mod once;
mod serve;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use speedex_core::{ExporterConfig, Settings};

const DEFAULT_LOG_FILTER: &str = "info,speedexd=debug,speedex=debug";

#[derive(Parser)]
#[command(name = "speedexd", about = "Prometheus exporter for Ookla speedtest", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve /metrics over HTTP.
    Serve {
        /// Path to speedex.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Scrape mode: on_demand or cached (overrides the config file).
        #[arg(long)]
        mode: Option<String>,

        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },

    /// Run one measurement, print the metrics and exit.
    ///
    /// Exits 1 when the measurement failed. With `[state].path` configured
    /// the result is also handed to a running `serve`.
    Once {
        /// Path to speedex.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },

    /// Validate the configuration and print it as TOML.
    CheckConfig {
        /// Path to speedex.toml.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            mode,
            log_format,
        } => {
            init_tracing(log_format);
            let mut raw = load_config(config.as_deref())?;
            if let Some(port) = port {
                raw.server.port = port;
            }
            if let Some(mode) = mode {
                raw.scrape.mode = mode;
            }
            serve::run_serve(raw.validate()?).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Once { config, log_format } => {
            init_tracing(log_format);
            let settings = load_settings(config.as_deref())?;
            once::run_once(settings).await
        }
        Command::CheckConfig { config } => {
            init_tracing(LogFormat::Text);
            let raw = load_config(config.as_deref())?;
            raw.validate()?;
            print!("{}", raw.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Logs go to stderr; stdout is reserved for `once` output.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ExporterConfig> {
    let mut config = match path {
        Some(path) => ExporterConfig::from_file(path)?,
        None => ExporterConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    Ok(load_config(path)?.validate()?)
}
