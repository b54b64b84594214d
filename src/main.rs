use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use json_log_exporter::config::Config;
use json_log_exporter::logging::{self, LogFormat};
use json_log_exporter::server;
use json_log_exporter::tail::TailConfig;
use json_log_exporter::Engine;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "json_log_exporter")]
#[command(about = "Exports Prometheus metrics derived from JSON log files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file
    #[arg(long = "config-file", default_value = "json_log_exporter.toml", global = true)]
    config_file: PathBuf,

    /// Address to listen on for the web interface
    #[arg(long = "web.listen-address", default_value = "0.0.0.0:9321")]
    listen_address: SocketAddr,

    /// Path under which to expose metrics without an export group
    #[arg(long = "web.telemetry-path", default_value = "/metrics", global = true)]
    telemetry_path: String,

    /// Delay between checks for new data in a source file
    #[arg(long = "tail.poll-interval-ms", default_value_t = 250)]
    poll_interval_ms: u64,

    /// Ingest the existing content of source files instead of starting at their end
    #[arg(long = "tail.from-beginning")]
    from_beginning: bool,

    /// Directory for daily-rotated JSON log files
    #[arg(long = "log.dir")]
    log_dir: Option<PathBuf>,

    /// Console log format
    #[arg(long = "log.format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init_logging(cli.log_format, cli.log_dir.as_deref())
        .context("creating log directory")?;

    let config = Config::load(&cli.config_file)
        .with_context(|| format!("loading {}", cli.config_file.display()))?;
    let engine = Engine::build(&config, &cli.telemetry_path).context("invalid configuration")?;

    if let Some(Commands::Check) = cli.command {
        let metrics: usize = engine
            .ingestors()
            .iter()
            .map(|i| i.group().metric_count())
            .sum();
        info!(log_groups = engine.ingestors().len(), metrics, "Configuration is valid");
        return Ok(());
    }

    let tail = TailConfig {
        poll_interval: Duration::from_millis(cli.poll_interval_ms.max(1)),
        from_beginning: cli.from_beginning,
    };
    let _tasks = engine
        .start(&tail)
        .await
        .context("failed to open source files")?;

    info!(address = %cli.listen_address, "HTTP server listening");
    if let Err(e) = server::start_server(engine.router(), cli.listen_address).await {
        error!(error = %e, "HTTP server failed");
        return Err(e.into());
    }
    Ok(())
}
