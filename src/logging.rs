use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Initializes console logging, plus daily-rotated JSON files when `log_dir` is set.
///
/// The returned guard flushes the file writer when dropped; keep it alive for
/// the lifetime of the process. Fails, without installing anything, if the
/// log directory cannot be created.
pub fn init_logging(format: LogFormat, log_dir: Option<&Path>) -> io::Result<Option<WorkerGuard>> {
    // Respect RUST_LOG if set; otherwise info for everything
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("json_log_exporter=info,info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "json_log_exporter.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let (text_layer, json_layer) = match format {
        LogFormat::Text => (
            Some(fmt::layer().with_target(true).with_writer(std::io::stdout)),
            None,
        ),
        LogFormat::Json => (None, Some(fmt::layer().json().with_writer(std::io::stdout))),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(text_layer)
        .with(json_layer)
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncreatable_log_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "").unwrap();

        assert!(init_logging(LogFormat::Text, Some(&blocker.join("logs"))).is_err());
    }
}
