use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP server error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Metric setup failed: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template '{name}' failed to compile: {message}")]
    Template { name: String, message: String },

    #[error("No value template provided for {metric}")]
    MissingValueTemplate { metric: String },

    #[error("Invalid {kind} name '{name}'")]
    InvalidName { kind: &'static str, name: String },

    #[error("Metric '{metric}' is already registered in registry '{registry}'")]
    DuplicateMetric { registry: String, metric: String },

    #[error("Metric '{metric}' exports to unknown export group '{export}'")]
    UnknownExport { metric: String, export: String },

    #[error("Invalid buckets for {metric}: {message}")]
    Bucket { metric: String, message: String },

    #[error("Cannot open source file '{path}': {source}")]
    Source {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ExporterError>;
