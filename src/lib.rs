pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod tail;
pub mod template;

pub use engine::Engine;
pub use error::{ExporterError, Result};
