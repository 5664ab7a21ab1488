//! speedex-core: result model and configuration shared by every speedex crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ExporterConfig, ScrapeMode, Settings, ToolSettings};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
