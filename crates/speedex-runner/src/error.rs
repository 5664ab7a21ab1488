//! Runner error types.
//!
//! None of these leave the crate as errors: [`crate::SpeedtestRunner::run`]
//! turns every one into a failed `SpeedtestResult` whose message is the
//! error's `Display` text.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running or parsing one measurement.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// Nonzero exit; `message` is the tool's own diagnostic.
    #[error("{message}")]
    Exit { code: Option<i32>, message: String },

    #[error("timeout after {}", format_duration(.0))]
    Timeout(Duration),

    #[error("no JSON payload in speedtest output")]
    NoPayload,

    #[error("failed to parse speedtest output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("speedtest output is missing {0}")]
    Incomplete(&'static str),

    #[error("i/o error while running speedtest: {0}")]
    Io(#[from] std::io::Error),
}

pub type RunResult<T> = Result<T, RunError>;

fn format_duration(d: &Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}
