//! Measurement result model shared across speedex crates.
//!
//! A [`SpeedtestResult`] is the outcome of one measurement attempt. It is
//! built once and then only ever shared behind an `Arc`; the cache swaps
//! whole results and never edits one in place.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The outcome of a single measurement attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedtestResult {
    /// Wall-clock time the attempt completed (success or failure).
    pub timestamp: SystemTime,
    pub outcome: Outcome,
}

/// Success carries the measurement, failure carries only a message.
///
/// Encoding the two cases as variants keeps a failed result from ever
/// carrying measurement data, and a successful one from carrying an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success(Measurement),
    Failure { message: String },
}

/// Everything the tool reported for a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub server: ServerInfo,
    pub external_ip: Option<String>,
    pub ping: Option<PingStats>,
    pub download: Option<TransferStats>,
    pub upload: Option<TransferStats>,
    /// `None` when the server did not report loss. Not the same as `Some(0.0)`.
    pub packet_loss_percent: Option<f64>,
}

/// Identity of the measurement endpoint and the client's ISP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub host: String,
    pub name: String,
    pub location: String,
    pub country: String,
    pub isp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingStats {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub low_ms: Option<f64>,
    pub high_ms: Option<f64>,
}

/// One direction (download or upload) of the bandwidth test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferStats {
    pub bandwidth_mbps: f64,
    pub bytes_transferred: u64,
    pub elapsed_ms: u64,
    pub latency: LoadedLatency,
}

/// Latency measured while the link was loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedLatency {
    pub iqm_ms: f64,
    pub low_ms: Option<f64>,
    pub high_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
}

impl SpeedtestResult {
    /// Build a successful result stamped with the current time.
    pub fn success(measurement: Measurement) -> Self {
        Self::success_at(SystemTime::now(), measurement)
    }

    pub fn success_at(timestamp: SystemTime, measurement: Measurement) -> Self {
        Self {
            timestamp,
            outcome: Outcome::Success(measurement),
        }
    }

    /// Build a failed result stamped with the current time.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::failure_at(SystemTime::now(), message)
    }

    pub fn failure_at(timestamp: SystemTime, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            outcome: Outcome::Failure {
                message: message.into(),
            },
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    pub fn measurement(&self) -> Option<&Measurement> {
        match &self.outcome {
            Outcome::Success(m) => Some(m),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure { message } => Some(message),
        }
    }

    /// Completion time as fractional seconds since the Unix epoch.
    pub fn unix_timestamp(&self) -> f64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64()
    }
}

/// Convert the tool's bytes/second into SI megabits/second, two decimals.
pub fn bytes_per_sec_to_mbps(bytes_per_sec: f64) -> f64 {
    ((bytes_per_sec * 8.0 / 1_000_000.0) * 100.0).round() / 100.0
}
