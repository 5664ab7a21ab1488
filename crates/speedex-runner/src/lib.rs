//! speedex-runner: one measurement per call to the Ookla speedtest CLI.
//!
//! Spawns `speedtest --format=json`, bounds it with a timeout, and parses
//! the JSON report. Spawn failures, nonzero exits, timeouts and malformed
//! output all come back as a failed [`speedex_core::SpeedtestResult`]
//! rather than an error.

pub mod error;
pub mod report;
pub mod runner;

pub use error::{RunError, RunResult};
pub use report::parse_report;
pub use runner::{BoxFuture, Measure, SpeedtestRunner};
