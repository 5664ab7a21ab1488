//! Ookla `--format=json` report parsing.
//!
//! The CLI writes one JSON record per line. On a normal run that is a single
//! `{"type":"result", ...}` object, but the first run may print the license
//! text before it and failing runs print `{"type":"log", ...}` records. The
//! report is found by scanning stdout from the first `{` as a stream of JSON
//! values.

use serde::Deserialize;
use serde_json::Value;

use speedex_core::{
    LoadedLatency, Measurement, PingStats, ServerInfo, TransferStats, bytes_per_sec_to_mbps,
};

use crate::error::{RunError, RunResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReport {
    ping: Option<RawPing>,
    download: Option<RawTransfer>,
    upload: Option<RawTransfer>,
    packet_loss: Option<f64>,
    isp: Option<String>,
    interface: Option<RawInterface>,
    server: Option<RawServer>,
}

#[derive(Debug, Deserialize)]
struct RawPing {
    latency: f64,
    jitter: f64,
    low: Option<f64>,
    high: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawTransfer {
    /// Bytes per second.
    bandwidth: f64,
    bytes: u64,
    elapsed: u64,
    latency: RawLatency,
}

#[derive(Debug, Deserialize)]
struct RawLatency {
    iqm: f64,
    low: Option<f64>,
    high: Option<f64>,
    jitter: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInterface {
    external_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    id: RawServerId,
    #[serde(default)]
    host: String,
    name: String,
    location: String,
    country: String,
}

/// Server ids are numbers in current CLI releases, strings in some older ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawServerId {
    Number(u64),
    Text(String),
}

impl RawServerId {
    fn into_string(self) -> String {
        match self {
            RawServerId::Number(n) => n.to_string(),
            RawServerId::Text(s) => s,
        }
    }
}

/// Parse the tool's stdout into a [`Measurement`].
pub fn parse_report(stdout: &str) -> RunResult<Measurement> {
    let record = find_result_record(stdout)?;
    let raw: RawReport = serde_json::from_value(record)?;
    raw.into_measurement()
}

/// Message of the last `{"type":"log"}` record, if any.
///
/// The CLI reports some failures only this way, with an empty stderr.
pub fn last_log_message(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .filter(|v| v.get("type").and_then(Value::as_str) == Some("log"))
        .filter_map(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .last()
}

fn find_result_record(stdout: &str) -> RunResult<Value> {
    let start = stdout.find('{').ok_or(RunError::NoPayload)?;
    let mut untyped: Option<Value> = None;

    for value in serde_json::Deserializer::from_str(&stdout[start..]).into_iter::<Value>() {
        let value = match value {
            Ok(v) => v,
            // Trailing noise after a usable record is tolerated.
            Err(e) if untyped.is_some() => {
                tracing::debug!(error = %e, "ignoring trailing speedtest output");
                break;
            }
            Err(e) => return Err(RunError::Parse(e)),
        };
        if !value.is_object() {
            continue;
        }
        match value.get("type").and_then(Value::as_str) {
            Some("result") => return Ok(value),
            Some(_) => {}
            None => untyped = Some(value),
        }
    }

    untyped.ok_or(RunError::Incomplete("result record"))
}

impl RawReport {
    fn into_measurement(self) -> RunResult<Measurement> {
        let server = self.server.ok_or(RunError::Incomplete("server"))?;
        let isp = self.isp.ok_or(RunError::Incomplete("isp"))?;
        if self.ping.is_none() && self.download.is_none() && self.upload.is_none() {
            return Err(RunError::Incomplete("ping, download and upload sections"));
        }

        Ok(Measurement {
            server: ServerInfo {
                id: server.id.into_string(),
                host: server.host,
                name: server.name,
                location: server.location,
                country: server.country,
                isp,
            },
            external_ip: self.interface.and_then(|i| i.external_ip),
            ping: self.ping.map(|p| PingStats {
                latency_ms: p.latency,
                jitter_ms: p.jitter,
                low_ms: p.low,
                high_ms: p.high,
            }),
            download: self.download.map(RawTransfer::into_stats),
            upload: self.upload.map(RawTransfer::into_stats),
            packet_loss_percent: self.packet_loss,
        })
    }
}

impl RawTransfer {
    fn into_stats(self) -> TransferStats {
        TransferStats {
            bandwidth_mbps: bytes_per_sec_to_mbps(self.bandwidth),
            bytes_transferred: self.bytes,
            elapsed_ms: self.elapsed,
            latency: LoadedLatency {
                iqm_ms: self.latency.iqm,
                low_ms: self.latency.low,
                high_ms: self.latency.high,
                jitter_ms: self.latency.jitter,
            },
        }
    }
}
