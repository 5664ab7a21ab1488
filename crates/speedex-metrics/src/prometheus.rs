//! Prometheus text exposition format.
//!
//! Renders the current result into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent. Every family is
//! a gauge. Metric order and label order are fixed, so rendering the same
//! result twice gives identical bytes.

use speedex_core::{Measurement, SpeedtestResult, TransferStats};

/// Render `result` (or its absence) as Prometheus text.
///
/// Measurement gauges appear only for a successful result, and optional
/// fields only when the tool reported them. A failed or missing result
/// yields just the success indicator and, if a result exists, its timestamp.
pub fn render_prometheus(result: Option<&SpeedtestResult>) -> String {
    let mut out = String::new();

    let success = if result.is_some_and(SpeedtestResult::succeeded) {
        "1"
    } else {
        "0"
    };
    gauge(
        &mut out,
        "speedtest_scrape_success",
        "1 if the last speedtest run succeeded, 0 if it failed.",
        "",
        success,
    );

    let Some(result) = result else {
        return out;
    };

    gauge(
        &mut out,
        "speedtest_last_run_timestamp",
        "Unix timestamp of the last speedtest run.",
        "",
        &fmt_float(result.unix_timestamp()),
    );

    if let Some(m) = result.measurement() {
        render_measurement(&mut out, m);
    }
    out
}

fn render_measurement(out: &mut String, m: &Measurement) {
    let labels = label_set(&[
        ("server_name", m.server.name.as_str()),
        ("server_location", m.server.location.as_str()),
        ("isp", m.server.isp.as_str()),
    ]);

    if let Some(ping) = &m.ping {
        float_gauge(
            out,
            "speedtest_ping_latency_ms",
            "Ping latency in milliseconds.",
            &labels,
            Some(ping.latency_ms),
        );
        float_gauge(
            out,
            "speedtest_ping_jitter_ms",
            "Ping jitter in milliseconds.",
            &labels,
            Some(ping.jitter_ms),
        );
        float_gauge(
            out,
            "speedtest_ping_low_ms",
            "Ping low in milliseconds.",
            &labels,
            ping.low_ms,
        );
        float_gauge(
            out,
            "speedtest_ping_high_ms",
            "Ping high in milliseconds.",
            &labels,
            ping.high_ms,
        );
    }

    if let Some(download) = &m.download {
        render_transfer(out, "download", "received during", &labels, download);
    }
    if let Some(upload) = &m.upload {
        render_transfer(out, "upload", "sent during", &labels, upload);
    }

    float_gauge(
        out,
        "speedtest_packet_loss",
        "Packet loss percentage.",
        &labels,
        m.packet_loss_percent,
    );

    let info_labels = label_set(&[
        ("server_id", m.server.id.as_str()),
        ("server_host", m.server.host.as_str()),
        ("server_country", m.server.country.as_str()),
        ("external_ip", m.external_ip.as_deref().unwrap_or("unknown")),
    ]);
    gauge(
        out,
        "speedtest_info",
        "Speedtest result metadata (server_id, server_host, server_country, external_ip).",
        &info_labels,
        "1",
    );
}

fn render_transfer(
    out: &mut String,
    direction: &str,
    verb: &str,
    labels: &str,
    t: &TransferStats,
) {
    let title = if direction == "download" { "Download" } else { "Upload" };

    float_gauge(
        out,
        &format!("speedtest_{direction}_bandwidth_mbps"),
        &format!("{title} bandwidth in Mbps."),
        labels,
        Some(t.bandwidth_mbps),
    );
    gauge(
        out,
        &format!("speedtest_{direction}_bytes"),
        &format!("Total bytes {verb} the {direction} test."),
        labels,
        &t.bytes_transferred.to_string(),
    );
    gauge(
        out,
        &format!("speedtest_{direction}_elapsed_ms"),
        &format!("{title} test duration in milliseconds."),
        labels,
        &t.elapsed_ms.to_string(),
    );
    float_gauge(
        out,
        &format!("speedtest_{direction}_latency_iqm_ms"),
        &format!("{title} latency interquartile mean in milliseconds."),
        labels,
        Some(t.latency.iqm_ms),
    );
    float_gauge(
        out,
        &format!("speedtest_{direction}_latency_low_ms"),
        &format!("{title} latency low in milliseconds."),
        labels,
        t.latency.low_ms,
    );
    float_gauge(
        out,
        &format!("speedtest_{direction}_latency_high_ms"),
        &format!("{title} latency high in milliseconds."),
        labels,
        t.latency.high_ms,
    );
    float_gauge(
        out,
        &format!("speedtest_{direction}_latency_jitter_ms"),
        &format!("{title} latency jitter in milliseconds."),
        labels,
        t.latency.jitter_ms,
    );
}

/// Emit a gauge family only when the value was reported.
fn float_gauge(out: &mut String, name: &str, help: &str, labels: &str, value: Option<f64>) {
    if let Some(v) = value {
        gauge(out, name, help, labels, &fmt_float(v));
    }
}

fn gauge(out: &mut String, name: &str, help: &str, labels: &str, value: &str) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} gauge\n"));
    out.push_str(&format!("{name}{labels} {value}\n"));
}

/// Render `{k="v",...}` in the given order.
fn label_set(pairs: &[(&str, &str)]) -> String {
    let body: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect();
    format!("{{{}}}", body.join(","))
}

fn escape_label_value(v: &str) -> String {
    let mut escaped = String::with_capacity(v.len());
    for c in v.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn fmt_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use speedex_core::{LoadedLatency, PingStats, ServerInfo};

    use super::*;

    fn at(secs: u64) -> std::time::SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn transfer(mbps: f64) -> TransferStats {
        TransferStats {
            bandwidth_mbps: mbps,
            bytes_transferred: 653_721_600,
            elapsed_ms: 11_809,
            latency: LoadedLatency {
                iqm_ms: 25.4,
                low_ms: Some(12.1),
                high_ms: Some(210.7),
                jitter_ms: Some(3.9),
            },
        }
    }

    fn measurement() -> Measurement {
        Measurement {
            server: ServerInfo {
                id: "1234".to_string(),
                host: "speedtest.denver.example.net".to_string(),
                name: "Example Networks".to_string(),
                location: "Denver, CO".to_string(),
                country: "United States".to_string(),
                isp: "Comcast".to_string(),
            },
            external_ip: Some("203.0.113.7".to_string()),
            ping: Some(PingStats {
                latency_ms: 12.3,
                jitter_ms: 0.412,
                low_ms: Some(11.87),
                high_ms: Some(13.05),
            }),
            download: Some(transfer(452.34)),
            upload: Some(transfer(23.11)),
            packet_loss_percent: None,
        }
    }

    const LABELS: &str =
        r#"{server_name="Example Networks",server_location="Denver, CO",isp="Comcast"}"#;

    #[test]
    fn render_without_result() {
        let output = render_prometheus(None);
        assert_eq!(
            output,
            "# HELP speedtest_scrape_success 1 if the last speedtest run succeeded, 0 if it failed.\n\
             # TYPE speedtest_scrape_success gauge\n\
             speedtest_scrape_success 0\n"
        );
    }

    #[test]
    fn render_successful_result() {
        let result = SpeedtestResult::success_at(at(1_760_778_764), measurement());
        let output = render_prometheus(Some(&result));

        assert!(output.contains("speedtest_scrape_success 1\n"));
        assert!(output.contains("speedtest_last_run_timestamp 1760778764\n"));
        assert!(output.contains(&format!("speedtest_download_bandwidth_mbps{LABELS} 452.34\n")));
        assert!(output.contains(&format!("speedtest_upload_bandwidth_mbps{LABELS} 23.11\n")));
        assert!(output.contains(&format!("speedtest_ping_latency_ms{LABELS} 12.3\n")));
        assert!(output.contains(&format!("speedtest_download_bytes{LABELS} 653721600\n")));
        assert!(output.contains(&format!("speedtest_upload_latency_iqm_ms{LABELS} 25.4\n")));
        assert!(output.contains(
            "speedtest_info{server_id=\"1234\",server_host=\"speedtest.denver.example.net\",\
             server_country=\"United States\",external_ip=\"203.0.113.7\"} 1\n"
        ));
    }

    #[test]
    fn render_failed_result_has_no_measurements() {
        let result = SpeedtestResult::failure_at(at(1_760_778_764), "Error: Unable to connect");
        let output = render_prometheus(Some(&result));

        let samples: Vec<&str> = output.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(
            samples,
            vec!["speedtest_scrape_success 0", "speedtest_last_run_timestamp 1760778764"]
        );
    }

    #[test]
    fn absent_packet_loss_is_not_rendered() {
        let result = SpeedtestResult::success_at(at(1), measurement());
        let output = render_prometheus(Some(&result));
        assert!(!output.contains("speedtest_packet_loss"));
    }

    #[test]
    fn zero_packet_loss_is_rendered() {
        let mut m = measurement();
        m.packet_loss_percent = Some(0.0);
        let result = SpeedtestResult::success_at(at(1), m);
        let output = render_prometheus(Some(&result));
        assert!(output.contains(&format!("speedtest_packet_loss{LABELS} 0\n")));
    }

    #[test]
    fn absent_optional_latencies_are_not_rendered() {
        let mut m = measurement();
        m.ping.as_mut().unwrap().low_ms = None;
        m.ping.as_mut().unwrap().high_ms = None;
        m.upload.as_mut().unwrap().latency.jitter_ms = None;
        m.download = None;
        let result = SpeedtestResult::success_at(at(1), m);
        let output = render_prometheus(Some(&result));

        assert!(output.contains("speedtest_ping_latency_ms{"));
        assert!(!output.contains("speedtest_ping_low_ms"));
        assert!(!output.contains("speedtest_ping_high_ms"));
        assert!(!output.contains("speedtest_upload_latency_jitter_ms"));
        assert!(output.contains("speedtest_upload_latency_high_ms{"));
        assert!(!output.contains("speedtest_download_"));
    }

    #[test]
    fn missing_external_ip_renders_unknown() {
        let mut m = measurement();
        m.external_ip = None;
        let result = SpeedtestResult::success_at(at(1), m);
        assert!(render_prometheus(Some(&result)).contains("external_ip=\"unknown\""));
    }

    #[test]
    fn label_values_are_escaped() {
        let mut m = measurement();
        m.server.name = "The \"Best\" \\ ISP\nEver".to_string();
        let result = SpeedtestResult::success_at(at(1), m);
        let output = render_prometheus(Some(&result));
        assert!(output.contains(r#"server_name="The \"Best\" \\ ISP\nEver""#));
    }

    #[test]
    fn render_is_deterministic() {
        let result = SpeedtestResult::success_at(at(1_760_778_764), measurement());
        assert_eq!(render_prometheus(Some(&result)), render_prometheus(Some(&result)));
    }

    #[test]
    fn each_family_has_help_and_type_once() {
        let result = SpeedtestResult::success_at(at(1), measurement());
        let output = render_prometheus(Some(&result));

        for line in output.lines().filter(|l| !l.starts_with('#')) {
            let name = line.split(['{', ' ']).next().unwrap();
            assert_eq!(output.matches(&format!("# HELP {name} ")).count(), 1, "{name}");
            assert_eq!(output.matches(&format!("# TYPE {name} gauge\n")).count(), 1, "{name}");
        }
    }

    #[test]
    fn special_floats_use_prometheus_spelling() {
        assert_eq!(fmt_float(f64::NAN), "NaN");
        assert_eq!(fmt_float(f64::INFINITY), "+Inf");
        assert_eq!(fmt_float(f64::NEG_INFINITY), "-Inf");
        assert_eq!(fmt_float(0.5), "0.5");
    }
}
