//! Speedtest CLI invocation.
//!
//! Pipeline:
//! 1. Build `speedtest --format=json [--server-id=ID]`, adding
//!    `--accept-license --accept-gdpr` until the license marker exists
//! 2. Spawn with piped stdout/stderr and collect both under a timeout
//! 3. On timeout, kill and reap the child
//! 4. Exit code 0 → parse the report; nonzero → use the tool's diagnostic
//!
//! Every outcome becomes a [`SpeedtestResult`]. Nothing is retried.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use speedex_core::{Measurement, SpeedtestResult, ToolSettings};

use crate::error::{RunError, RunResult};
use crate::report::{last_log_message, parse_report};

/// Longest stderr excerpt carried into a failure message.
const MAX_DIAGNOSTIC_CHARS: usize = 500;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Anything that can produce one measurement result.
///
/// Implemented by [`SpeedtestRunner`]; tests substitute scripted fakes.
pub trait Measure: Send + Sync {
    fn measure(&self) -> BoxFuture<'_, SpeedtestResult>;
}

/// Runs the Ookla speedtest CLI as a subprocess.
#[derive(Debug, Clone)]
pub struct SpeedtestRunner {
    settings: ToolSettings,
}

impl SpeedtestRunner {
    pub fn new(settings: ToolSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    /// Run one measurement, optionally pinned to `server_id`.
    ///
    /// An id the tool rejects comes back as an ordinary failure result.
    pub async fn run(&self, server_id: Option<&str>) -> SpeedtestResult {
        let started = Instant::now();
        match server_id {
            Some(id) => info!(server_id = %id, "starting speedtest"),
            None => info!("starting speedtest (automatic server selection)"),
        }

        match self.try_run(server_id).await {
            Ok(m) => {
                log_measurement(&m, started);
                SpeedtestResult::success(m)
            }
            Err(e) => {
                error!(
                    error = %e,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "speedtest failed"
                );
                SpeedtestResult::failure(e.to_string())
            }
        }
    }

    async fn try_run(&self, server_id: Option<&str>) -> RunResult<Measurement> {
        let first_run = self.settings.accept_license && !self.settings.license_marker.exists();
        if first_run {
            info!("first run detected, accepting Ookla license and GDPR terms");
        }

        let mut cmd = self.command(server_id, first_run);
        debug!("running: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
            binary: self.settings.binary.display().to_string(),
            source,
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collect = async {
            let (status, out, err) =
                tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
            Ok::<_, std::io::Error>((status?, out?, err?))
        };

        let collected = tokio::time::timeout(self.settings.timeout, collect).await;
        let (status, stdout, stderr) = match collected {
            Ok(output) => output?,
            Err(_) => {
                warn!(
                    pid = ?child.id(),
                    timeout_secs = self.settings.timeout.as_secs_f64(),
                    "speedtest timed out, killing it"
                );
                // kill() also waits, so the child is reaped here.
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed out speedtest");
                }
                return Err(RunError::Timeout(self.settings.timeout));
            }
        };

        if !status.success() {
            return Err(exit_error(status, &stdout, &stderr));
        }

        let measurement = parse_report(&stdout).inspect_err(|e| {
            warn!(error = %e, stdout = %excerpt(&stdout), "unusable speedtest output");
        })?;

        if first_run {
            mark_license_accepted(&self.settings.license_marker);
        }
        Ok(measurement)
    }

    fn command(&self, server_id: Option<&str>, first_run: bool) -> Command {
        let mut cmd = Command::new(&self.settings.binary);
        cmd.arg("--format=json");
        if first_run {
            cmd.arg("--accept-license").arg("--accept-gdpr");
        }
        if let Some(id) = server_id {
            cmd.arg(format!("--server-id={id}"));
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Measure for SpeedtestRunner {
    fn measure(&self) -> BoxFuture<'_, SpeedtestResult> {
        Box::pin(self.run(self.settings.server_id.as_deref()))
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Pick the most useful diagnostic for a nonzero exit.
fn exit_error(status: ExitStatus, stdout: &str, stderr: &str) -> RunError {
    let stderr = stderr.trim();
    let message = if !stderr.is_empty() {
        excerpt(stderr)
    } else if let Some(log) = last_log_message(stdout) {
        log
    } else {
        match status.code() {
            Some(code) => format!("speedtest exited with status {code}"),
            None => "speedtest was terminated by a signal".to_string(),
        }
    };
    RunError::Exit {
        code: status.code(),
        message,
    }
}

fn excerpt(s: &str) -> String {
    s.chars().take(MAX_DIAGNOSTIC_CHARS).collect()
}

fn mark_license_accepted(marker: &Path) {
    if let Some(parent) = marker.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(error = %e, path = %parent.display(), "cannot create license marker directory");
            return;
        }
    }
    match std::fs::write(marker, b"") {
        Ok(()) => info!(path = %marker.display(), "Ookla license and GDPR terms accepted"),
        Err(e) => warn!(error = %e, path = %marker.display(), "cannot write license marker"),
    }
}

fn log_measurement(m: &Measurement, started: Instant) {
    info!(
        elapsed_secs = started.elapsed().as_secs_f64(),
        server = %m.server.name,
        location = %m.server.location,
        isp = %m.server.isp,
        "speedtest complete"
    );
    info!(
        download_mbps = m.download.as_ref().map(|d| d.bandwidth_mbps),
        upload_mbps = m.upload.as_ref().map(|u| u.bandwidth_mbps),
        ping_ms = m.ping.as_ref().map(|p| p.latency_ms),
        jitter_ms = m.ping.as_ref().map(|p| p.jitter_ms),
        packet_loss = m.packet_loss_percent,
        "speedtest results"
    );
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    const FIXTURE: &str = include_str!("../tests/fixtures/result.json");

    /// Write an executable shell script standing in for the speedtest CLI.
    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("speedtest");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn settings(dir: &Path, binary: PathBuf) -> ToolSettings {
        ToolSettings {
            binary,
            server_id: None,
            timeout: Duration::from_secs(10),
            accept_license: false,
            license_marker: dir.join("license-accepted"),
        }
    }

    fn runner_for(dir: &Path, body: &str) -> SpeedtestRunner {
        let binary = fake_tool(dir, body);
        SpeedtestRunner::new(settings(dir, binary))
    }

    #[tokio::test]
    async fn successful_run_parses_report() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = dir.path().join("result.json");
        std::fs::write(&fixture, FIXTURE).unwrap();
        let runner = runner_for(dir.path(), &format!("cat '{}'", fixture.display()));

        let result = runner.run(None).await;
        assert!(result.succeeded(), "{:?}", result.error_message());
        let m = result.measurement().unwrap();
        assert_eq!(m.download.as_ref().unwrap().bandwidth_mbps, 452.34);
        assert_eq!(m.upload.as_ref().unwrap().bandwidth_mbps, 23.11);
        assert_eq!(m.server.isp, "Comcast");
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_for(dir.path(), "echo 'Error: Unable to connect' >&2\nexit 2");

        let result = runner.run(None).await;
        assert!(!result.succeeded());
        assert_eq!(result.error_message(), Some("Error: Unable to connect"));
    }

    #[tokio::test]
    async fn nonzero_exit_falls_back_to_log_record() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_for(
            dir.path(),
            r#"echo '{"type":"log","message":"Invalid server id","level":"error"}'
exit 1"#,
        );

        let result = runner.run(Some("999999")).await;
        assert_eq!(result.error_message(), Some("Invalid server id"));
    }

    #[tokio::test]
    async fn silent_nonzero_exit_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_for(dir.path(), "exit 3");

        let result = runner.run(None).await;
        assert_eq!(result.error_message(), Some("speedtest exited with status 3"));
    }

    #[tokio::test]
    async fn unparseable_success_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_for(dir.path(), "echo '{\"type\":\"result\",\"isp\":'");

        let result = runner.run(None).await;
        assert!(!result.succeeded());
        assert!(
            result
                .error_message()
                .unwrap()
                .starts_with("failed to parse speedtest output")
        );
    }

    #[tokio::test]
    async fn hung_tool_is_killed_at_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("tool.pid");
        let binary = fake_tool(
            dir.path(),
            &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
        );
        let mut s = settings(dir.path(), binary);
        s.timeout = Duration::from_millis(300);
        let runner = SpeedtestRunner::new(s);

        let started = Instant::now();
        let result = runner.run(None).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.error_message(), Some("timeout after 300ms"));

        // Killed and reaped: the pid no longer names a process.
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let alive = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("kill -0 {} 2>/dev/null", pid.trim()))
            .status()
            .unwrap();
        assert!(!alive.success(), "speedtest process {} survived the timeout", pid.trim());
    }

    #[tokio::test]
    async fn missing_binary_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-speedtest");
        let runner = SpeedtestRunner::new(settings(dir.path(), missing.clone()));

        let result = runner.run(None).await;
        let message = result.error_message().unwrap();
        assert!(message.starts_with("failed to start"), "{message}");
        assert!(message.contains(&missing.display().to_string()));
    }

    #[tokio::test]
    async fn passes_server_id_and_accepts_license_once() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = dir.path().join("result.json");
        let args_log = dir.path().join("args.log");
        std::fs::write(&fixture, FIXTURE).unwrap();
        let binary = fake_tool(
            dir.path(),
            &format!(
                "echo \"$@\" >> '{}'\necho 'License preamble'\ncat '{}'",
                args_log.display(),
                fixture.display()
            ),
        );
        let mut s = settings(dir.path(), binary);
        s.accept_license = true;
        s.server_id = Some("1234".to_string());
        let marker = s.license_marker.clone();
        let runner = SpeedtestRunner::new(s);

        assert!(runner.measure().await.succeeded());
        assert!(marker.exists());
        assert!(runner.measure().await.succeeded());

        let log = std::fs::read_to_string(&args_log).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(
            lines,
            vec![
                "--format=json --accept-license --accept-gdpr --server-id=1234",
                "--format=json --server-id=1234",
            ]
        );
    }

    #[tokio::test]
    async fn failed_first_run_keeps_accepting_license() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_tool(dir.path(), "exit 1");
        let mut s = settings(dir.path(), binary);
        s.accept_license = true;
        let marker = s.license_marker.clone();

        let result = SpeedtestRunner::new(s).run(None).await;
        assert!(!result.succeeded());
        assert!(!marker.exists());
    }
}
