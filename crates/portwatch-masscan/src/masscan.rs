//! Masscan process wrapper.
//!
//! Executes masscan as a child process via `tokio::process::Command`,
//! writing its JSON report to a temp file that is removed when the run
//! ends, however it ends.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use portwatch_core::ScanReport;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::config::{ScanConfig, DEFAULT_BIN_PATH, DEFAULT_TEMP_DIR, DEFAULT_WAIT_DELAY};
use crate::error::{ScanError, ScanFailure};
use crate::output;
use crate::runner::{ScanRequest, ScanRunner, ToolConfig};

/// Wrapper around the masscan binary.
#[derive(Debug, Clone)]
pub struct MasscanRunner {
    bin_path: PathBuf,
    temp_dir: PathBuf,
    wait_delay: Duration,
}

impl MasscanRunner {
    /// Build a runner from the process settings of `config`. Empty or
    /// zero settings fall back to the defaults.
    pub fn new(config: &ScanConfig) -> Self {
        let or_default = |path: &Path, default: &str| {
            if path.as_os_str().is_empty() {
                PathBuf::from(default)
            } else {
                path.to_path_buf()
            }
        };

        Self {
            bin_path: or_default(&config.bin_path, DEFAULT_BIN_PATH),
            temp_dir: or_default(&config.temp_dir, DEFAULT_TEMP_DIR),
            wait_delay: if config.wait_delay.is_zero() {
                DEFAULT_WAIT_DELAY
            } else {
                config.wait_delay
            },
        }
    }

    /// Verify masscan is installed and return its version banner.
    pub async fn verify_installation(&self) -> Result<String, ScanError> {
        let output = Command::new(&self.bin_path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ScanError::Spawn {
                path: self.bin_path.clone(),
                source,
            })?;

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn execute(
        &self,
        request: &ScanRequest,
        report: &mut ScanReport,
        cancel: CancellationToken,
    ) -> Result<(), ScanError> {
        let output_file = temp_file(&self.temp_dir, ".json")?;

        let inline_config = match &request.tool_config {
            ToolConfig::Inline(text) => {
                let mut file = temp_file(&self.temp_dir, ".conf")?;
                file.write_all(text.as_bytes())?;
                file.flush()?;
                Some(file)
            }
            _ => None,
        };
        let config_path = match (&request.tool_config, &inline_config) {
            (ToolConfig::Path(path), _) => Some(path.as_path()),
            (_, Some(file)) => Some(file.path()),
            _ => None,
        };

        let args = build_args(request, output_file.path(), config_path);

        tracing::debug!(
            scan_id = %report.scan_id,
            bin = %self.bin_path.display(),
            args = ?args,
            "Prepared masscan command"
        );

        let mut child = Command::new(&self.bin_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ScanError::Spawn {
                path: self.bin_path.clone(),
                source,
            })?;

        let (status, console) = self.wait(&mut child, &cancel).await?;

        if !status.success() {
            return Err(ScanError::Failed {
                code: status.code().unwrap_or(-1),
                output: console,
            });
        }

        tracing::trace!(scan_id = %report.scan_id, output = %console, "Masscan output");

        match output::found_count(&console) {
            Some(0) => {
                tracing::debug!(scan_id = %report.scan_id, "No results found");
                report.complete(Vec::new());
                return Ok(());
            }
            Some(found) => {
                tracing::debug!(scan_id = %report.scan_id, found, "Masscan reports ports found");
            }
            None => {
                tracing::debug!(
                    scan_id = %report.scan_id,
                    "Unable to parse found count from output, reading report anyway"
                );
            }
        }

        let contents = tokio::fs::read(output_file.path()).await?;
        let raw = output::parse_report(&contents).map_err(|e| {
            tracing::debug!(
                scan_id = %report.scan_id,
                error = %e,
                contents = %String::from_utf8_lossy(&contents),
                "Failed to decode raw report results"
            );
            ScanError::ReportDecode(e)
        })?;

        report.complete(raw);
        Ok(())
    }

    /// Collect combined stdout and stderr and wait for exit, giving up
    /// when `cancel` fires.
    async fn wait(
        &self,
        child: &mut Child,
        cancel: &CancellationToken,
    ) -> Result<(ExitStatus, String), ScanError> {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collect = async move {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (r1, r2) = tokio::join!(read_pipe(stdout, &mut out), read_pipe(stderr, &mut err));
            r1?;
            r2?;
            out.extend_from_slice(&err);
            Ok::<_, std::io::Error>(out)
        };

        let console = tokio::select! {
            console = collect => Some(console?),
            _ = cancel.cancelled() => None,
        };
        let Some(console) = console else {
            return Err(self.terminate(child).await);
        };

        let status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = cancel.cancelled() => None,
        };
        let Some(status) = status else {
            return Err(self.terminate(child).await);
        };

        Ok((status, String::from_utf8_lossy(&console).into_owned()))
    }

    async fn terminate(&self, child: &mut Child) -> ScanError {
        tracing::warn!(
            pid = ?child.id(),
            wait_delay_ms = self.wait_delay.as_millis() as u64,
            "Scan cancelled, killing masscan"
        );

        if let Err(e) = child.start_kill() {
            tracing::debug!(error = %e, "Failed to signal masscan");
        }
        if tokio::time::timeout(self.wait_delay, child.wait()).await.is_err() {
            tracing::warn!(pid = ?child.id(), "Masscan did not exit within the wait delay");
        }

        ScanError::Cancelled
    }
}

#[async_trait]
impl ScanRunner for MasscanRunner {
    async fn run(
        &self,
        request: &ScanRequest,
        cancel: CancellationToken,
    ) -> Result<ScanReport, ScanFailure> {
        let start = Instant::now();
        let mut report = ScanReport::new(request.ranges.clone(), request.ports.clone(), request.max_rate);

        tracing::info!(
            scan_id = %report.scan_id,
            ranges = report.ranges.len(),
            ports = report.ports.len(),
            max_rate = report.max_rate,
            "Starting masscan"
        );

        match self.execute(request, &mut report, cancel).await {
            Ok(()) => {
                tracing::info!(
                    scan_id = %report.scan_id,
                    hosts = report.results.len(),
                    open_ports = report.open_port_count(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Masscan complete"
                );
                Ok(report)
            }
            Err(e) => Err(e.with_report(report)),
        }
    }
}

/// Build the masscan argument list.
fn build_args(request: &ScanRequest, output: &Path, config: Option<&Path>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--output-format".into(),
        "json".into(),
        "--output-filename".into(),
        output.into(),
    ];

    if request.max_rate > 0 {
        args.push("--max-rate".into());
        args.push(request.max_rate.to_string().into());
    }

    if let Some(config) = config {
        args.push("-c".into());
        args.push(config.into());
    }

    args.extend(request.ranges.iter().map(OsString::from));

    if !request.ports.is_empty() {
        args.push(format!("-p{}", request.ports.join(",")).into());
    }

    args
}

/// Create a uniquely named temp file, removed when dropped.
fn temp_file(dir: &Path, suffix: &str) -> Result<NamedTempFile, ScanError> {
    std::fs::create_dir_all(dir)?;

    tempfile::Builder::new()
        .prefix("masscan-")
        .suffix(suffix)
        .rand_bytes(8)
        .tempfile_in(dir)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => ScanError::TempFileExhausted {
                dir: dir.to_path_buf(),
            },
            _ => ScanError::Io(e),
        })
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(buf).await?;
    }
    Ok(())
}
