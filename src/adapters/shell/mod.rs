//! SSH shell access for diagnostic streams
//!
//! Uses `tokio::process::Command` with `sshpass` for password-based SSH. The
//! spectral scan runs on a pseudo-terminal (`ssh -tt`) and is stopped by
//! typing `q`, the same way an operator would. The child process is never
//! signalled.

use std::process::{ExitStatus, Stdio};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use crate::config::AdapterConfig;
use crate::error::DeviceError;
use crate::models::{Credentials, SpectralSample, Vendor};

/// How long to wait for the remote side to exit after `q`
const EXIT_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Shell Adapter
// ============================================================================

pub struct ShellAdapter {
    host: String,
    credentials: Credentials,
    ssh_port: u16,
    connect_timeout: Duration,
}

impl ShellAdapter {
    pub fn new(host: &str, credentials: Credentials, config: &AdapterConfig) -> Self {
        Self {
            host: host.to_string(),
            credentials,
            ssh_port: config.ssh_port,
            connect_timeout: config.connect_timeout(),
        }
    }

    /// `ssh -tt` so interactive commands get a pseudo-terminal
    fn ssh_command(&self) -> Command {
        let mut cmd = Command::new("sshpass");
        // -e reads SSHPASS so the password stays out of the process list
        cmd.arg("-e")
            .env("SSHPASS", &self.credentials.password)
            .arg("ssh")
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.connect_timeout.as_secs().max(1)
            ))
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("LogLevel=ERROR")
            .arg("-tt")
            .arg("-p")
            .arg(self.ssh_port.to_string())
            .arg(format!("{}@{}", self.credentials.username, self.host));
        cmd
    }

    fn spectral_command(&self, interface: &str) -> Result<String, DeviceError> {
        match self.credentials.vendor {
            Vendor::Mikrotik => Ok(format!("/interface wireless spectral-scan {}", interface)),
            Vendor::Ubiquiti => Err(DeviceError::Unsupported(
                "spectral scan over ssh on airOS".into(),
            )),
        }
    }

    /// Start a spectral scan on `interface`. Samples arrive until `stop`.
    pub async fn spectral_scan(&self, interface: &str) -> Result<SpectralScan, DeviceError> {
        let command = self.spectral_command(interface)?;
        let mut cmd = self.ssh_command();
        cmd.arg(command);
        tracing::info!("[Shell] Starting spectral scan on {} {}", self.host, interface);
        SpectralScan::spawn(&self.host, cmd)
    }
}

// ============================================================================
// Spectral scan session
// ============================================================================

/// Running interactive scan. Dropping it without `stop` leaves the remote
/// side to notice the closed pty on its own.
pub struct SpectralScan {
    host: String,
    child: Child,
    stdin: Option<ChildStdin>,
    samples: mpsc::Receiver<SpectralSample>,
}

impl SpectralScan {
    /// Spawn `cmd` with piped stdio and start parsing its output
    pub fn spawn(host: &str, mut cmd: Command) -> Result<Self, DeviceError> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd.spawn().map_err(|e| {
            DeviceError::Transport(format!("SSH spawn failed: {} (is sshpass installed?)", e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DeviceError::Transport("child has no stdout".into()))?;
        let stdin = child.stdin.take();

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(read_samples(host.to_string(), stdout, tx));

        Ok(Self {
            host: host.to_string(),
            child,
            stdin,
            samples: rx,
        })
    }

    /// Next parsed row; `None` once the remote command has ended
    pub async fn next_sample(&mut self) -> Option<SpectralSample> {
        self.samples.recv().await
    }

    /// Forward samples to `out` until `duration` elapses, the receiver goes
    /// away, or the remote command ends; then stop politely.
    pub async fn stream_for(mut self, duration: Duration, out: mpsc::Sender<SpectralSample>) {
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::debug!("[Shell] Spectral scan on {} reached its duration", self.host);
                    break;
                }
                _ = out.closed() => {
                    tracing::debug!("[Shell] Spectral scan viewer for {} went away", self.host);
                    break;
                }
                sample = self.samples.recv() => match sample {
                    Some(sample) => {
                        if out.send(sample).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.stop().await;
    }

    /// Type `q` and wait for the process to exit. Returns the exit status if
    /// it exited within the grace period.
    pub async fn stop(mut self) -> Option<ExitStatus> {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                tracing::debug!("[Shell] Writing quit key to {} failed: {}", self.host, e);
            }
            let _ = stdin.flush().await;

            if let Ok(Ok(status)) = tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
                tracing::info!("[Shell] Spectral scan on {} stopped ({})", self.host, status);
                return Some(status);
            }
            // Closing the pty input is the remaining polite signal
            drop(stdin);
        }

        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!("[Shell] Waiting for scan on {} failed: {}", self.host, e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "[Shell] Spectral scan on {} did not exit; leaving it to ssh timeouts",
                    self.host
                );
                None
            }
        }
    }
}

async fn read_samples(host: String, mut stdout: ChildStdout, tx: mpsc::Sender<SpectralSample>) {
    let mut parser = ScanParser::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("[Shell] Reading scan output from {} failed: {}", host, e);
                break;
            }
        };
        for sample in parser.feed(&String::from_utf8_lossy(&buf[..n])) {
            if tx.send(sample).await.is_err() {
                return;
            }
        }
    }
    for sample in parser.finish() {
        let _ = tx.send(sample).await;
    }
}

// ============================================================================
// Output parsing
// ============================================================================

fn ansi_pattern() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b[()][A-Za-z0-9]|\x1b[=>78]")
            .expect("valid ANSI pattern")
    })
}

fn prompt_pattern() -> &'static Regex {
    static PROMPT: OnceLock<Regex> = OnceLock::new();
    PROMPT.get_or_init(|| {
        Regex::new(r"^\s*\[[^\]]+\]\s*[>/]|[#$>]\s*$").expect("valid prompt pattern")
    })
}

fn row_pattern() -> &'static Regex {
    static ROW: OnceLock<Regex> = OnceLock::new();
    ROW.get_or_init(|| {
        // FREQ DBM [PEAK] [GRAPH]
        Regex::new(r"^\s*(\d{4}(?:\.\d+)?)\s+(-\d+(?:\.\d+)?)(?:\s+(-\d+(?:\.\d+)?))?(?:\s|$)")
            .expect("valid row pattern")
    })
}

pub fn strip_ansi(line: &str) -> String {
    ansi_pattern().replace_all(line, "").into_owned()
}

/// Incremental line parser for the scan's terminal output
#[derive(Default)]
pub struct ScanParser {
    pending: String,
}

impl ScanParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of raw output; returns the rows completed by it
    pub fn feed(&mut self, chunk: &str) -> Vec<SpectralSample> {
        self.pending.push_str(chunk);
        let mut samples = Vec::new();

        // Terminal redraws use bare \r as often as \n
        while let Some(pos) = self.pending.find(['\n', '\r']) {
            let line: String = self.pending.drain(..=pos).collect();
            if let Some(sample) = parse_scan_line(&line) {
                samples.push(sample);
            }
        }
        samples
    }

    /// Parse whatever is left without a line terminator
    pub fn finish(&mut self) -> Vec<SpectralSample> {
        let rest = std::mem::take(&mut self.pending);
        parse_scan_line(&rest).into_iter().collect()
    }
}

fn parse_scan_line(raw: &str) -> Option<SpectralSample> {
    let line = strip_ansi(raw);
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || prompt_pattern().is_match(line) {
        return None;
    }

    let caps = row_pattern().captures(line)?;
    Some(SpectralSample {
        frequency_mhz: caps.get(1)?.as_str().parse().ok()?,
        signal_dbm: caps.get(2)?.as_str().parse().ok()?,
        peak_dbm: caps.get(3).and_then(|m| m.as_str().parse().ok()),
    })
}
