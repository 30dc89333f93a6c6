//! Capture source: runs tcpdump on the link and turns its text output into capture records.

use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use airchat_core::CaptureRecord;
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bIP6? ([0-9a-f:.]+)\.(\d+) > .*length (\d+)").expect("static regex")
    })
}

fn hex_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*0x([0-9a-f]{4}):\s+([0-9a-f ]+)").expect("static regex"))
}

/// Parse one line of `tcpdump -n -x` output. Lines that are neither a packet header nor a hex
/// dump line (tcpdump banners, truncated output) give `None`.
pub fn parse_line(line: &str) -> Option<CaptureRecord> {
    if let Some(caps) = header_re().captures(line) {
        let ip: IpAddr = caps[1].parse().ok()?;
        let port: u16 = caps[2].parse().ok()?;
        let length: usize = caps[3].parse().ok()?;
        return Some(CaptureRecord::Header {
            source: SocketAddr::new(ip, port),
            length,
        });
    }
    let caps = hex_re().captures(line)?;
    let offset = usize::from_str_radix(&caps[1], 16).ok()?;
    let digits: String = caps[2].chars().filter(|c| !c.is_whitespace()).collect();
    match hex::decode(&digits) {
        Ok(bytes) => Some(CaptureRecord::Chunk { offset, bytes }),
        Err(e) => {
            log::debug!("skipping hex line at 0x{offset:04x}: {e}");
            None
        }
    }
}

/// Whether this tcpdump understands `--immediate-mode` (without it, output is buffered).
pub async fn supports_immediate_mode(tcpdump: &str) -> bool {
    match Command::new(tcpdump).arg("--help").output().await {
        Ok(out) => {
            let text = [out.stdout, out.stderr].concat();
            String::from_utf8_lossy(&text).contains("--immediate-mode")
        }
        Err(_) => false,
    }
}

/// Line stream from a capture process (or any reader, for tests).
pub struct CaptureStream<R> {
    lines: Lines<R>,
    stall: Option<Duration>,
    _child: Option<Child>,
}

impl CaptureStream<BufReader<ChildStdout>> {
    /// Start `tcpdump -n [--immediate-mode] -l -x -i <interface> <filter>`.
    pub fn spawn(
        tcpdump: &str,
        immediate: bool,
        interface: &str,
        filter: &str,
        stall: Option<Duration>,
    ) -> Result<Self, CaptureError> {
        let mut cmd = Command::new(tcpdump);
        cmd.arg("-n");
        if immediate {
            cmd.arg("--immediate-mode");
        }
        cmd.args(["-l", "-x", "-i", interface])
            .args(filter.split_whitespace())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(CaptureError::Spawn)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Spawn(std::io::Error::other("no stdout pipe")))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("tcpdump: {line}");
                }
            });
        }
        log::debug!("capturing on {interface}: {filter}");
        Ok(Self {
            lines: BufReader::new(stdout).lines(),
            stall,
            _child: Some(child),
        })
    }
}

impl<R: AsyncBufRead + Unpin> CaptureStream<R> {
    pub fn from_reader(reader: R, stall: Option<Duration>) -> Self {
        Self {
            lines: reader.lines(),
            stall,
            _child: None,
        }
    }

    /// Next raw output line. End of stream or prolonged silence is a capture failure.
    pub async fn next_line(&mut self) -> Result<String, CaptureError> {
        let next = match self.stall {
            Some(limit) => tokio::time::timeout(limit, self.lines.next_line())
                .await
                .map_err(|_| CaptureError::Stalled(limit))?,
            None => self.lines.next_line().await,
        };
        match next {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(CaptureError::Exited),
            Err(e) => Err(CaptureError::Io(e)),
        }
    }

    /// Next line that parses as a capture record.
    pub async fn next_record(&mut self) -> Result<CaptureRecord, CaptureError> {
        loop {
            let line = self.next_line().await?;
            if let Some(record) = parse_line(&line) {
                return Ok(record);
            }
        }
    }
}

/// The capture source is gone; there is no other way to hear peers.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot start capture: {0}")]
    Spawn(std::io::Error),
    #[error("capture exited unexpectedly")]
    Exited,
    #[error("no capture output for {0:?}")]
    Stalled(Duration),
    #[error("capture read failed: {0}")]
    Io(std::io::Error),
}
