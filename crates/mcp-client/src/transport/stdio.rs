//! Subprocess transport: newline-delimited JSON over a child's stdin/stdout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use super::{McpTransport, TransportError};

/// Maximum number of consecutive non-JSON lines to skip before declaring
/// the server broken.
const MAX_SKIP_LINES: usize = 1000;

/// How long `shutdown` waits for the child to exit after closing its stdin.
const EXIT_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Stdio transport: communicates with a child process over stdin/stdout.
///
/// Each frame is a single newline-delimited line. Stderr is forwarded to
/// the log at debug level.
pub struct StdioTransport {
    /// `None` once shutdown has closed the pipe.
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    alive: AtomicBool,
}

impl StdioTransport {
    /// Spawn `command[0]` with the remaining elements as arguments.
    pub fn spawn(command: &[String], env: &HashMap<String, String>) -> Result<Self, TransportError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| TransportError::Config("empty command".into()))?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(program.clone(), stderr));
        }

        tracing::debug!(program = %program, pid = ?child.id(), "spawned MCP server process");

        Ok(Self {
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            alive: AtomicBool::new(true),
        })
    }
}

async fn forward_stderr(program: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(program = %program, line = %line, "MCP server stderr");
    }
}

enum Line<'a> {
    Blank,
    Frame(&'a str),
    Skipped(&'static str),
}

fn classify_line(raw: &[u8]) -> Line<'_> {
    let Ok(text) = std::str::from_utf8(raw) else {
        return Line::Skipped("not valid UTF-8");
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Line::Blank
    } else if trimmed.starts_with('{') {
        Line::Frame(trimmed)
    } else {
        Line::Skipped("not JSON")
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }

        let mut stdin = self.stdin.lock().await;
        let pipe = stdin.as_mut().ok_or(TransportError::Closed)?;
        let written = async {
            pipe.write_all(frame).await?;
            pipe.write_all(b"\n").await?;
            pipe.flush().await
        }
        .await;

        if let Err(e) = written {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::ProcessExited);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Read the next line that looks like JSON, skipping empty lines and
    /// lines that are not JSON or not UTF-8.
    ///
    /// Gives up after [`MAX_SKIP_LINES`] consecutive skipped lines so a
    /// server that logs to stdout cannot spin the dispatch task forever.
    async fn recv(&self) -> Option<Result<Vec<u8>, TransportError>> {
        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0usize;
        loop {
            let mut line = Vec::new();
            match stdout.read_until(b'\n', &mut line).await {
                Ok(0) => {
                    self.alive.store(false, Ordering::SeqCst);
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.alive.store(false, Ordering::SeqCst);
                    return Some(Err(e.into()));
                }
            }

            match classify_line(&line) {
                Line::Blank => continue,
                Line::Frame(frame) => return Some(Ok(frame.as_bytes().to_vec())),
                Line::Skipped(reason) => {
                    skipped += 1;
                    if skipped >= MAX_SKIP_LINES {
                        self.alive.store(false, Ordering::SeqCst);
                        return Some(Err(TransportError::Protocol(
                            "MCP server produced too many non-JSON lines on stdout".into(),
                        )));
                    }
                    tracing::warn!(
                        line = %String::from_utf8_lossy(&line).trim(),
                        reason,
                        "skipping line from MCP server stdout"
                    );
                }
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);

        // Dropping stdin closes the pipe, which is the exit signal for
        // well-behaved stdio servers.
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "error closing MCP server stdin");
            }
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "MCP server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for MCP server process");
            }
            Err(_) => {
                tracing::warn!("MCP server process did not exit within timeout, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill MCP server process");
                }
            }
        }
    }
}
