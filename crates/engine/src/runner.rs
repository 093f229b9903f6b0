// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External backup-tool invocation
//!
//! The tool runs as an opaque subprocess; stdout and stderr are line-scanned
//! and forwarded to the per-operation log blob through a bounded sink. The
//! sink forwards at most its cap and counts everything beyond it; the drop
//! count is reported once when the sink is finished, never silently.

use crate::task::TaskError;
use std::io::Write;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::warn;

/// Default cap on forwarded tool output per operation
pub const DEFAULT_LOG_CAP: usize = 1024 * 1024;

/// Line writer that forwards at most `cap` bytes and counts the rest
pub struct BoundedLineSink<W: Write> {
    inner: W,
    remaining: usize,
    dropped: u64,
}

impl<W: Write> BoundedLineSink<W> {
    pub fn new(inner: W, cap: usize) -> Self {
        Self {
            inner,
            remaining: cap,
            dropped: 0,
        }
    }

    /// Forward one line, truncating once the cap is reached
    pub fn push_line(&mut self, line: &str) -> std::io::Result<()> {
        let len = line.len() + 1;
        if self.remaining >= len {
            self.inner.write_all(line.as_bytes())?;
            self.inner.write_all(b"\n")?;
            self.remaining -= len;
        } else if self.remaining > 0 {
            self.inner.write_all(&line.as_bytes()[..self.remaining])?;
            self.dropped += (len - self.remaining) as u64;
            self.remaining = 0;
        } else {
            self.dropped += len as u64;
        }
        Ok(())
    }

    /// Bytes dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Flush the sink, reporting the drop count in the output itself when
    /// anything was truncated. Returns the number of bytes dropped.
    pub fn finish(mut self) -> std::io::Result<u64> {
        if self.dropped > 0 {
            writeln!(self.inner, "... output truncated, {} bytes dropped", self.dropped)?;
        }
        self.inner.flush()?;
        Ok(self.dropped)
    }
}

/// Runs the external backup tool
#[derive(Debug, Clone)]
pub struct ToolRunner {
    command: String,
    env: Vec<(String, String)>,
}

impl ToolRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: Vec::new(),
        }
    }

    /// Extra environment for every invocation (credentials etc.)
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Run the tool to completion, forwarding its output line by line.
    ///
    /// A tool that cannot be started is a permanent failure; a tool that
    /// starts and exits non-zero is transient (it may hold a repository lock
    /// that clears on retry). Cancellation kills the child and surfaces as a
    /// transient error for the scheduler to classify.
    pub async fn run<W: Write + Send>(
        &self,
        args: &[String],
        sink: &mut BoundedLineSink<W>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), TaskError> {
        let mut child = Command::new(&self.command)
            .args(args)
            .envs(self.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                TaskError::Permanent(format!("failed to start {}: {}", self.command, e))
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut out_lines = stdout.map(|s| BufReader::new(s).lines());
        let mut err_lines = stderr.map(|s| BufReader::new(s).lines());

        loop {
            tokio::select! {
                line = next_line(&mut out_lines), if out_lines.is_some() => {
                    match line {
                        Some(line) => forward(sink, &line),
                        None => out_lines = None,
                    }
                }
                line = next_line(&mut err_lines), if err_lines.is_some() => {
                    match line {
                        Some(line) => forward(sink, &line),
                        None => err_lines = None,
                    }
                }
                _ = cancelled(cancel) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(TaskError::Transient("interrupted by shutdown".to_string()));
                }
            }
            if out_lines.is_none() && err_lines.is_none() {
                break;
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| TaskError::Permanent(format!("failed to await {}: {}", self.command, e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(TaskError::Transient(format!(
                "{} exited with {}",
                self.command, status
            )))
        }
    }
}

fn forward<W: Write>(sink: &mut BoundedLineSink<W>, line: &str) {
    // Forwarding is best-effort; a bad log disk must not fail the backup
    if let Err(e) = sink.push_line(line) {
        warn!(error = %e, "failed to forward tool output");
    }
}

async fn next_line<R: tokio::io::AsyncBufRead + Unpin>(
    lines: &mut Option<tokio::io::Lines<R>>,
) -> Option<String> {
    match lines {
        Some(lines) => match lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "error reading tool output");
                None
            }
        },
        None => None,
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without cancelling; never resolve
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
