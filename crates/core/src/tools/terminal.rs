//! # Process Runner
//!
//! Every external program the engine starts goes through a [`ProcessRunner`],
//! so handlers can be exercised in tests without spawning anything.
//!
//! Commands are screened against `BLOCKED_PATTERNS` before they run. Only the
//! program and its arguments are screened; payload sent on stdin is not.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Blocked command patterns (security)
const BLOCKED_PATTERNS: &[&str] = &[
    // Destructive file operations
    "rm -rf", "rmdir", "del /", "erase", "mkfs", // Privilege escalation
    "sudo", "su ", "doas", "runas", // Arbitrary execution
    "eval ", "bash -c", "sh -c", "cmd /c", // Dangerous redirects and pipes
    "> /", ">> /", "| rm", "| sh", "| bash", // Process control
    "kill ", "pkill", "killall",
];

/// A program invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Written to the child's stdin, which is then closed
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ProcessRequest {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn with_env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    pub fn command_line(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput>;
}

/// Runs processes with `tokio::process`
///
/// Children are killed if the returned future is dropped, so racing `run`
/// against a cancellation token stops the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput> {
        validate_command(request)?;

        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &request.env {
            command.env(key, value);
        }

        let started = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", request.program))?;

        if let (Some(input), Some(mut stdin)) = (&request.stdin, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .context("Failed to write to child stdin")?;
        }

        let wait = child.wait_with_output();
        let output = match request.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), wait)
                .await
                .map_err(|_| anyhow::anyhow!("{} timed out after {}s", request.program, secs))?,
            None => wait.await,
        }
        .with_context(|| format!("Failed to wait for {}", request.program))?;

        let result = ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::debug!(
            program = %request.program,
            exit_code = ?result.exit_code,
            duration_ms = result.duration_ms,
            "Process finished"
        );
        Ok(result)
    }
}

/// Reject commands containing a blocked pattern
pub fn validate_command(request: &ProcessRequest) -> Result<()> {
    let full_command = request.command_line();
    for blocked in BLOCKED_PATTERNS {
        if full_command.contains(blocked) {
            return Err(anyhow::anyhow!(
                "Command contains blocked pattern: '{}'. This operation is not permitted.",
                blocked.trim()
            ));
        }
    }
    if request.program.trim().is_empty() {
        return Err(anyhow::anyhow!("Command is empty"));
    }
    Ok(())
}
