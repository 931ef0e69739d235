//! Out-of-process tool invocation.
//!
//! Every external tool call is described by an [`Invocation`] and executed
//! by a [`CommandRunner`]. The process runner streams stdout/stderr straight
//! into the invocation's log files and hands back the exit code plus the
//! captured stderr text.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// One external command, run in `cwd` with extra environment bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Added to the child's environment only.
    pub env: BTreeMap<String, String>,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
}

impl Invocation {
    pub fn new(program: &Path, cwd: &Path, log_stem: &str) -> Self {
        Self {
            program: program.to_path_buf(),
            args: Vec::new(),
            cwd: cwd.to_path_buf(),
            env: BTreeMap::new(),
            stdout_log: cwd.join(format!("{log_stem}.stdout")),
            stderr_log: cwd.join(format!("{log_stem}.stderr")),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.insert(key.to_string(), value.into());
        self
    }

    /// First positional argument, e.g. `apply` for a terraform call.
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

/// Result of a finished invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub exit_code: i32,
    pub stderr: String,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            exit_code: 0,
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stderr: stderr.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. Spawn failures are `Err`; non-zero exits are not.
    async fn run(&self, invocation: &Invocation) -> std::io::Result<Outcome>;
}

/// Runs invocations as child processes via `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<Outcome> {
        let stdout = std::fs::File::create(&invocation.stdout_log)?;
        let stderr = std::fs::File::create(&invocation.stderr_log)?;

        debug!(
            program = %invocation.program.display(),
            args = ?invocation.args,
            cwd = %invocation.cwd.display(),
            "running"
        );
        let status = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .await?;

        let stderr = tokio::fs::read_to_string(&invocation.stderr_log)
            .await
            .unwrap_or_default();
        Ok(Outcome {
            exit_code: status.code().unwrap_or(-1),
            stderr,
        })
    }
}
