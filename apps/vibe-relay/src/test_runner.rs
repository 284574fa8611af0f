use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::TestPolicy;
use crate::error::RelayError;

/// How long to keep draining pipes after a timed-out child was killed;
/// grandchildren may still hold them open.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub(crate) struct TestRunResult {
    pub ok: bool,
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub(crate) struct TestRunner {
    workdir: PathBuf,
    policy: TestPolicy,
}

impl TestRunner {
    pub(crate) fn new(workdir: PathBuf, policy: TestPolicy) -> Self {
        Self { workdir, policy }
    }

    pub(crate) fn default_cmd(&self) -> &str {
        &self.policy.default_cmd
    }

    fn select<'a>(&'a self, requested: Option<&'a str>) -> Result<&'a str, RelayError> {
        match requested.map(str::trim).filter(|c| !c.is_empty()) {
            None => Ok(&self.policy.default_cmd),
            Some(cmd) if self.policy.permits(cmd) => Ok(cmd),
            Some(cmd) => {
                warn!(target: "vibe::tests", command = %cmd, "refusing command outside the allow-list");
                Err(RelayError::BadRequest(format!(
                    "command not allowed: {cmd}"
                )))
            }
        }
    }

    /// Runs one command to completion (or to the configured timeout) and
    /// returns its exit code together with everything it printed.
    pub(crate) async fn run(&self, requested: Option<&str>) -> Result<TestRunResult, RelayError> {
        let cmd = self.select(requested)?.to_string();
        let started = Instant::now();

        let mut child = shell(&cmd)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| RelayError::Internal(format!("failed to spawn `{cmd}`: {err}")))?;

        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        let mut timed_out = None;
        let status = match self.policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    timed_out = Some(limit);
                    let _ = child.start_kill();
                    child.wait().await
                }
            },
            None => child.wait().await,
        }
        .map_err(|err| RelayError::Internal(format!("failed to wait for `{cmd}`: {err}")))?;

        let (stdout, mut stderr) = if timed_out.is_some() {
            (
                tokio::time::timeout(DRAIN_GRACE, stdout)
                    .await
                    .ok()
                    .and_then(Result::ok)
                    .unwrap_or_default(),
                tokio::time::timeout(DRAIN_GRACE, stderr)
                    .await
                    .ok()
                    .and_then(Result::ok)
                    .unwrap_or_default(),
            )
        } else {
            (
                stdout.await.unwrap_or_default(),
                stderr.await.unwrap_or_default(),
            )
        };

        let code = match timed_out {
            Some(limit) => {
                stderr.push_str(&format!(
                    "\n[vibe-relay] test command killed after {}s\n",
                    limit.as_secs()
                ));
                -1
            }
            None => status.code().unwrap_or(-1),
        };

        info!(
            target: "vibe::tests",
            command = %cmd,
            code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "test run finished"
        );
        Ok(TestRunResult {
            ok: code == 0,
            code,
            stdout,
            stderr,
        })
    }
}

#[cfg(unix)]
fn shell(cmd: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(cmd);
    command
}

#[cfg(windows)]
fn shell(cmd: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(cmd);
    command
}

async fn drain<R>(reader: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut collected = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => collected.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}
