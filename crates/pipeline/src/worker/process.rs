//! Child-process worker backend
//!
//! Each conversion runs in a fresh child process, by default the current
//! executable re-invoked with `--worker`. The request is written to the
//! child's stdin and the response read back from its stdout.

use super::protocol::{ConvertRequest, ConvertResponse};
use super::{Worker, WorkerError};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Flag that switches the CLI binary into single-request worker mode
pub const WORKER_FLAG: &str = "--worker";

/// Worker that isolates every conversion in its own child process
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessWorker {
    /// Create a worker that runs `program` once per conversion
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Worker that re-invokes the running executable in worker mode
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg(WORKER_FLAG))
    }

    /// Append a single argument
    pub fn arg(mut self, s: impl Into<String>) -> Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments
    pub fn args(mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Build the child command with all three standard streams piped
    ///
    /// The child is killed when the returned handle is dropped, which is what
    /// happens to an abandoned conversion once its deadline expires.
    pub fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    async fn convert(&self, request: ConvertRequest) -> Result<Vec<u8>, WorkerError> {
        let payload = request.encode()?;
        let mut child = self.build_command().spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that dies early closes the pipe; its exit status tells why.
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(error = %e, "failed to write worker request");
            }
        }

        let output = child.wait_with_output().await?;

        match ConvertResponse::decode(&output.stdout) {
            Ok(response) => response.into_result(),
            Err(_) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(WorkerError::Crashed(format!(
                    "exited with status {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
            Err(_) if output.stdout.is_empty() => Err(WorkerError::Crashed(
                "exited without sending a response".to_string(),
            )),
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &'static str {
        "process"
    }
}
