//! Conversion worker contract
//!
//! A worker turns `(bytes, format, quality)` into output bytes or a textual
//! failure. Each call is one self-contained request/response pair; nothing
//! is shared between calls. Backends are chosen when the pipeline is built.

pub mod blocking;
pub mod codec;
pub mod process;
pub mod protocol;

pub use blocking::BlockingWorker;
pub use codec::{heif_supported, Codec, CodecError, ImageCodec};
pub use process::ProcessWorker;
pub use protocol::{serve_one, ConvertRequest, ConvertResponse};

use crate::config::{Config, WorkerBackend};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Error type for worker invocations
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The codec reported a decode or encode failure; the text is shown as is
    #[error("{0}")]
    Codec(String),

    /// The isolated context died without answering
    #[error("Worker crashed: {0}")]
    Crashed(String),

    /// The response could not be decoded
    #[error("Worker protocol error: {0}")]
    Protocol(String),

    /// IO error talking to the worker
    #[error("Worker IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The worker claimed success but produced no bytes
    #[error("Worker returned empty output")]
    EmptyOutput,

    /// Codec code panicked inside the in-process backend
    #[error("Worker panicked during conversion")]
    Panicked,
}

/// Executes one conversion in an isolated context.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn convert(&self, request: ConvertRequest) -> Result<Vec<u8>, WorkerError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Build the worker selected by `cfg.worker.backend`.
///
/// The process backend re-invokes the current executable with `--worker`.
pub fn from_config(cfg: &Config) -> std::io::Result<Arc<dyn Worker>> {
    let worker: Arc<dyn Worker> = match cfg.worker.backend {
        WorkerBackend::Process => Arc::new(ProcessWorker::current_exe()?),
        WorkerBackend::InProcess => Arc::new(BlockingWorker::new(Arc::new(ImageCodec::new()))),
    };
    Ok(worker)
}
