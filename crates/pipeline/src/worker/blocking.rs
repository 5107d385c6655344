//! In-process worker backend
//!
//! Runs the codec on tokio's blocking thread pool. A panic in codec code is
//! contained by the join boundary and reported as a failure for that job only.

use super::codec::Codec;
use super::protocol::ConvertRequest;
use super::{Worker, WorkerError};
use async_trait::async_trait;
use std::sync::Arc;

/// Worker that converts on a blocking thread inside this process
#[derive(Clone)]
pub struct BlockingWorker {
    codec: Arc<dyn Codec>,
}

impl BlockingWorker {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl Worker for BlockingWorker {
    async fn convert(&self, request: ConvertRequest) -> Result<Vec<u8>, WorkerError> {
        let codec = Arc::clone(&self.codec);
        let joined = tokio::task::spawn_blocking(move || {
            codec.convert(&request.bytes, request.format, request.quality)
        })
        .await;

        match joined {
            Ok(Ok(bytes)) if bytes.is_empty() => Err(WorkerError::EmptyOutput),
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(WorkerError::Codec(e.to_string())),
            Err(e) if e.is_panic() => Err(WorkerError::Panicked),
            Err(e) => Err(WorkerError::Crashed(e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "in-process"
    }
}
