//! Job executor module for heic-batch
//!
//! Runs one admitted conversion: calls the worker under the plan's deadline,
//! transplants metadata into JPEG outputs and records the outcome in the
//! registry. Concurrency is limited by a semaphore sized from the plan.

use crate::concurrency::ConcurrencyPlan;
use crate::config::TargetFormat;
use crate::item::{ConversionSettings, ItemId};
use crate::metadata::transplant;
use crate::naming::derive_output_name;
use crate::registry::Registry;
use crate::worker::{ConvertRequest, Worker, WorkerError};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

/// Why a job ended in `Failed`
#[derive(Debug, Error)]
pub enum JobFailure {
    /// The worker reported a failure; its text becomes the failure reason
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// No response before the deadline
    #[error("Conversion timed out after {0:?}")]
    Timeout(Duration),
}

/// One admitted conversion
#[derive(Debug, Clone)]
pub struct Job {
    pub id: ItemId,
    /// Normalized source name, used to derive the output name
    pub source_name: String,
    pub source: Bytes,
    pub settings: ConversionSettings,
}

/// Configuration for the job executor
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// Copy capture metadata into JPEG outputs
    pub preserve_metadata: bool,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            preserve_metadata: true,
        }
    }
}

/// Executes conversions with concurrency limiting
///
/// Uses a tokio Semaphore to keep at most `max_concurrent_conversions` jobs
/// running at once.
pub struct JobExecutor {
    semaphore: Arc<Semaphore>,
    concurrency_plan: ConcurrencyPlan,
    worker: Arc<dyn Worker>,
    registry: Arc<Registry>,
    config: JobExecutorConfig,
}

impl JobExecutor {
    pub fn new(plan: ConcurrencyPlan, worker: Arc<dyn Worker>, registry: Arc<Registry>) -> Self {
        Self::with_config(plan, worker, registry, JobExecutorConfig::default())
    }

    pub fn with_config(
        plan: ConcurrencyPlan,
        worker: Arc<dyn Worker>,
        registry: Arc<Registry>,
        config: JobExecutorConfig,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(plan.slots())),
            concurrency_plan: plan,
            worker,
            registry,
            config,
        }
    }

    /// Get the number of available permits (free conversion slots)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn concurrency_plan(&self) -> &ConcurrencyPlan {
        &self.concurrency_plan
    }

    pub fn worker_name(&self) -> &'static str {
        self.worker.name()
    }

    /// Wait for a free slot. Waiters are served in FIFO order.
    ///
    /// Returns `None` only if the semaphore was closed.
    pub async fn acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().acquire_owned().await.ok()
    }

    /// Call the worker for `job` under the plan's deadline.
    ///
    /// On expiry the worker future is dropped, which kills a child process
    /// worker; a blocking-thread worker finishes on its own and its result is
    /// thrown away.
    pub async fn run(&self, job: &Job) -> Result<Vec<u8>, JobFailure> {
        let request = ConvertRequest {
            bytes: job.source.to_vec(),
            format: job.settings.format(),
            quality: job.settings.quality(),
        };
        let deadline = self.concurrency_plan.conversion_timeout;

        match tokio::time::timeout(deadline, self.worker.convert(request)).await {
            Ok(result) => Ok(result?),
            Err(_elapsed) => Err(JobFailure::Timeout(deadline)),
        }
    }

    /// Execute a job that has already been marked `Converting`
    ///
    /// 1. Runs the worker with the deadline
    /// 2. Transplants metadata when the target is JPEG and preservation is on
    /// 3. Records `Success` or `Failed` in the registry
    ///
    /// Recording is identity-keyed: if the item was removed meanwhile the
    /// outcome is dropped.
    pub async fn execute(&self, job: Job) -> Result<(), JobFailure> {
        let format = job.settings.format();
        info!(id = %job.id, name = %job.source_name, %format, "conversion started");

        let output = match self.run(&job).await {
            Ok(output) => output,
            Err(failure) => {
                warn!(id = %job.id, name = %job.source_name, error = %failure, "conversion failed");
                self.registry.fail(job.id, failure.to_string());
                return Err(failure);
            }
        };

        let output = if format == TargetFormat::Jpeg && self.config.preserve_metadata {
            let source = job.source.clone();
            let fallback = output.clone();
            tokio::task::spawn_blocking(move || transplant(&source, output))
                .await
                .unwrap_or(fallback)
        } else {
            output
        };

        let output_name = derive_output_name(&job.source_name, format);
        let size = output.len();
        if self.registry.complete(job.id, output, output_name.clone(), format) {
            info!(id = %job.id, output = %output_name, bytes = size, "conversion finished");
        }
        Ok(())
    }
}
