//! heic-batch
//!
//! Converts batches of HEIC/HEIF images to JPEG, PNG or WebP with bounded
//! concurrency, per-job deadlines and capture metadata carried into JPEG
//! outputs.

pub mod concurrency;
pub mod device;
pub mod executor;
pub mod item;
pub mod metadata;
pub mod naming;
pub mod pipeline;
pub mod preview;
pub mod registry;
pub mod scan;
pub mod status_server;
pub mod worker;

pub use heic_batch_config as config;
pub use heic_batch_config::Config;
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use device::{DeviceClass, HostResources};
pub use executor::{Job, JobExecutor, JobExecutorConfig, JobFailure};
pub use item::{
    ConversionSettings, ConvertedOutput, Item, ItemId, ItemState, ItemStatus, ItemView,
    SettingsError, SourceFile,
};
pub use metadata::{transplant, MetadataError};
pub use naming::{derive_output_name, is_heic_candidate, normalize_source_name};
pub use pipeline::{Pipeline, PipelineError};
pub use preview::{PreviewHandle, PreviewStore, TempDirPreviews};
pub use registry::{BatchSummary, Registry};
pub use scan::{collect_sources, load_source, CollectedSources};
pub use status_server::{create_status_router, run_status_server, ServerError, SummaryView};
pub use worker::{
    serve_one, BlockingWorker, Codec, CodecError, ConvertRequest, ConvertResponse, ImageCodec,
    ProcessWorker, Worker, WorkerError,
};
