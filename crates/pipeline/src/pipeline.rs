//! Batch pipeline
//!
//! Accepts batches of source files, records them as `Queued`, and feeds them
//! in submission order through a single dispatcher task that admits at most
//! K conversions at a time. Submission, removal and clearing are synchronous;
//! observers follow progress through the registry's watch channel.

use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::Config;
use crate::device::DeviceClass;
use crate::executor::{Job, JobExecutor, JobExecutorConfig};
use crate::item::{ConversionSettings, Item, ItemId, SourceFile};
use crate::preview::PreviewStore;
use crate::registry::{BatchSummary, Registry};
use crate::worker::{self, Worker};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Error type for pipeline construction
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline spawns its dispatcher on the current Tokio runtime
    #[error("Pipeline must be created inside a Tokio runtime: {0}")]
    NoRuntime(String),

    /// The configured worker backend could not be set up
    #[error("Failed to set up worker backend: {0}")]
    Worker(#[from] std::io::Error),
}

type InFlight = Arc<Mutex<HashMap<ItemId, AbortHandle>>>;

/// The batch scheduler
pub struct Pipeline {
    registry: Arc<Registry>,
    executor: Arc<JobExecutor>,
    job_tx: mpsc::UnboundedSender<Job>,
    inflight: InFlight,
    dispatcher: JoinHandle<()>,
}

impl Pipeline {
    /// Create a pipeline and start its dispatcher on the current runtime
    pub fn new(
        plan: ConcurrencyPlan,
        worker: Arc<dyn Worker>,
        previews: Arc<dyn PreviewStore>,
    ) -> Result<Self, PipelineError> {
        Self::with_config(plan, worker, previews, JobExecutorConfig::default())
    }

    pub fn with_config(
        plan: ConcurrencyPlan,
        worker: Arc<dyn Worker>,
        previews: Arc<dyn PreviewStore>,
        config: JobExecutorConfig,
    ) -> Result<Self, PipelineError> {
        let handle = Handle::try_current().map_err(|e| PipelineError::NoRuntime(e.to_string()))?;

        info!(
            device_class = %plan.device_class,
            max_concurrent = plan.max_concurrent_conversions,
            timeout = ?plan.conversion_timeout,
            worker = worker.name(),
            preserve_metadata = config.preserve_metadata,
            "starting pipeline"
        );

        let registry = Arc::new(Registry::new(previews));
        let executor = Arc::new(JobExecutor::with_config(plan, worker, registry.clone(), config));
        let inflight: InFlight = Arc::new(Mutex::new(HashMap::new()));
        let (job_tx, job_rx) = mpsc::unbounded_channel();

        let dispatcher = handle.spawn(dispatch(
            job_rx,
            executor.clone(),
            registry.clone(),
            inflight.clone(),
        ));

        Ok(Self {
            registry,
            executor,
            job_tx,
            inflight,
            dispatcher,
        })
    }

    /// Build a pipeline from configuration: plan from the device class,
    /// worker from `worker.backend`, metadata from `metadata.preserve`.
    pub fn from_config(cfg: &Config, previews: Arc<dyn PreviewStore>) -> Result<Self, PipelineError> {
        let plan = derive_plan(cfg);
        let worker = worker::from_config(cfg)?;
        let config = JobExecutorConfig {
            preserve_metadata: cfg.metadata.preserve,
        };
        Self::with_config(plan, worker, previews, config)
    }

    /// Submit a batch. Every file is `Queued` before this returns.
    ///
    /// `settings` is captured per item and never changes afterwards.
    pub fn submit(&self, files: Vec<SourceFile>, settings: ConversionSettings) -> Vec<ItemId> {
        let items: Vec<Item> = files
            .into_iter()
            .map(|source| Item::queued(source, settings))
            .collect();
        let jobs: Vec<Job> = items
            .iter()
            .map(|item| Job {
                id: item.id,
                source_name: item.source.name().to_string(),
                source: item.source.bytes().clone(),
                settings: item.settings,
            })
            .collect();
        let ids: Vec<ItemId> = items.iter().map(|item| item.id).collect();

        self.registry.insert_queued(items);
        for job in jobs {
            if self.job_tx.send(job).is_err() {
                warn!("dispatcher has stopped; queued items will not be converted");
                break;
            }
        }

        info!(count = ids.len(), format = %settings.format(), "submitted batch");
        ids
    }

    /// Remove an item in any state. A running conversion for it is aborted.
    ///
    /// Returns false if the id is unknown.
    pub fn remove(&self, id: ItemId) -> bool {
        let removed = self.registry.remove(id).is_some();
        if let Some(handle) = self.take_inflight(id) {
            handle.abort();
            debug!(%id, "aborted running conversion");
        }
        removed
    }

    /// Remove every item, aborting running conversions. Returns the count.
    ///
    /// Only tasks of the removed items are aborted; a batch submitted while
    /// the clear is in progress keeps running.
    pub fn clear(&self) -> usize {
        let removed = self.registry.drain();
        for id in &removed {
            if let Some(handle) = self.take_inflight(*id) {
                handle.abort();
            }
        }
        info!(count = removed.len(), "cleared batch");
        removed.len()
    }

    fn take_inflight(&self, id: ItemId) -> Option<AbortHandle> {
        self.inflight.lock().ok().and_then(|mut map| map.remove(&id))
    }

    fn abort_all(&self) {
        if let Ok(mut map) = self.inflight.lock() {
            for (_, handle) in map.drain() {
                handle.abort();
            }
        }
    }

    /// Receiver of the ordered item list, notified on every transition
    pub fn subscribe(&self) -> watch::Receiver<Vec<Item>> {
        self.registry.subscribe()
    }

    pub fn items(&self) -> Vec<Item> {
        self.registry.snapshot()
    }

    pub fn item(&self, id: ItemId) -> Option<Item> {
        self.registry.get(id)
    }

    pub fn summary(&self) -> BatchSummary {
        self.registry.summary()
    }

    pub fn plan(&self) -> &ConcurrencyPlan {
        self.executor.concurrency_plan()
    }

    pub fn device_class(&self) -> DeviceClass {
        self.plan().device_class
    }

    /// The device-class signal exposed to presentation layers
    pub fn is_constrained(&self) -> bool {
        self.device_class().is_constrained()
    }

    /// Resolves once nothing is queued or converting
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        let _ = rx
            .wait_for(|items| BatchSummary::from_items(items).is_idle())
            .await;
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.dispatcher.abort();
        self.abort_all();
        self.registry.clear();
    }
}

/// Pops jobs in submission order and admits each into a free slot.
///
/// Items removed while waiting are skipped without taking a slot. Spawned
/// conversions live in a `JoinSet`, so aborting the dispatcher aborts them
/// too.
async fn dispatch(
    mut job_rx: mpsc::UnboundedReceiver<Job>,
    executor: Arc<JobExecutor>,
    registry: Arc<Registry>,
    inflight: InFlight,
) {
    let mut running = JoinSet::new();

    while let Some(job) = job_rx.recv().await {
        while running.try_join_next().is_some() {}

        if !registry.contains(job.id) {
            debug!(id = %job.id, "skipping removed item");
            continue;
        }

        let Some(permit) = executor.acquire_permit().await else {
            warn!("conversion slots closed; dispatcher stopping");
            break;
        };

        let id = job.id;
        let task_executor = executor.clone();
        let task_inflight = inflight.clone();

        // Mark, spawn and register under one lock: a concurrent `remove`
        // either sees the item still queued or finds its abort handle.
        {
            let Ok(mut map) = inflight.lock() else {
                break;
            };
            // The item may have been removed while waiting for the slot
            if !registry.mark_converting(id) {
                continue;
            }
            let handle = running.spawn(async move {
                let _permit = permit;
                let _ = task_executor.execute(job).await;
                if let Ok(mut map) = task_inflight.lock() {
                    map.remove(&id);
                }
            });
            map.insert(id, handle);
        }
    }

    while running.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetFormat;
    use crate::item::ItemStatus;
    use crate::preview::{PreviewHandle, TempDirPreviews};
    use crate::worker::{BlockingWorker, Codec, CodecError, ConvertRequest, WorkerError};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    /// Decrements the active counter even when the conversion is cancelled
    struct ActiveGuard<'a>(&'a AtomicUsize);

    impl Drop for ActiveGuard<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Worker scripted by the request bytes:
    /// `corrupt` fails, `slow` never answers in time, `steady` answers after
    /// 300 ms, anything else succeeds after a short delay.
    #[derive(Default)]
    struct ScriptedWorker {
        active: AtomicUsize,
        max_active: AtomicUsize,
        order: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        async fn convert(&self, request: ConvertRequest) -> Result<Vec<u8>, WorkerError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            let _guard = ActiveGuard(&self.active);
            self.order.lock().unwrap().push(request.bytes.clone());

            match request.bytes.as_slice() {
                b"corrupt" => Err(WorkerError::Codec("Corrupt file".to_string())),
                b"slow" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(b"late".to_vec())
                }
                b"steady" => {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(b"converted".to_vec())
                }
                _ => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(b"converted".to_vec())
                }
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Preview store that records every revoke
    #[derive(Default)]
    struct RecordingPreviews {
        allocated: Mutex<Vec<Uuid>>,
        revoked: Mutex<Vec<Uuid>>,
    }

    impl PreviewStore for RecordingPreviews {
        fn allocate(&self, _bytes: &[u8], _format: TargetFormat) -> std::io::Result<PreviewHandle> {
            let id = Uuid::new_v4();
            self.allocated.lock().unwrap().push(id);
            Ok(PreviewHandle {
                id,
                path: PathBuf::from(format!("mem:{}", id)),
            })
        }

        fn revoke(&self, handle: &PreviewHandle) {
            self.revoked.lock().unwrap().push(handle.id);
        }

        fn live_count(&self) -> usize {
            self.allocated.lock().unwrap().len() - self.revoked.lock().unwrap().len()
        }
    }

    impl RecordingPreviews {
        fn revoke_count(&self, id: Uuid) -> usize {
            self.revoked.lock().unwrap().iter().filter(|r| **r == id).count()
        }
    }

    fn plan(k: u32, timeout: Duration) -> ConcurrencyPlan {
        ConcurrencyPlan {
            device_class: DeviceClass::Standard,
            max_concurrent_conversions: k,
            conversion_timeout: timeout,
        }
    }

    fn no_metadata() -> JobExecutorConfig {
        JobExecutorConfig {
            preserve_metadata: false,
        }
    }

    fn setup(k: u32, timeout: Duration) -> (Pipeline, Arc<ScriptedWorker>, Arc<RecordingPreviews>) {
        let worker = Arc::new(ScriptedWorker::default());
        let previews = Arc::new(RecordingPreviews::default());
        let pipeline =
            Pipeline::with_config(plan(k, timeout), worker.clone(), previews.clone(), no_metadata()).unwrap();
        (pipeline, worker, previews)
    }

    fn file(name: &str, bytes: &[u8]) -> SourceFile {
        SourceFile::new(name, bytes.to_vec())
    }

    async fn wait_for_status(pipeline: &Pipeline, id: ItemId, status: ItemStatus) {
        let mut rx = pipeline.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|items| items.iter().any(|i| i.id == id && i.status() == status)),
        )
        .await
        .expect("status not reached in time")
        .unwrap();
    }

    #[test]
    fn test_requires_runtime() {
        let result = Pipeline::new(
            plan(1, Duration::from_secs(1)),
            Arc::new(ScriptedWorker::default()),
            Arc::new(RecordingPreviews::default()),
        );
        assert!(matches!(result, Err(PipelineError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_batch_is_queued_before_submit_returns() {
        let (pipeline, _worker, _previews) = setup(2, Duration::from_secs(5));
        let files: Vec<SourceFile> = (0..7).map(|i| file(&format!("{}.HEIC", i), b"ok")).collect();

        let ids = pipeline.submit(files, ConversionSettings::default());

        let items = pipeline.items();
        assert_eq!(ids.len(), 7);
        assert_eq!(items.len(), 7);
        assert!(items.iter().all(|i| i.status() == ItemStatus::Queued));
        assert_eq!(items[0].source.name(), "0.heic");

        pipeline.wait_idle().await;
        assert_eq!(pipeline.summary().ready, 7);
    }

    #[tokio::test]
    async fn test_at_most_k_converting() {
        let (pipeline, worker, _previews) = setup(2, Duration::from_secs(5));
        let mut rx = pipeline.subscribe();
        let files: Vec<SourceFile> = (0..8).map(|i| file(&format!("{}.heic", i), b"ok")).collect();
        pipeline.submit(files, ConversionSettings::default());

        loop {
            let summary = BatchSummary::from_items(&rx.borrow_and_update());
            assert!(summary.converting <= 2, "{} converting", summary.converting);
            if summary.is_idle() {
                break;
            }
            rx.changed().await.unwrap();
        }

        assert_eq!(worker.max_active.load(Ordering::SeqCst), 2);
        assert_eq!(pipeline.summary().ready, 8);
    }

    #[tokio::test]
    async fn test_admission_is_fifo() {
        let (pipeline, worker, _previews) = setup(1, Duration::from_secs(5));
        let files: Vec<SourceFile> = (0..5)
            .map(|i| file(&format!("{}.heic", i), format!("ok-{}", i).as_bytes()))
            .collect();
        pipeline.submit(files, ConversionSettings::default());
        pipeline.wait_idle().await;

        let order = worker.order.lock().unwrap().clone();
        let expected: Vec<Vec<u8>> = (0..5).map(|i| format!("ok-{}", i).into_bytes()).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn test_success_scenario() {
        let (pipeline, _worker, previews) = setup(5, Duration::from_secs(5));
        let settings = ConversionSettings::new(TargetFormat::Jpeg, 0.8).unwrap();
        let id = pipeline.submit(vec![file("test.heic", b"ok")], settings)[0];

        pipeline.wait_idle().await;

        let item = pipeline.item(id).unwrap();
        assert_eq!(item.status(), ItemStatus::Success);
        let output = item.output().unwrap();
        assert_eq!(output.name, "test.jpg");
        assert_eq!(output.bytes.as_ref(), b"converted");
        assert_eq!(previews.live_count(), 1);
        assert!(pipeline.summary().has_success);
    }

    #[tokio::test]
    async fn test_failure_scenario() {
        let (pipeline, _worker, _previews) = setup(5, Duration::from_secs(5));
        let mut rx = pipeline.subscribe();
        let id = pipeline.submit(vec![file("bad.heic", b"corrupt")], ConversionSettings::default())[0];

        let mut seen = Vec::new();
        loop {
            if let Some(item) = rx.borrow_and_update().iter().find(|i| i.id == id) {
                if seen.last() != Some(&item.status()) {
                    seen.push(item.status());
                }
            }
            if seen.last().map(|s| s.is_terminal()).unwrap_or(false) {
                break;
            }
            rx.changed().await.unwrap();
        }

        assert_eq!(seen.last(), Some(&ItemStatus::Failed));
        assert!(seen.iter().all(|s| matches!(
            s,
            ItemStatus::Queued | ItemStatus::Converting | ItemStatus::Failed
        )));
        assert_eq!(pipeline.item(id).unwrap().failure_reason(), Some("Corrupt file"));
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_siblings() {
        let (pipeline, _worker, _previews) = setup(2, Duration::from_secs(5));
        pipeline.submit(
            vec![file("a.heic", b"ok"), file("bad.heic", b"corrupt"), file("c.heic", b"ok")],
            ConversionSettings::default(),
        );
        pipeline.wait_idle().await;

        let summary = pipeline.summary();
        assert_eq!(summary.ready, 2);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_timeout_fails_and_frees_slot() {
        let (pipeline, worker, _previews) = setup(1, Duration::from_millis(100));
        let ids = pipeline.submit(
            vec![file("slow.heic", b"slow"), file("next.heic", b"ok")],
            ConversionSettings::default(),
        );
        pipeline.wait_idle().await;

        let slow = pipeline.item(ids[0]).unwrap();
        assert_eq!(slow.status(), ItemStatus::Failed);
        assert!(slow.failure_reason().unwrap().contains("timed out"));
        assert_eq!(pipeline.item(ids[1]).unwrap().status(), ItemStatus::Success);
        // The abandoned call was cancelled, not left running
        assert_eq!(worker.active.load(Ordering::SeqCst), 0);
    }

    struct SleepyCodec;

    impl Codec for SleepyCodec {
        fn convert(&self, _: &[u8], _: TargetFormat, _: f32) -> Result<Vec<u8>, CodecError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(b"late result".to_vec())
        }
    }

    #[tokio::test]
    async fn test_late_result_after_timeout_is_discarded() {
        let previews = Arc::new(RecordingPreviews::default());
        let pipeline = Pipeline::with_config(
            plan(1, Duration::from_millis(50)),
            Arc::new(BlockingWorker::new(Arc::new(SleepyCodec))),
            previews.clone(),
            no_metadata(),
        )
        .unwrap();

        let id = pipeline.submit(vec![file("x.heic", b"x")], ConversionSettings::default())[0];
        pipeline.wait_idle().await;
        let failed = pipeline.item(id).unwrap();
        assert_eq!(failed.status(), ItemStatus::Failed);

        // Let the blocking thread finish and hand back its result
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(pipeline.item(id).unwrap(), failed);
        assert_eq!(previews.allocated.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_remove_revokes_preview_exactly_once() {
        let (pipeline, _worker, previews) = setup(2, Duration::from_secs(5));
        let id = pipeline.submit(vec![file("a.heic", b"ok")], ConversionSettings::default())[0];
        pipeline.wait_idle().await;
        let preview = pipeline.item(id).unwrap().preview().unwrap().clone();

        assert!(pipeline.remove(id));
        assert!(!pipeline.remove(id));
        pipeline.clear();
        drop(pipeline);

        assert_eq!(previews.revoke_count(preview.id), 1);
    }

    #[tokio::test]
    async fn test_remove_while_converting_aborts_job() {
        let (pipeline, worker, previews) = setup(1, Duration::from_secs(3600));
        let mut rx = pipeline.subscribe();
        let ids = pipeline.submit(
            vec![file("slow.heic", b"slow"), file("next.heic", b"ok")],
            ConversionSettings::default(),
        );
        wait_for_status(&pipeline, ids[0], ItemStatus::Converting).await;

        assert!(pipeline.remove(ids[0]));
        pipeline.wait_idle().await;

        // No transition for the removed id is ever observed again
        assert!(!rx.borrow_and_update().iter().any(|i| i.id == ids[0]));
        assert_eq!(pipeline.item(ids[1]).unwrap().status(), ItemStatus::Success);
        assert_eq!(worker.active.load(Ordering::SeqCst), 0);
        assert_eq!(previews.live_count(), 1);
    }

    #[tokio::test]
    async fn test_removed_queued_item_is_never_converted() {
        let (pipeline, worker, _previews) = setup(1, Duration::from_secs(5));
        let ids = pipeline.submit(
            vec![file("a.heic", b"ok-a"), file("b.heic", b"ok-b")],
            ConversionSettings::default(),
        );
        assert!(pipeline.remove(ids[1]));
        pipeline.wait_idle().await;

        assert_eq!(*worker.order.lock().unwrap(), vec![b"ok-a".to_vec()]);
        assert_eq!(pipeline.summary().total, 1);
    }

    #[tokio::test]
    async fn test_clear_and_teardown_revoke_previews() {
        let (pipeline, _worker, previews) = setup(3, Duration::from_secs(5));
        let files: Vec<SourceFile> = (0..3).map(|i| file(&format!("{}.heic", i), b"ok")).collect();
        pipeline.submit(files, ConversionSettings::default());
        pipeline.wait_idle().await;
        assert_eq!(previews.live_count(), 3);

        assert_eq!(pipeline.clear(), 3);
        assert_eq!(previews.live_count(), 0);
        assert!(!pipeline.summary().has_items);

        pipeline.submit(vec![file("again.heic", b"ok")], ConversionSettings::default());
        pipeline.wait_idle().await;
        assert_eq!(previews.live_count(), 1);

        drop(pipeline);
        assert_eq!(previews.live_count(), 0);
    }

    /// Preview store whose next revoke parks until the test releases it
    #[derive(Default)]
    struct GatedPreviews {
        inner: RecordingPreviews,
        gate: Mutex<Option<(std::sync::mpsc::Sender<()>, std::sync::mpsc::Receiver<()>)>>,
    }

    impl PreviewStore for GatedPreviews {
        fn allocate(&self, bytes: &[u8], format: TargetFormat) -> std::io::Result<PreviewHandle> {
            self.inner.allocate(bytes, format)
        }

        fn revoke(&self, handle: &PreviewHandle) {
            let gate = self.gate.lock().unwrap().take();
            if let Some((entered, release)) = gate {
                entered.send(()).unwrap();
                release.recv().unwrap();
            }
            self.inner.revoke(handle);
        }

        fn live_count(&self) -> usize {
            self.inner.live_count()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_clear_spares_batch_submitted_during_clear() {
        let worker = Arc::new(ScriptedWorker::default());
        let previews = Arc::new(GatedPreviews::default());
        let pipeline = Arc::new(
            Pipeline::with_config(
                plan(2, Duration::from_secs(5)),
                worker,
                previews.clone(),
                no_metadata(),
            )
            .unwrap(),
        );
        pipeline.submit(vec![file("a.heic", b"ok")], ConversionSettings::default());
        pipeline.wait_idle().await;

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        *previews.gate.lock().unwrap() = Some((entered_tx, release_rx));

        // Clear parks inside the revoke of a.heic's preview
        let clearing = {
            let pipeline = pipeline.clone();
            std::thread::spawn(move || pipeline.clear())
        };
        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();

        let b = pipeline.submit(vec![file("b.heic", b"steady")], ConversionSettings::default())[0];
        wait_for_status(&pipeline, b, ItemStatus::Converting).await;

        release_tx.send(()).unwrap();
        let cleared = tokio::task::spawn_blocking(move || clearing.join().unwrap())
            .await
            .unwrap();
        assert_eq!(cleared, 1);

        tokio::time::timeout(Duration::from_secs(5), pipeline.wait_idle())
            .await
            .expect("item submitted during clear never finished");
        assert_eq!(pipeline.item(b).unwrap().status(), ItemStatus::Success);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_remove_on_admission_cancels_worker() {
        let (pipeline, worker, _previews) = setup(1, Duration::from_secs(3600));
        let pipeline = Arc::new(pipeline);
        let mut rx = pipeline.subscribe();
        let files: Vec<SourceFile> = (0..5).map(|i| file(&format!("{}.heic", i), b"slow")).collect();
        let ids = pipeline.submit(files, ConversionSettings::default());

        // Remove each item the moment it is seen converting
        let mut removed = 0;
        while removed < ids.len() {
            let converting: Vec<ItemId> = rx
                .borrow_and_update()
                .iter()
                .filter(|i| i.status() == ItemStatus::Converting)
                .map(|i| i.id)
                .collect();
            for id in converting {
                assert!(pipeline.remove(id));
                removed += 1;
            }
            if removed < ids.len() {
                tokio::time::timeout(Duration::from_secs(5), rx.changed())
                    .await
                    .expect("next item was never admitted")
                    .unwrap();
            }
        }

        // Every worker call was cancelled rather than left running to its deadline
        tokio::time::timeout(Duration::from_secs(5), async {
            while worker.active.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker call still running after removal");
        assert!(!pipeline.summary().has_items);
    }

    #[tokio::test]
    async fn test_settings_captured_per_batch() {
        let (pipeline, _worker, _previews) = setup(2, Duration::from_secs(5));
        let png = ConversionSettings::new(TargetFormat::Png, 0.5).unwrap();
        let a = pipeline.submit(vec![file("IMG_0001.HEIC", b"ok")], png)[0];
        let b = pipeline.submit(vec![file("IMG_0002.HEIC", b"ok")], ConversionSettings::default())[0];
        pipeline.wait_idle().await;

        let a = pipeline.item(a).unwrap();
        let b = pipeline.item(b).unwrap();
        assert_eq!(a.settings, png);
        assert_eq!(a.output().unwrap().name, "IMG_0001.png");
        assert_eq!(b.output().unwrap().name, "IMG_0002.jpg");
    }

    #[tokio::test]
    async fn test_preview_store_teardown_with_tempdir() {
        let previews = Arc::new(TempDirPreviews::new().unwrap());
        let pipeline = Pipeline::with_config(
            plan(2, Duration::from_secs(5)),
            Arc::new(ScriptedWorker::default()),
            previews.clone(),
            no_metadata(),
        )
        .unwrap();
        pipeline.submit(vec![file("a.heic", b"ok")], ConversionSettings::default());
        pipeline.wait_idle().await;
        assert_eq!(previews.live_count(), 1);
        assert!(!pipeline.is_constrained());

        drop(pipeline);
        assert_eq!(previews.live_count(), 0);
    }
}
