//! CLI entry point for heic-batch
//!
//! Collects HEIC/HEIF inputs, converts them through the pipeline and writes
//! the results to an output directory. With `--worker` the binary instead
//! serves a single conversion request on stdin/stdout for the process
//! backend.

use clap::Parser;
use heic_batch::config::{ConfigError, DeviceClassSetting, TargetFormat, WorkerBackend};
use heic_batch::{
    collect_sources, load_source, run_status_server, serve_one, BatchSummary, Config,
    ConversionSettings, ImageCodec, Item, ItemId, ItemStatus, Pipeline, TempDirPreviews,
};
use heic_batch::worker::heif_supported;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// heic-batch - Convert HEIC/HEIF photos to JPEG, PNG or WebP
#[derive(Parser, Debug)]
#[command(name = "heic-batch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HEIC/HEIF files or directories to convert
    #[arg(required_unless_present = "worker")]
    inputs: Vec<PathBuf>,

    /// Path to a configuration file (config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the converted files are written to
    #[arg(short, long, default_value = "converted")]
    out_dir: PathBuf,

    /// Target format: jpeg, png or webp
    #[arg(short, long)]
    format: Option<TargetFormat>,

    /// Encoder quality in (0, 1]
    #[arg(short, long)]
    quality: Option<f32>,

    /// Worker backend: process or in_process
    #[arg(long)]
    backend: Option<WorkerBackend>,

    /// Device class: auto, constrained or standard
    #[arg(long)]
    device: Option<DeviceClassSetting>,

    /// Do not copy capture metadata into JPEG outputs
    #[arg(long, default_value = "false")]
    no_metadata: bool,

    /// Serve batch status over HTTP on this address until Ctrl-C
    #[arg(long, value_name = "ADDR")]
    serve: Option<SocketAddr>,

    /// Log at debug level
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Serve one conversion request on stdin/stdout
    #[arg(long, hide = true, default_value = "false")]
    worker: bool,
}

/// Logs go to stderr so stdout stays free for the worker protocol
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "heic_batch=debug,heic_batch_cli=debug"
    } else {
        "heic_batch=info,heic_batch_cli=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// File config (or defaults plus environment) with CLI flags on top
fn build_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    if let Some(format) = args.format {
        config.conversion.format = format;
    }
    if let Some(quality) = args.quality {
        config.conversion.quality = quality;
    }
    if let Some(backend) = args.backend {
        config.worker.backend = backend;
    }
    if let Some(device) = args.device {
        config.device.class = device;
    }
    if args.no_metadata {
        config.metadata.preserve = false;
    }

    config.validate()?;
    Ok(config)
}

/// Worker mode: one request in, one response out
fn run_worker() -> ExitCode {
    let codec = ImageCodec::new();
    match serve_one(&codec, io::stdin().lock(), io::stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "worker stream error");
            ExitCode::FAILURE
        }
    }
}

/// Logs every status change seen on the registry channel
async fn log_transitions(mut rx: watch::Receiver<Vec<Item>>) {
    let mut last: HashMap<ItemId, ItemStatus> = HashMap::new();
    loop {
        {
            let items = rx.borrow_and_update();
            for item in items.iter() {
                let status = item.status();
                if last.insert(item.id, status) != Some(status) {
                    debug!(id = %item.id, name = %item.source.name(), %status, "item status");
                }
            }
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Picks `name`, or `stem-N.ext` with the smallest free N
fn unique_name(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name, ""),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{}-{}{}", stem, n, ext);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Writes every `Success` output to `out_dir`, returning the written paths
fn export_outputs(items: &[Item], out_dir: &Path) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)?;

    let mut taken = HashSet::new();
    let mut written = Vec::new();
    for item in items {
        let Some(output) = item.output() else {
            continue;
        };
        let name = unique_name(&output.name, &taken);
        let path = out_dir.join(&name);
        fs::write(&path, &output.bytes)?;
        debug!(id = %item.id, path = %path.display(), "exported");
        taken.insert(name);
        written.push(path);
    }
    Ok(written)
}

fn print_summary(summary: &BatchSummary, items: &[Item], out_dir: &Path, exported: usize) {
    println!(
        "Converted {} of {} file(s) into {}",
        summary.ready,
        summary.total,
        out_dir.display()
    );
    if exported != summary.ready {
        println!("Exported {} file(s)", exported);
    }
    for item in items {
        if let Some(reason) = item.failure_reason() {
            println!("  failed: {} ({})", item.source.original_name(), reason);
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, Box<dyn Error>> {
    let config = build_config(&args)?;
    let settings = ConversionSettings::new(config.conversion.format, config.conversion.quality)?;

    let collected = collect_sources(&args.inputs);
    for path in &collected.unsupported {
        warn!(path = %path.display(), "skipping input that is not a HEIC/HEIF file");
    }

    let mut sources = Vec::with_capacity(collected.accepted.len());
    for path in &collected.accepted {
        match load_source(path) {
            Ok(source) => sources.push(source),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to read input"),
        }
    }
    if sources.is_empty() {
        error!("no HEIC/HEIF inputs found");
        return Ok(ExitCode::FAILURE);
    }

    let previews = Arc::new(TempDirPreviews::new()?);
    let pipeline = Arc::new(Pipeline::from_config(&config, previews)?);
    info!(
        device_class = %pipeline.device_class(),
        max_concurrent = pipeline.plan().max_concurrent_conversions,
        inputs = sources.len(),
        heif = heif_supported(),
        "converting"
    );
    if !heif_supported() {
        warn!("built without the `heif` feature; HEIC/HEIF containers cannot be decoded");
    }

    let server = args.serve.map(|addr| {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            if let Err(e) = run_status_server(pipeline, addr).await {
                error!(error = %e, "status server failed");
            }
        })
    });
    let progress = tokio::spawn(log_transitions(pipeline.subscribe()));

    pipeline.submit(sources, settings);
    pipeline.wait_idle().await;
    progress.abort();

    let items = pipeline.items();
    let summary = pipeline.summary();
    let exported = export_outputs(&items, &args.out_dir)?;
    print_summary(&summary, &items, &args.out_dir, exported.len());

    if let Some(server) = server {
        info!("batch finished; serving status until Ctrl-C");
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
        }
        server.abort();
    }

    Ok(if summary.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.worker {
        return run_worker();
    }

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn taken(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unique_name() {
        assert_eq!(unique_name("a.jpg", &taken(&[])), "a.jpg");
        assert_eq!(unique_name("a.jpg", &taken(&["a.jpg"])), "a-1.jpg");
        assert_eq!(unique_name("a.jpg", &taken(&["a.jpg", "a-1.jpg"])), "a-2.jpg");
        assert_eq!(unique_name("noext", &taken(&["noext"])), "noext-1");
        assert_eq!(unique_name(".hidden", &taken(&[".hidden"])), ".hidden-1");
    }

    #[test]
    fn test_cli_flags_override_config() {
        let args = Args::parse_from([
            "heic-batch",
            "--format",
            "png",
            "--quality",
            "0.5",
            "--backend",
            "in_process",
            "--device",
            "constrained",
            "--no-metadata",
            "photo.heic",
        ]);
        let config = build_config(&args).unwrap();

        assert_eq!(config.conversion.format, TargetFormat::Png);
        assert_eq!(config.conversion.quality, 0.5);
        assert_eq!(config.worker.backend, WorkerBackend::InProcess);
        assert_eq!(config.device.class, DeviceClassSetting::Constrained);
        assert!(!config.metadata.preserve);
    }

    #[test]
    fn test_invalid_quality_rejected() {
        let args = Args::parse_from(["heic-batch", "--quality", "1.5", "photo.heic"]);
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn test_inputs_required_outside_worker_mode() {
        assert!(Args::try_parse_from(["heic-batch"]).is_err());
        assert!(Args::try_parse_from(["heic-batch", "--worker"]).is_ok());
    }

    #[tokio::test]
    async fn test_export_deduplicates_names() {
        use heic_batch::{Codec, CodecError, BlockingWorker, ConcurrencyPlan, DeviceClass};
        use std::time::Duration;

        struct Echo;
        impl Codec for Echo {
            fn convert(&self, bytes: &[u8], _: TargetFormat, _: f32) -> Result<Vec<u8>, CodecError> {
                Ok(bytes.to_vec())
            }
        }

        let plan = ConcurrencyPlan {
            device_class: DeviceClass::Standard,
            max_concurrent_conversions: 2,
            conversion_timeout: Duration::from_secs(5),
        };
        let pipeline = Pipeline::new(
            plan,
            Arc::new(BlockingWorker::new(Arc::new(Echo))),
            Arc::new(TempDirPreviews::new().unwrap()),
        )
        .unwrap();
        pipeline.submit(
            vec![
                heic_batch::SourceFile::new("IMG.HEIC", b"one".to_vec()),
                heic_batch::SourceFile::new("IMG.heif", b"two".to_vec()),
            ],
            ConversionSettings::default(),
        );
        pipeline.wait_idle().await;

        let out = TempDir::new().unwrap();
        let written = export_outputs(&pipeline.items(), out.path()).unwrap();

        assert_eq!(written, vec![out.path().join("IMG.jpg"), out.path().join("IMG-1.jpg")]);
        assert_eq!(fs::read(out.path().join("IMG.jpg")).unwrap(), b"one");
        assert_eq!(fs::read(out.path().join("IMG-1.jpg")).unwrap(), b"two");
    }
}
