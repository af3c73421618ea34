mod args;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vert_core::{
    instance::HttpProbe, load_config, metrics, validate_config, BackendRegistry, Blocklist, Config,
    DirectorySink, FfmpegBackend, InstanceSelector, IpApiLocator, MagickBackend, Orchestrator,
    PandocBackend, RemoteJobClient, SqliteStateStore, StateStore, VertdBackend, ZipCodec,
};

use args::Args;

/// Configuration file picked up when `--config` is not given.
const DEFAULT_CONFIG: &str = "config.toml";

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = read_config(args.config.as_deref())?;
    validate_config(&config).context("Configuration validation failed")?;
    info!("State database: {:?}", config.state.path);

    let prometheus_registry = prometheus::Registry::new();
    metrics::register_metrics(&prometheus_registry).context("Failed to register metrics")?;

    // Persisted instance mode, location and blocklist
    let store: Arc<dyn StateStore> = Arc::new(
        SqliteStateStore::new(&config.state.path).context("Failed to open state database")?,
    );

    let mut selector = InstanceSelector::from_config(
        &config.instance,
        Arc::new(IpApiLocator::new(
            config.instance.locator_url.clone(),
            config.instance.probe_timeout(),
        )),
        Arc::new(HttpProbe::new(config.instance.probe_timeout())),
    )
    .with_store(Arc::clone(&store));
    if let Some(mode) = config.instance.mode {
        selector = selector.with_mode(mode);
    }
    if let Some(mode) = args.mode {
        selector.set_mode(mode.into());
    }
    info!("Instance mode: {:?}", selector.mode());

    let client = RemoteJobClient::new(
        Arc::new(selector),
        Arc::new(Blocklist::with_store(Arc::clone(&store))),
        config.remote.clone(),
    );

    let registry = BackendRegistry::new(vec![
        Arc::new(MagickBackend::new(&config.engines)),
        Arc::new(FfmpegBackend::new(&config.engines)),
        Arc::new(VertdBackend::new(client)),
        Arc::new(PandocBackend::new(&config.engines)),
    ]);
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(registry),
        Arc::new(ZipCodec),
        config.orchestrator.clone(),
    ));

    for path in &args.files {
        if let Err(e) = add_file(&orchestrator, path, args.to.as_deref()).await {
            error!("Skipping {}: {:#}", path.display(), e);
        }
    }
    if orchestrator.jobs().await.is_empty() {
        bail!("Nothing to convert");
    }

    orchestrator.preload().await;
    for (backend, status) in orchestrator.registry().statuses() {
        info!(backend = %backend, "Backend {}", status);
    }

    // Cancel everything on Ctrl+C
    {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling conversions");
                orchestrator.cancel_all().await;
            }
        });
    }

    let summary = orchestrator.convert_all().await;

    let sink = DirectorySink::new(&args.out);
    if args.zip {
        let name = orchestrator.download_all(&sink).await?;
        info!("Wrote {}", args.out.join(name).display());
    } else {
        for job in orchestrator.jobs().await {
            if job.result().is_none() {
                continue;
            }
            let name = orchestrator.download(job.id(), &sink).await?;
            info!(job_id = %job.id(), "Wrote {}", args.out.join(name).display());
        }
    }

    if args.metrics {
        print!("{}", metrics::encode_metrics(&prometheus_registry)?);
    }

    info!(
        done = summary.done,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "Finished"
    );
    if summary.failed > 0 {
        bail!("{} of {} files failed", summary.failed, summary.total());
    }
    Ok(())
}

/// Loads `path`, or `config.toml` when present, or the defaults.
fn read_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None if Path::new(DEFAULT_CONFIG).exists() => PathBuf::from(DEFAULT_CONFIG),
        None => {
            info!("No configuration file, using defaults");
            return Ok(Config::default());
        }
    };
    info!("Loading configuration from {:?}", path);
    load_config(&path).with_context(|| format!("Failed to load config from {:?}", path))
}

async fn add_file(orchestrator: &Orchestrator, path: &Path, to: Option<&str>) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} is not a file", path.display()))?;
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let ids = orchestrator.add(&name, Bytes::from(data), to).await?;
    info!("Queued {} as {} job(s)", name, ids.len());
    Ok(())
}
