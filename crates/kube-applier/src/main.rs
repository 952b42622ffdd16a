use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kube_applier::{
    load_settings, Controller, GitManifestSource, KubectlExecutor, StaticTargetSource,
};

/// Continuously applies manifests from a git checkout to a Kubernetes cluster.
#[derive(Parser)]
#[command(name = "kube-applier")]
#[command(version)]
struct Cli {
    /// Settings file (YAML or JSON)
    #[arg(short, long, env = "KUBE_APPLIER_CONFIG")]
    config: PathBuf,

    /// Default log filter when RUST_LOG is not set
    #[arg(long, env = "KUBE_APPLIER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log as JSON lines
    #[arg(long, env = "KUBE_APPLIER_LOG_JSON")]
    json: bool,

    /// Force dry-run for every target, overriding the settings file
    #[arg(long)]
    dry_run: bool,

    /// Validate the settings file and exit
    #[arg(long)]
    check: bool,
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    // Route `log` records from the shell-out helpers into tracing.
    tracing_log::LogTracer::init().context("Failed to install log bridge")?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    if cli.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    info!("Starting kube-applier v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = load_settings(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;
    if cli.dry_run {
        settings.dry_run = true;
    }
    let targets = settings.build_targets()?;

    info!(
        repo = %settings.repo_path,
        targets = targets.len(),
        workers = settings.effective_worker_count(),
        dry_run = settings.dry_run,
        "Settings loaded"
    );
    if cli.check {
        info!("Settings are valid");
        return Ok(());
    }

    let manifests = Arc::new(GitManifestSource::new(&settings.repo_path));
    let target_source = Arc::new(StaticTargetSource::new(targets));
    let executor = Arc::new(KubectlExecutor::new(&settings.kubectl_path));

    let controller = Controller::new(settings, manifests, target_source, executor);
    let shutdown = controller.shutdown_signal();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, finishing in-flight runs");
        shutdown.trigger();
    })
    .context("Failed to install signal handler")?;

    controller.run().await?;
    Ok(())
}
