//! # Mangarr
//!
//! Daemon that keeps a manga library in sync with its sources: it refreshes
//! series metadata, downloads new chapters as CBZ archives, repackages them
//! after metadata edits and asks Kavita to rescan touched libraries.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mangarr_config::{CliOverrides, Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use mangarr_core::{
    CatalogStore, InMemoryStore, KavitaClient, KavitaConnector, Monitor, MonitorHandle, Notifier,
    PipelineContext, PluginRegistry, ProgressHub, Store,
};
use mangarr_model::{Library, LibraryId};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "mangarr")]
#[command(about = "Keeps a manga library in sync with its sources")]
struct Cli {
    #[command(flatten)]
    overrides: CliOverrides,

    /// Run a single sweep and exit instead of looping
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,monitor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let ConfigLoad { config, warnings } =
        ConfigLoader::with_options(ConfigLoaderOptions::from(cli.overrides))
            .load()
            .context("failed to load configuration")?;

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }
    info!(
        library_root = %config.paths.library_root.display(),
        cache_root = %config.paths.cache_root.display(),
        state_file = %config.paths.state_file.display(),
        poll_interval_ms = config.monitor.poll_interval_ms,
        sweep_interval_ms = config.monitor.sweep_interval_ms,
        "configuration in effect"
    );

    let store: Arc<dyn Store> = Arc::new(
        InMemoryStore::open(&config.paths.state_file)
            .await
            .context("failed to open state file")?,
    );
    let libraries = sync_libraries(store.as_ref(), &config).await?;

    let plugins = Arc::new(PluginRegistry::new(config.monitor.page_retry));
    let notifier = Arc::new(build_notifier(&config, &libraries).await);
    let progress = ProgressHub::new();

    let ctx = PipelineContext::new(
        store,
        plugins.clone(),
        progress.clone(),
        &config.paths.cache_root,
        config.monitor.clone(),
    );
    let monitor = Monitor::new(ctx, notifier);
    plugins.mark_loaded();
    info!(plugins = plugins.keys().await.len(), "plugins loaded");

    if cli.once {
        let report = monitor.sweep().await.context("sweep failed")?;
        info!(report = ?report, "single sweep finished");
        plugins.drain().await;
        return Ok(());
    }

    let handle = monitor.spawn();
    tokio::spawn(log_progress(progress, handle.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    if !handle.shutdown(config.monitor.shutdown_grace()).await {
        warn!("monitor did not stop within the grace period; aborted");
    }
    let drained = plugins.drain().await;
    info!(plugins = drained, "shutdown complete");
    Ok(())
}

/// Makes sure every configured library exists in the store, keeping ids
/// stable across restarts.
async fn sync_libraries(
    store: &dyn Store,
    config: &Config,
) -> anyhow::Result<Vec<(Library, Option<String>)>> {
    let existing = store
        .libraries()
        .await
        .context("failed to list libraries")?;

    let mut resolved = Vec::with_capacity(config.libraries.len());
    for entry in &config.libraries {
        let library = match existing.iter().find(|library| library.name == entry.name) {
            Some(library) if library.folder == entry.folder => library.clone(),
            Some(library) => {
                info!(
                    library = %entry.name,
                    from = %library.folder.display(),
                    to = %entry.folder.display(),
                    "library folder changed"
                );
                let mut library = library.clone();
                library.folder = entry.folder.clone();
                store.save_library(library.clone()).await?;
                library
            }
            None => {
                let library = Library::new(&entry.name, &entry.folder);
                store.save_library(library.clone()).await?;
                info!(library = %entry.name, folder = %entry.folder.display(), "library created");
                library
            }
        };
        resolved.push((library, entry.kavita_library_id.clone()));
    }
    Ok(resolved)
}

async fn build_notifier(config: &Config, libraries: &[(Library, Option<String>)]) -> Notifier {
    let notifier = Notifier::new();
    if !config.kavita.is_enabled() {
        return notifier;
    }

    let client = Arc::new(KavitaClient::new(config.kavita.clone()));
    for (library, kavita_library_id) in libraries {
        if let Some(kavita_library_id) = kavita_library_id {
            register_kavita(&notifier, &client, library.id, kavita_library_id).await;
        }
    }
    notifier
}

async fn register_kavita(
    notifier: &Notifier,
    client: &Arc<KavitaClient>,
    library_id: LibraryId,
    kavita_library_id: &str,
) {
    notifier
        .register(
            library_id,
            Arc::new(KavitaConnector::new(client.clone(), kavita_library_id)),
        )
        .await;
    info!(%library_id, kavita_library_id, "kavita connector registered");
}

async fn log_progress(progress: ProgressHub, handle: MonitorHandle) {
    let stop = handle.stop_token();
    let mut observer = progress.subscribe().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            snapshot = observer.next() => match snapshot {
                Some(snapshot) => tracing::debug!(target: "progress", snapshot = %snapshot, "progress"),
                None => break,
            },
        }
    }
}
