pub mod cache;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod messages;
pub mod orchestrator;
pub mod paths;
pub mod remote;
pub mod settings;
pub mod storage;
pub mod tabs;
pub mod types;

pub use error::{ScanError, StorageError};
pub use orchestrator::{Orchestrator, ScanOutcome, ScanRequest, Trigger};

use std::sync::Arc;

/// Wires a background-context router from `cfg` and the storage areas
/// under `base`.
pub fn build_router(
  base: &std::path::Path,
  cfg: &config::Config,
  host: Arc<dyn dispatcher::HostPlatform>,
) -> anyhow::Result<messages::Router> {
  use anyhow::Context;

  let sync: Arc<dyn storage::KeyValueStore> =
    Arc::new(storage::FileStore::new(paths::sync_store_path(base)));
  let local: Arc<dyn storage::KeyValueStore> =
    Arc::new(storage::FileStore::new(paths::local_store_path(base)));

  let settings = Arc::new(settings::SettingsStore::new(sync));
  settings.load();

  let transport =
    Arc::new(remote::HttpTransport::new(&cfg.remote).context("build scan transport")?);
  let orchestrator = Orchestrator::new(
    settings,
    Arc::new(cache::ScanCache::with_local_store(local)),
    transport,
    host,
    Arc::new(tabs::TabRegistry::new()),
  )
  .with_retry(cfg.retry.clone())
  .with_in_flight_policy(cfg.scan.in_flight);

  Ok(messages::Router::new(Arc::new(orchestrator)))
}
