// ABOUTME: Shared helper for building an orchestrator from a loaded config.
// ABOUTME: Wires the file store, command driver, Prometheus source, smoke check and notifiers.

use pdo::Orchestrator;
use pdo::config::Config;
use pdo::deploy::Collaborators;
use pdo::driver::CommandDriver;
use pdo::error::Result;
use pdo::metrics::PrometheusSource;
use pdo::notify::{ChannelNotifier, HookNotifier, LogNotifier, Notifiers};
use pdo::smoke::HttpSmokeCheck;
use pdo::store::FileStateStore;
use std::sync::Arc;

/// Build an orchestrator for `config`.
///
/// When `events` is given every transition is also forwarded to it, for
/// commands that print progress while a rollout runs.
pub fn connect(config: &Config, events: Option<ChannelNotifier>) -> Result<Orchestrator> {
    let store = FileStateStore::open(config.state_dir.clone())?;
    let driver = CommandDriver::new(config.driver.clone())?;
    let metrics = PrometheusSource::new(config.metrics.clone())?;
    let smoke = HttpSmokeCheck::new(config.smoke.clone());

    let mut notifiers = Notifiers::new()
        .with(LogNotifier)
        .with(HookNotifier::new(&config.hooks_dir));
    if let Some(events) = events {
        notifiers = notifiers.with(events);
    }

    tracing::debug!(
        service = %config.service,
        state_dir = %config.state_dir.display(),
        "orchestrator ready"
    );

    Ok(Orchestrator::new(Collaborators {
        store: Arc::new(store),
        driver: Arc::new(driver),
        metrics: Arc::new(metrics),
        smoke: Arc::new(smoke),
        notifier: Arc::new(notifiers),
    }))
}
