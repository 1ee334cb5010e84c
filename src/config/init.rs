// ABOUTME: Config scaffolding for new services.
// ABOUTME: Writes a commented pdo.yml template.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::ServiceName;

use super::{CONFIG_FILENAME, Config};

pub fn init_config(dir: &Path, service: Option<&str>, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let mut config = Config::template();

    if let Some(s) = service {
        config.service = ServiceName::new(s).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    }

    let yaml = generate_template_yaml(&config);
    std::fs::write(&config_path, yaml)?;

    Ok(())
}

fn generate_template_yaml(config: &Config) -> String {
    let rollout = &config.rollout;
    let fmt = |d| humantime::format_duration(d).to_string();
    format!(
        r#"service: {service}
replicas: {replicas}

rollout:
  soak_window: {soak}
  poll_interval: {poll}
  consecutive_passes_required: {passes}
  error_rate_threshold: {error_rate}
  latency_threshold_multiplier: {multiplier}
  stage_timeout: {stage_timeout}
  ready_timeout: {ready_timeout}

# Commands run with PDO_SERVICE, PDO_COLOR, PDO_IMAGE_DIGEST, PDO_REPLICAS,
# PDO_STABLE_COLOR, PDO_CANDIDATE_COLOR, PDO_STABLE_WEIGHT, PDO_CANDIDATE_WEIGHT.
# Exit 65 = invalid spec (no retry), 75 = transient (retried), other = permanent.
driver:
  apply: "{apply}"
  wait_ready: "{wait_ready}"
  set_traffic: "{set_traffic}"
  traffic_status: "{traffic_status}"
  decommission: "{decommission}"

metrics:
  url: {metrics_url}
  error_rate_query: '{error_rate_query}'
  latency_p95_query: '{latency_query}'

smoke:
  base_url: "{base_url}"
  checks:
    - GET /healthz
"#,
        service = config.service,
        replicas = config.replicas,
        soak = fmt(rollout.soak_window),
        poll = fmt(rollout.poll_interval),
        passes = rollout.consecutive_passes_required,
        error_rate = rollout.error_rate_threshold,
        multiplier = rollout.latency_threshold_multiplier,
        stage_timeout = fmt(rollout.stage_timeout),
        ready_timeout = fmt(rollout.ready_timeout),
        apply = config.driver.apply,
        wait_ready = config.driver.wait_ready,
        set_traffic = config.driver.set_traffic,
        traffic_status = config.driver.traffic_status,
        decommission = config.driver.decommission,
        metrics_url = config.metrics.url,
        error_rate_query = config.metrics.error_rate_query,
        latency_query = config.metrics.latency_p95_query,
        base_url = config.smoke.base_url,
    )
}
