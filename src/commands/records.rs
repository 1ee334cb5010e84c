// ABOUTME: Commands that read or edit deployment records without following a rollout.
// ABOUTME: Adopt, status, abort and prune.

use super::connect::connect;
use pdo::config::Config;
use pdo::error::Result;
use pdo::output::Output;
use pdo::types::{Color, DeploymentId, ImageDigest};
use std::time::Duration;

/// Record the running production version as the stable baseline.
pub fn adopt(
    config: Config,
    digest: ImageDigest,
    color: Color,
    replicas: Option<u32>,
    output: Output,
) -> Result<()> {
    let orchestrator = connect(&config, None)?;
    let replicas = replicas.unwrap_or(config.replicas);
    let id = orchestrator.adopt_stable(
        &config.service,
        digest.clone(),
        color,
        replicas,
        config.rollout.clone(),
    )?;
    output.success(&format!(
        "Adopted {digest} on {color} ({replicas} replicas) as stable for {} [{id}]",
        config.service
    ));
    Ok(())
}

/// Show one deployment in detail, or every deployment of the service.
pub fn status(config: Config, id: Option<DeploymentId>, output: Output) -> Result<()> {
    let orchestrator = connect(&config, None)?;
    match id {
        Some(id) => {
            let deployment = orchestrator.get_deployment(&id)?;
            output.deployment_detail(&deployment);
        }
        None => {
            let deployments = orchestrator.list_deployments(Some(&config.service))?;
            output.deployments(&deployments);
        }
    }
    Ok(())
}

/// Ask a rollout to stop and roll back.
pub fn abort(config: Config, id: DeploymentId, output: Output) -> Result<()> {
    let orchestrator = connect(&config, None)?;
    orchestrator.abort_deployment(&id)?;
    output.success(&format!(
        "Abort requested for {id}; the running rollout will roll back"
    ));
    Ok(())
}

/// Delete finished records older than `older_than`.
pub fn prune(config: Config, older_than: Duration, output: Output) -> Result<()> {
    let orchestrator = connect(&config, None)?;
    let pruned = orchestrator.prune(older_than)?;
    for id in &pruned {
        output.progress(&format!("  → Removed {id}"));
    }
    output.success(&format!("Pruned {} deployment(s)", pruned.len()));
    Ok(())
}
