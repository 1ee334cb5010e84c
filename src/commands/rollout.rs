// ABOUTME: Commands that run rollouts in this process and follow them to the end.
// ABOUTME: Ctrl-C stops at a safe point and leaves the rollout resumable.

use super::connect::connect;
use futures::future::join_all;
use pdo::Orchestrator;
use pdo::config::Config;
use pdo::deploy::{DeployError, Deployment, DeploymentStatus};
use pdo::error::{Error, Result};
use pdo::notify::{ChannelNotifier, TransitionEvent};
use pdo::output::Output;
use pdo::types::{DeploymentId, ImageDigest};
use tokio::sync::mpsc::UnboundedReceiver;

/// Roll out `digest` and wait for a terminal state.
pub async fn deploy(config: Config, digest: ImageDigest, mut output: Output) -> Result<()> {
    output.start_timer();
    let (events, rx) = ChannelNotifier::new();
    let orchestrator = connect(&config, Some(events))?;

    output.progress(&format!("Rolling out {} to {}", digest, config.service));
    let id = orchestrator.start_deployment(&config.service, digest, config.rollout.clone())?;
    output.progress(&format!("  → Deployment {id}"));

    let finished = follow(&orchestrator, vec![id], rx, &output).await;
    report(finished, &output)
}

/// Continue every rollout a previous process left unfinished.
pub async fn resume(config: Config, mut output: Output) -> Result<()> {
    output.start_timer();
    let (events, rx) = ChannelNotifier::new();
    let orchestrator = connect(&config, Some(events))?;

    let ids = orchestrator.resume_incomplete()?;
    if ids.is_empty() {
        output.success("Nothing to resume");
        return Ok(());
    }
    for id in &ids {
        output.progress(&format!("  → Resuming {id}"));
    }

    let finished = follow(&orchestrator, ids, rx, &output).await;
    report(finished, &output)
}

/// Run the rollback of a frozen deployment again.
pub async fn retry_rollback(config: Config, id: DeploymentId, mut output: Output) -> Result<()> {
    output.start_timer();
    let (events, rx) = ChannelNotifier::new();
    let orchestrator = connect(&config, Some(events))?;

    orchestrator.retry_rollback(&id)?;
    output.progress(&format!("Retrying rollback of {id}"));

    let finished = follow(&orchestrator, vec![id], rx, &output).await;
    report(finished, &output)
}

/// Print transitions until every rollout in `ids` stops.
async fn follow(
    orchestrator: &Orchestrator,
    ids: Vec<DeploymentId>,
    mut rx: UnboundedReceiver<TransitionEvent>,
    output: &Output,
) -> Vec<(DeploymentId, std::result::Result<Deployment, DeployError>)> {
    let waiting = join_all(
        ids.clone()
            .into_iter()
            .map(|id| async move { orchestrator.wait(&id).await }),
    );
    tokio::pin!(waiting);

    let mut interrupted = false;
    let results = loop {
        tokio::select! {
            results = &mut waiting => break results,
            Some(event) = rx.recv() => output.transition(&event),
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                output.warning("interrupted, stopping at the next safe point");
                orchestrator.shutdown().await;
            }
        }
    };
    while let Ok(event) = rx.try_recv() {
        output.transition(&event);
    }

    ids.into_iter().zip(results).collect()
}

/// Print the outcome of each rollout. Fails if any of them did not complete.
fn report(
    finished: Vec<(DeploymentId, std::result::Result<Deployment, DeployError>)>,
    output: &Output,
) -> Result<()> {
    let mut failure = None;
    for (id, result) in finished {
        let error = match result {
            Ok(d) if d.status() == DeploymentStatus::Completed => {
                output.success(&format!(
                    "Deployment {id} completed: {} is stable",
                    d.stable_variant().image_digest
                ));
                continue;
            }
            Ok(d) if d.status() == DeploymentStatus::RolledBack => Error::RolledBack {
                reason: d
                    .last_error()
                    .map(|cause| cause.message.clone())
                    .unwrap_or_else(|| "no cause recorded".to_string()),
                id,
            },
            Ok(_) => Error::Interrupted(id),
            Err(e) => Error::Deploy(e),
        };
        // Earlier failures are printed here, the last one is returned
        if let Some(previous) = failure.replace(error) {
            output.error(&previous.to_string());
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
