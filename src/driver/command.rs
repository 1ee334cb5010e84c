// ABOUTME: Environment driver that shells out to operator-supplied command templates.
// ABOUTME: Context is passed as PDO_* environment variables; exit codes classify failures.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;

use crate::config::{DriverConfig, resolve_env_map};
use crate::deploy::Variant;
use crate::error::Result;
use crate::types::{ServiceName, TrafficSplit};

use super::{DriverError, EnvironmentDriver, Readiness, Route};

/// sysexits EX_USAGE / EX_DATAERR: the command rejected its input.
const EXIT_USAGE: i32 = 64;
const EXIT_DATAERR: i32 = 65;
/// sysexits EX_TEMPFAIL: try again later.
const EXIT_TEMPFAIL: i32 = 75;

/// Runs each driver operation as `<shell> -c <template>`.
///
/// Exit code 0 is success, 64 or 65 means the variant spec is invalid,
/// 75 means a transient failure, and anything else is permanent.
pub struct CommandDriver {
    config: DriverConfig,
    env: HashMap<String, String>,
}

impl std::fmt::Debug for CommandDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDriver")
            .field("shell", &self.config.shell)
            .finish_non_exhaustive()
    }
}

struct CommandOutput {
    stdout: String,
}

impl CommandDriver {
    /// Build a driver, resolving any `env:` references up front.
    pub fn new(config: DriverConfig) -> Result<Self> {
        let env = resolve_env_map(&config.env)?;
        Ok(Self { config, env })
    }

    async fn run(
        &self,
        operation: &'static str,
        template: &str,
        vars: &[(&'static str, String)],
    ) -> std::result::Result<CommandOutput, DriverError> {
        tracing::debug!(operation, command = template, "running driver command");

        let mut command = Command::new(&self.config.shell);
        command
            .arg("-c")
            .arg(template)
            .envs(&self.env)
            .envs(vars.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.config.command_timeout, command.output()).await
        {
            Err(_) => {
                return Err(DriverError::Transient(format!(
                    "{operation} timed out after {}",
                    humantime::format_duration(self.config.command_timeout)
                )));
            }
            Ok(Err(e)) => {
                return Err(DriverError::Permanent(format!(
                    "failed to spawn {operation} command: {e}"
                )));
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            return Ok(CommandOutput { stdout });
        }

        let detail = if stderr.is_empty() {
            format!("{operation} exited with {}", output.status)
        } else {
            format!("{operation} exited with {}: {stderr}", output.status)
        };
        tracing::debug!(operation, status = ?output.status.code(), "driver command failed");

        Err(match output.status.code() {
            Some(EXIT_USAGE) | Some(EXIT_DATAERR) => DriverError::InvalidSpec(detail),
            Some(EXIT_TEMPFAIL) | None => DriverError::Transient(detail),
            Some(_) => DriverError::Permanent(detail),
        })
    }
}

fn variant_vars(service: &ServiceName, variant: &Variant) -> Vec<(&'static str, String)> {
    let mut vars = vec![
        ("PDO_SERVICE", service.to_string()),
        ("PDO_COLOR", variant.color.to_string()),
        ("PDO_IMAGE_DIGEST", variant.image_digest.digest()),
        ("PDO_IMAGE", variant.image_digest.to_string()),
        ("PDO_REPLICAS", variant.replica_count.to_string()),
    ];
    if let Some(repo) = variant.image_digest.repository() {
        vars.push(("PDO_IMAGE_REPOSITORY", repo.to_string()));
    }
    vars
}

fn route_vars(service: &ServiceName, route: Route) -> Vec<(&'static str, String)> {
    vec![
        ("PDO_SERVICE", service.to_string()),
        ("PDO_STABLE_COLOR", route.stable.to_string()),
        ("PDO_CANDIDATE_COLOR", route.candidate.to_string()),
    ]
}

#[async_trait]
impl EnvironmentDriver for CommandDriver {
    async fn apply(
        &self,
        service: &ServiceName,
        variant: &Variant,
    ) -> std::result::Result<(), DriverError> {
        self.run("apply", &self.config.apply, &variant_vars(service, variant))
            .await
            .map(|_| ())
    }

    async fn wait_ready(
        &self,
        service: &ServiceName,
        variant: &Variant,
        timeout: Duration,
    ) -> std::result::Result<Readiness, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut vars = variant_vars(service, variant);
            vars.push(("PDO_TIMEOUT_SECS", remaining.as_secs().to_string()));

            match self.run("wait_ready", &self.config.wait_ready, &vars).await {
                Ok(_) => return Ok(Readiness::Ready),
                Err(DriverError::Transient(msg)) => {
                    tracing::debug!(color = %variant.color, error = %msg, "variant not ready");
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Readiness::TimedOut);
            }
            let pause = self.config.ready_poll_interval.min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }

    async fn set_traffic_split(
        &self,
        service: &ServiceName,
        route: Route,
        split: TrafficSplit,
    ) -> std::result::Result<(), DriverError> {
        let mut vars = route_vars(service, route);
        vars.push(("PDO_STABLE_WEIGHT", split.stable().to_string()));
        vars.push(("PDO_CANDIDATE_WEIGHT", split.candidate().to_string()));
        self.run("set_traffic", &self.config.set_traffic, &vars)
            .await
            .map(|_| ())
    }

    async fn active_traffic_split(
        &self,
        service: &ServiceName,
        route: Route,
    ) -> std::result::Result<TrafficSplit, DriverError> {
        let output = self
            .run(
                "traffic_status",
                &self.config.traffic_status,
                &route_vars(service, route),
            )
            .await?;
        serde_json::from_str(output.stdout.trim()).map_err(|e| {
            DriverError::Permanent(format!(
                "traffic_status printed unparseable split {:?}: {e}",
                output.stdout.trim()
            ))
        })
    }

    async fn decommission(
        &self,
        service: &ServiceName,
        variant: &Variant,
    ) -> std::result::Result<(), DriverError> {
        self.run(
            "decommission",
            &self.config.decommission,
            &variant_vars(service, variant),
        )
        .await
        .map(|_| ())
    }
}
