// ABOUTME: Notifier that runs operator scripts from the hooks directory on each transition.
// ABOUTME: Scripts run detached with PDO_* variables; their failures are logged and dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::{Notifier, Severity, TransitionEvent};

/// Hook execution points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    /// Every state transition.
    OnTransition,
    /// A deployment froze and needs an operator.
    OnAlert,
}

impl HookPoint {
    /// Get the hook filename for this point.
    pub fn filename(&self) -> &'static str {
        match self {
            HookPoint::OnTransition => "on-transition",
            HookPoint::OnAlert => "on-alert",
        }
    }

    fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Info => HookPoint::OnTransition,
            Severity::Alert => HookPoint::OnAlert,
        }
    }
}

impl TransitionEvent {
    /// Convert the event to hook environment variables.
    pub fn to_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("PDO_DEPLOYMENT_ID".to_string(), self.deployment_id.to_string());
        env.insert("PDO_SERVICE".to_string(), self.service.to_string());
        env.insert("PDO_FROM".to_string(), self.from.to_string());
        env.insert("PDO_TO".to_string(), self.to.to_string());
        env.insert("PDO_AT".to_string(), self.at.to_rfc3339());
        env.insert(
            "PDO_STABLE_WEIGHT".to_string(),
            self.traffic_split.stable().to_string(),
        );
        env.insert(
            "PDO_CANDIDATE_WEIGHT".to_string(),
            self.traffic_split.candidate().to_string(),
        );
        if let Some(ref cause) = self.cause {
            env.insert("PDO_CAUSE".to_string(), cause.message.clone());
            env.insert(
                "PDO_CAUSE_KIND".to_string(),
                serde_json::to_value(cause.kind)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
            );
        }
        env
    }
}

/// Discovers and runs hooks from a hooks directory.
#[derive(Debug, Clone)]
pub struct HookNotifier {
    hooks_dir: PathBuf,
}

impl HookNotifier {
    pub fn new(hooks_dir: &Path) -> Self {
        Self {
            hooks_dir: hooks_dir.to_path_buf(),
        }
    }

    /// Check if a hook exists for the given point.
    pub fn hook_exists(&self, point: HookPoint) -> bool {
        self.hook_path(point).is_file()
    }

    fn hook_path(&self, point: HookPoint) -> PathBuf {
        self.hooks_dir.join(point.filename())
    }

    /// Run the hook for `point` to completion. Returns whether it succeeded,
    /// or `None` if no hook is installed.
    pub async fn run(&self, point: HookPoint, event: &TransitionEvent) -> Option<bool> {
        let hook_path = self.hook_path(point);
        if !hook_path.is_file() {
            return None;
        }

        tracing::debug!("Running {} hook: {}", point.filename(), hook_path.display());

        let output = Command::new(&hook_path)
            .envs(event.to_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => Some(true),
            Ok(output) => {
                tracing::warn!(
                    "{} hook failed with exit code {:?}: {}",
                    point.filename(),
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                Some(false)
            }
            Err(e) => {
                tracing::warn!("Failed to execute {} hook: {}", point.filename(), e);
                Some(false)
            }
        }
    }
}

impl Notifier for HookNotifier {
    fn notify(&self, event: &TransitionEvent) {
        let point = HookPoint::for_severity(event.severity);
        if !self.hook_exists(point) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime, skipping {} hook", point.filename());
            return;
        };
        let this = self.clone();
        let event = event.clone();
        handle.spawn(async move {
            this.run(point, &event).await;
        });
    }
}
