// ABOUTME: Settings for the shell-command environment driver.
// ABOUTME: Each lifecycle operation is a command template run with PDO_* variables set.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::EnvValue;

#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    /// Materialize a variant (e.g. `kubectl apply`). Must be idempotent.
    pub apply: String,

    /// Exits 0 once every replica of the variant is ready, or 75 while it is
    /// still starting; polled until the ready timeout. Any other failure ends the wait.
    pub wait_ready: String,

    /// Route traffic between the two colors.
    pub set_traffic: String,

    /// Print the active split as JSON: `{"stable": 90, "candidate": 10}`.
    pub traffic_status: String,

    /// Tear a variant down. Must succeed when the variant is already gone.
    pub decommission: String,

    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,

    #[serde(default = "default_ready_poll_interval", with = "humantime_serde")]
    pub ready_poll_interval: Duration,

    #[serde(default)]
    pub env: HashMap<String, EnvValue>,
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_ready_poll_interval() -> Duration {
    Duration::from_secs(5)
}

impl DriverConfig {
    pub fn template() -> Self {
        Self {
            apply: "kubectl apply -f deploy/$PDO_SERVICE-$PDO_COLOR.yaml".to_string(),
            wait_ready: "kubectl rollout status deployment/$PDO_SERVICE-$PDO_COLOR --timeout=5s || exit 75"
                .to_string(),
            set_traffic: "./scripts/set-weights.sh".to_string(),
            traffic_status: "./scripts/get-weights.sh".to_string(),
            decommission: "kubectl delete deployment/$PDO_SERVICE-$PDO_COLOR --ignore-not-found"
                .to_string(),
            shell: default_shell(),
            command_timeout: default_command_timeout(),
            ready_poll_interval: default_ready_poll_interval(),
            env: HashMap::new(),
        }
    }
}
