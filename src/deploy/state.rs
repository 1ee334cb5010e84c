// ABOUTME: Rollout lifecycle states.
// ABOUTME: Forward path Pending..Completed plus the RollingBack/RolledBack failure path.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a rollout currently is.
///
/// The forward path is strictly ordered. `RollingBack` is reachable from every
/// non-terminal state; `Completed` and `RolledBack` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Recorded, nothing applied yet.
    Pending,
    /// Candidate variant applied, waiting for replicas to become ready.
    CandidateDeploying,
    /// Candidate ready, running the smoke check against its direct address.
    CandidateHealthChecking,
    /// 10% of traffic on the candidate, soaking.
    Shifting10,
    /// 50% of traffic on the candidate, soaking.
    Shifting50,
    /// All traffic on the candidate, soaking.
    Shifting100,
    /// Decommissioning the former stable variant.
    Finalizing,
    /// Candidate promoted to stable.
    Completed,
    /// Restoring traffic to the stable variant and removing the candidate.
    RollingBack,
    /// Traffic restored, candidate removed.
    RolledBack,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeploymentStatus::Completed | DeploymentStatus::RolledBack)
    }

    /// Any non-terminal state on the forward path.
    pub fn is_forward_progress(self) -> bool {
        !self.is_terminal() && self != DeploymentStatus::RollingBack
    }

    /// Candidate traffic weight a shifting stage applies.
    pub fn target_weight(self) -> Option<u8> {
        match self {
            DeploymentStatus::Shifting10 => Some(10),
            DeploymentStatus::Shifting50 => Some(50),
            DeploymentStatus::Shifting100 => Some(100),
            _ => None,
        }
    }

    /// The next state on the forward path.
    pub fn next_forward(self) -> Option<DeploymentStatus> {
        use DeploymentStatus::*;
        match self {
            Pending => Some(CandidateDeploying),
            CandidateDeploying => Some(CandidateHealthChecking),
            CandidateHealthChecking => Some(Shifting10),
            Shifting10 => Some(Shifting50),
            Shifting50 => Some(Shifting100),
            Shifting100 => Some(Finalizing),
            Finalizing => Some(Completed),
            Completed | RollingBack | RolledBack => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        use DeploymentStatus::*;
        match self {
            Pending => "pending",
            CandidateDeploying => "candidate_deploying",
            CandidateHealthChecking => "candidate_health_checking",
            Shifting10 => "shifting_10",
            Shifting50 => "shifting_50",
            Shifting100 => "shifting_100",
            Finalizing => "finalizing",
            Completed => "completed",
            RollingBack => "rolling_back",
            RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
