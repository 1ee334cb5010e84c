// ABOUTME: Rollout orchestration: the deployment record, its state machine, and the managers it drives.
// ABOUTME: Exports the controller plus the traffic, health-gate, rollback and lock building blocks.

mod controller;
mod deployment;
mod error;
mod gate;
mod journal;
pub mod lock;
mod retry;
mod rollback;
mod soak;
mod state;
mod traffic;
mod transitions;

pub use controller::{Collaborators, DeploymentController, Signals};
pub use deployment::{Deployment, FailureCause, RollbackProgress, StageOutcome, StageRecord, Variant};
pub use error::{DeployError, DeployErrorKind, LockHolderInfo};
pub use gate::{GateRejection, GateVerdict, HealthGate, HealthSample};
pub use lock::LockInfo;
pub use rollback::RollbackManager;
pub use state::DeploymentStatus;
pub use traffic::{TrafficError, TrafficManager};
