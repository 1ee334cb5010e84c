// ABOUTME: Command module aggregator for the pdo CLI.
// ABOUTME: Re-exports the rollout and record command handlers.

mod connect;
mod records;
mod rollout;

pub use records::{abort, adopt, prune, status};
pub use rollout::{deploy, resume, retry_rollback};
