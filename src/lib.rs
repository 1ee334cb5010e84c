// ABOUTME: Library root for pdo - exposes the orchestrator and its collaborators.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod deploy;
pub mod driver;
pub mod error;
pub mod http;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod output;
pub mod smoke;
pub mod store;
pub mod types;

pub use orchestrator::Orchestrator;
