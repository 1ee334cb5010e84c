// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Service names, image digests, variant colors, and traffic splits.

mod color;
mod id;
mod image_digest;
mod service_name;
mod traffic;

pub use color::Color;
pub use id::{DeploymentId, Id};
pub use image_digest::{ImageDigest, ParseImageDigestError};
pub use service_name::{ServiceName, ServiceNameError};
pub use traffic::{TrafficSplit, TrafficSplitError};
