// ABOUTME: Content-addressed image digest parsing and validation.
// ABOUTME: Accepts bare digests (sha256:...) and pinned references (registry/name@sha256:...).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseImageDigestError {
    #[error("image digest cannot be empty")]
    Empty,

    #[error("image digest is missing the algorithm prefix (expected e.g. sha256:<hex>)")]
    MissingAlgorithm,

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid {algorithm} digest: expected {expected} hex characters, got {actual}")]
    InvalidLength {
        algorithm: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid character in image digest: {0}")]
    InvalidChar(char),

    #[error("invalid repository in image reference: {0}")]
    InvalidRepository(String),
}

/// An immutable image identity. Rollouts are keyed on digests rather than
/// tags so that "the same image" has exactly one meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDigest {
    repository: Option<String>,
    algorithm: String,
    hex: String,
}

impl ImageDigest {
    pub fn parse(input: &str) -> Result<Self, ParseImageDigestError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageDigestError::Empty);
        }

        // Split off the repository if this is a pinned reference
        let (repository, digest) = match input.rsplit_once('@') {
            Some((repo, digest)) => (Some(Self::parse_repository(repo)?), digest),
            None => (None, input),
        };

        let (algorithm, hex) = digest
            .split_once(':')
            .ok_or(ParseImageDigestError::MissingAlgorithm)?;

        let expected = match algorithm {
            "sha256" => 64,
            "sha512" => 128,
            other => return Err(ParseImageDigestError::UnsupportedAlgorithm(other.to_string())),
        };

        if let Some(c) = hex
            .chars()
            .find(|c| !c.is_ascii_digit() && !('a'..='f').contains(c))
        {
            return Err(ParseImageDigestError::InvalidChar(c));
        }

        if hex.len() != expected {
            return Err(ParseImageDigestError::InvalidLength {
                algorithm: algorithm.to_string(),
                expected,
                actual: hex.len(),
            });
        }

        Ok(Self {
            repository,
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }

    fn parse_repository(repo: &str) -> Result<String, ParseImageDigestError> {
        if repo.is_empty() {
            return Err(ParseImageDigestError::InvalidRepository(repo.to_string()));
        }
        for c in repo.chars() {
            if !c.is_ascii_alphanumeric() && !matches!(c, '/' | ':' | '.' | '-' | '_') {
                return Err(ParseImageDigestError::InvalidChar(c));
            }
        }
        // A tag alongside a digest is ignored by registries, drop it
        let without_tag = match repo.rsplit_once(':') {
            Some((before, after)) if !after.contains('/') => before,
            _ => repo,
        };
        Ok(without_tag.to_string())
    }

    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// The `algorithm:hex` form without any repository.
    pub fn digest(&self) -> String {
        format!("{}:{}", self.algorithm, self.hex)
    }

    /// First 12 hex characters, for human-facing output.
    pub fn short(&self) -> &str {
        &self.hex[..12]
    }

    /// Whether two references point at the same content, ignoring repository.
    pub fn same_content(&self, other: &ImageDigest) -> bool {
        self.algorithm == other.algorithm && self.hex == other.hex
    }
}

impl fmt::Display for ImageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref repo) = self.repository {
            write!(f, "{}@", repo)?;
        }
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl std::str::FromStr for ImageDigest {
    type Err = ParseImageDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ImageDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ImageDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ImageDigest::parse(&s).map_err(serde::de::Error::custom)
    }
}
