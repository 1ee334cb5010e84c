// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Smoke check lists accept short strings or detailed maps and must be non-empty.

use nonempty::NonEmpty;
use serde::Deserialize;

use super::SmokeAssertion;

pub fn deserialize_checks<'de, D>(deserializer: D) -> Result<NonEmpty<SmokeAssertion>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values: Vec<CheckEntry> = Vec::deserialize(deserializer)?;
    let checks = values
        .into_iter()
        .map(|entry| entry.into_assertion())
        .collect::<Result<Vec<_>, _>>()
        .map_err(serde::de::Error::custom)?;

    NonEmpty::from_vec(checks)
        .ok_or_else(|| serde::de::Error::custom("at least one smoke check is required"))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CheckEntry {
    Simple(String),
    Detailed(SmokeAssertion),
}

impl CheckEntry {
    fn into_assertion(self) -> Result<SmokeAssertion, String> {
        match self {
            CheckEntry::Simple(s) => SmokeAssertion::parse(&s),
            CheckEntry::Detailed(c) => Ok(c),
        }
    }
}
