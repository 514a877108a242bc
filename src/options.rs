use serde::{Deserialize, Serialize};

use crate::{DocDbError, Result};

/// Configures transport timeout and the attempt cap.
///
/// Deserializable from configuration files; missing fields keep their
/// defaults.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Per-transfer timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of attempts per call, including the first one.
    /// `1` disables retries.
    pub max_attempt: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_attempt: 1,
        }
    }
}

impl ClientOptions {
    /// Reads `DOCDB_TIMEOUT_MS` and `DOCDB_MAX_ATTEMPT`, keeping defaults for
    /// variables that are unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();
        if let Some(timeout_ms) = lookup_number(&lookup, "DOCDB_TIMEOUT_MS")? {
            options.timeout_ms = timeout_ms;
        }
        if let Some(max_attempt) = lookup_number(&lookup, "DOCDB_MAX_ATTEMPT")? {
            options.max_attempt = usize::try_from(max_attempt).map_err(|_| {
                DocDbError::Config(format!("DOCDB_MAX_ATTEMPT is out of range: {max_attempt}"))
            })?;
        }
        options.validate()?;
        Ok(options)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_attempt == 0 {
            return Err(DocDbError::Config(
                "max_attempt must be a positive integer".to_owned(),
            ));
        }
        Ok(())
    }
}

fn lookup_number(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>> {
    match lookup(name) {
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| DocDbError::Config(format!("{name} must be a positive integer: {err}"))),
        None => Ok(None),
    }
}
