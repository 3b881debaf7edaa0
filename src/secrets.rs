//! Secret lookup.
//!
//! A secret `key` is read from `STACKUP_SECRET_<KEY>` first (upper-cased,
//! `-` and `.` become `_`), then from the optional secrets file, a flat
//! TOML table of strings. Values are wrapped in [`SecretString`] as soon
//! as they are read.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Prefix of secret environment variables
pub const ENV_SECRET_PREFIX: &str = "STACKUP_SECRET_";

#[derive(Default)]
pub struct Secrets {
    file: BTreeMap<String, SecretString>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("file_keys", &self.file.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Secrets {
    /// Secrets from the environment only
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Load a secrets file; a missing file is an error
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read secrets file {}", path.display()))?;
        let table: BTreeMap<String, String> = toml::from_str(&content)
            .with_context(|| format!("Invalid secrets file {}", path.display()))?;
        log::debug!("Loaded {} secret(s) from {}", table.len(), path.display());
        Ok(Self {
            file: table
                .into_iter()
                .map(|(key, value)| (key, SecretString::from(value)))
                .collect(),
        })
    }

    /// Environment variable name for a secret key
    pub fn env_var(key: &str) -> String {
        let suffix: String = key
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("{ENV_SECRET_PREFIX}{suffix}")
    }

    /// Look up a secret
    pub fn get(&self, key: &str) -> Option<SecretString> {
        let var = Self::env_var(key);
        if let Ok(value) = std::env::var(&var)
            && !value.is_empty()
        {
            log::debug!("Secret '{key}' from {var}");
            return Some(SecretString::from(value));
        }
        self.file.get(key).cloned()
    }

    /// Look up a secret that must be present
    pub fn require_secret(&self, key: &str) -> converge::Result<SecretString> {
        self.get(key)
            .ok_or_else(|| converge::Error::MissingSecret(key.to_string()))
    }
}
