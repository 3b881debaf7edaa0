//! Local paths used by stackup.
//!
//! The only local state is the generated SSH key pair, the known hosts
//! file and the ssh control sockets. They all live in the state directory:
//!
//! 1. `STACKUP_STATE_DIR` env var
//! 2. `$XDG_STATE_HOME/stackup`
//! 3. `~/.local/state/stackup`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable overriding the state directory
pub const ENV_STATE_DIR: &str = "STACKUP_STATE_DIR";

/// Default stack file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "stackup.toml";

/// Get the state directory
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = expand(&xdg_state).join("stackup");
        log::debug!("Using XDG state dir: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("stackup");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Directory holding generated key pairs
pub fn keys_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("keys"))
}

/// Directory for ssh control sockets
pub fn control_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("ssh"))
}

/// Known hosts file used for provisioned hosts
///
/// Kept apart from `~/.ssh/known_hosts` so a recreated server with a
/// reused address does not trip over a stale host key there.
pub fn known_hosts() -> Result<PathBuf> {
    Ok(state_dir()?.join("known_hosts"))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
