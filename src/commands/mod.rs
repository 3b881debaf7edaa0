pub mod apply;
pub mod plan;

use anyhow::{Context as _, Result};
use hcloud::Client;
use sshkit::{KeyStore, SshClient, SshOptions};
use std::fs;
use std::time::Duration;

use crate::Context;
use crate::config::StackConfig;
use crate::paths;
use crate::provider::StackProvider;
use crate::secrets::Secrets;
use crate::stack::{self, Stack};
use crate::transport::SshTransport;

/// Everything a command needs, loaded before any side effect
pub struct Loaded {
    pub config: StackConfig,
    pub secrets: Secrets,
    pub stack: Stack,
}

/// Load the stack file and secrets, then declare the stack
pub fn load(ctx: &Context) -> Result<Loaded> {
    let config = StackConfig::load(&ctx.config)?.with_stack(ctx.stack.clone());
    let secrets = match &config.secrets_file {
        Some(file) => Secrets::load(&config.local_path(file))?,
        None => Secrets::from_env(),
    };
    let stack = stack::declare(&config, &secrets)?;
    Ok(Loaded {
        config,
        secrets,
        stack,
    })
}

/// Provider for the configured API and the local key store
pub fn provider(config: &StackConfig, secrets: &Secrets) -> Result<StackProvider> {
    let token = secrets.require_secret(&config.provider.token_secret)?;
    let client = match &config.provider.api_base {
        Some(base) => Client::with_api_base(token, base.as_str()),
        None => Client::new(token),
    };
    let keys = KeyStore::new(paths::keys_dir()?).with_bits(config.ssh.key_bits);
    log::debug!("Using {} with keys in {}", client.api_base(), keys.dir().display());
    Ok(StackProvider::new(client, keys))
}

/// SSH transport with stackup's own known hosts file
pub fn transport(config: &StackConfig) -> Result<SshTransport> {
    let state = paths::state_dir()?;
    create_private_dir(&state)?;

    let control_dir = if config.ssh.multiplex {
        let dir = paths::control_dir()?;
        create_private_dir(&dir)?;
        Some(dir)
    } else {
        None
    };

    let options = SshOptions {
        connect_timeout: Duration::from_secs(config.ssh.connect_timeout),
        known_hosts: Some(paths::known_hosts()?),
        control_dir,
        ..SshOptions::default()
    };
    Ok(SshTransport::new(SshClient::new(options)))
}

fn create_private_dir(dir: &std::path::Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Could not create {}", dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Could not restrict {}", dir.display()))?;
    }
    Ok(())
}
