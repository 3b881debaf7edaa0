//! Stack configuration (`stackup.toml`).
//!
//! String values may contain `{stack}`, replaced by the stack name when
//! the stack is declared. Every section is optional.
//!
//! ```toml
//! stack = "prod"
//!
//! [flags]
//! create_ip = true
//!
//! [server]
//! name = "{stack}.example.com"
//! server_type = "cx11"
//!
//! [[steps]]
//! name = "compose"
//! copy = "docker-compose.{stack}.yml"
//! to = "docker-compose.yml"
//!
//! [[steps]]
//! name = "login"
//! run = ["docker login ghcr.io -u me --password-stdin"]
//! stdin_secret = "github_pat"
//! ```

use anyhow::{Context, Result, bail};
use converge::{ExecuteOptions, ReadinessConfig, ReadinessPolicy, RerunPolicy, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder replaced by the stack name
pub const STACK_PLACEHOLDER: &str = "{stack}";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    /// Stack name; `--stack` overrides it
    #[serde(default = "default_stack")]
    pub stack: String,
    /// Boolean switches, read with [`StackConfig::get_bool`]
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub readiness: ReadinessSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub bootstrap: BootstrapSettings,
    /// Optional TOML file of secrets, relative to the config file
    #[serde(default)]
    pub secrets_file: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,

    /// Directory the config was loaded from; relative paths resolve against it
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_stack() -> String {
    "dev".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// Secret holding the API token
    pub token_secret: String,
    /// Override the API endpoint
    pub api_base: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            token_secret: "hcloud_token".to_string(),
            api_base: None,
        }
    }
}

/// Address family used to reach the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub datacenter: String,
    pub ipv4: bool,
    pub ipv6: bool,
    /// Release the addresses together with the server
    pub auto_delete: bool,
    pub connect_via: AddressFamily,
    /// Primary IP names
    pub ipv4_name: String,
    pub ipv6_name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            datacenter: "nbg1-dc3".to_string(),
            ipv4: true,
            ipv6: true,
            auto_delete: true,
            connect_via: AddressFamily::Ipv6,
            ipv4_name: "{stack}-primary_ip-v4".to_string(),
            ipv6_name: "{stack}-primary_ip-v6".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub name: String,
    pub server_type: String,
    pub location: String,
    pub image: String,
    pub architecture: String,
    /// Keys already registered with the provider, added next to the generated one
    pub extra_ssh_keys: Vec<String>,
    /// Label selector for more registered keys, e.g. `team=ops`
    pub ssh_key_selector: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "{stack}".to_string(),
            server_type: "cx11".to_string(),
            location: "nbg1".to_string(),
            image: "docker-ce".to_string(),
            architecture: "x86".to_string(),
            extra_ssh_keys: Vec::new(),
            ssh_key_selector: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshConfig {
    pub user: String,
    /// Name of the generated key pair and of the registered public key
    pub key_name: String,
    pub key_bits: u32,
    pub connect_timeout: u64,
    /// Share one master connection per host
    pub multiplex: bool,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            key_name: "default".to_string(),
            key_bits: sshkit::DEFAULT_RSA_BITS,
            connect_timeout: 10,
            multiplex: true,
        }
    }
}

/// Readiness gate timings, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadinessSettings {
    pub fresh_timeout: u64,
    /// Zero skips the gate for servers that already existed
    pub settled_timeout: u64,
    pub interval: u64,
    pub max_interval: u64,
    pub backoff_factor: f64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            fresh_timeout: 300,
            settled_timeout: 30,
            interval: 2,
            max_interval: 15,
            backoff_factor: 1.5,
        }
    }
}

impl ReadinessSettings {
    pub fn to_config(&self) -> ReadinessConfig {
        let interval = Duration::from_secs(self.interval);
        ReadinessConfig {
            fresh: ReadinessPolicy {
                timeout: Duration::from_secs(self.fresh_timeout),
                interval,
                backoff_factor: self.backoff_factor,
                max_interval: Duration::from_secs(self.max_interval.max(self.interval)),
            },
            settled: ReadinessPolicy::fixed(Duration::from_secs(self.settled_timeout), interval),
        }
    }
}

/// Provider retry budget, delays in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay: u64,
    pub backoff_factor: f64,
    pub max_delay: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: 2,
            backoff_factor: 2.0,
            max_delay: 30,
        }
    }
}

impl RetrySettings {
    pub fn to_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_secs(self.base_delay),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_secs(self.max_delay),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapSettings {
    pub rerun: RerunPolicy,
    /// Remote marker directory for the checksum policy
    pub marker_dir: Option<String>,
}

/// One bootstrap step
///
/// Exactly one of `copy`, `content` or `run` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    pub name: String,
    /// Local file to copy, relative to the config file
    #[serde(default)]
    pub copy: Option<String>,
    /// Inline file content to copy
    #[serde(default)]
    pub content: Option<String>,
    /// Remote path for `copy` and `content`
    #[serde(default)]
    pub to: Option<String>,
    /// Commands run in order, each must exit 0
    #[serde(default)]
    pub run: Vec<String>,
    /// Secret fed to the commands on stdin
    #[serde(default)]
    pub stdin_secret: Option<String>,
    /// Earlier steps or resource ids
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack: default_stack(),
            flags: BTreeMap::new(),
            provider: ProviderConfig::default(),
            network: NetworkConfig::default(),
            server: ServerConfig::default(),
            ssh: SshConfig::default(),
            readiness: ReadinessSettings::default(),
            retry: RetrySettings::default(),
            bootstrap: BootstrapSettings::default(),
            secrets_file: None,
            steps: Vec::new(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl StackConfig {
    /// Load and validate a stack file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Invalid stack file {}", path.display()))?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        log::debug!("Loaded {} ({} steps)", path.display(), config.steps.len());
        Ok(config)
    }

    /// Parse and validate TOML content
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the stack name
    pub fn with_stack(mut self, stack: Option<String>) -> Self {
        if let Some(stack) = stack {
            self.stack = stack;
        }
        self
    }

    /// Read a boolean flag; absent flags are false
    pub fn get_bool(&self, key: &str) -> bool {
        self.flags.get(key).copied().unwrap_or(false)
    }

    /// Substitute the stack name into a template
    pub fn render(&self, template: &str) -> String {
        template.replace(STACK_PLACEHOLDER, &self.stack)
    }

    /// Resolve a local path against the config directory
    pub fn local_path(&self, path: &str) -> PathBuf {
        let expanded = crate::paths::expand(&self.render(path));
        if expanded.is_absolute() {
            expanded
        } else {
            self.base_dir.join(expanded)
        }
    }

    /// Engine options for an apply
    pub fn execute_options(&self, jobs: usize) -> ExecuteOptions {
        let mut options = ExecuteOptions {
            jobs: jobs.max(1),
            ..ExecuteOptions::default()
        };
        options.reconcile.retry = self.retry.to_config();
        options.reconcile.readiness = self.readiness.to_config();
        options.sequencer.rerun = self.bootstrap.rerun;
        options.sequencer.jobs = options.jobs;
        if let Some(dir) = &self.bootstrap.marker_dir {
            options.sequencer.marker_dir = self.render(dir);
        }
        options
    }

    fn validate(&self) -> Result<()> {
        if self.stack.trim().is_empty() {
            bail!("stack name must not be empty");
        }
        if !self.network.ipv4 && !self.network.ipv6 {
            bail!("at least one of network.ipv4 and network.ipv6 must be enabled");
        }
        let reachable = match self.network.connect_via {
            AddressFamily::Ipv4 => self.network.ipv4,
            AddressFamily::Ipv6 => self.network.ipv6,
        };
        if !reachable {
            bail!(
                "network.connect_via is {:?} but that address family is disabled",
                self.network.connect_via
            );
        }

        for (setting, factor) in [
            ("retry.backoff_factor", self.retry.backoff_factor),
            ("readiness.backoff_factor", self.readiness.backoff_factor),
        ] {
            if !factor.is_finite() || factor < 1.0 {
                bail!("{setting} must be a number of at least 1.0, got {factor}");
            }
        }
        if self
            .server
            .ssh_key_selector
            .as_deref()
            .is_some_and(|selector| selector.trim().is_empty())
        {
            bail!("server.ssh_key_selector must not be empty when set");
        }

        let mut seen = Vec::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                bail!("every step needs a name");
            }
            if let Some(bad) = step.name.chars().find(|c| !is_step_name_char(*c)) {
                bail!(
                    "step name '{}' contains {bad:?}; use letters, digits, '.', '_' and '-'",
                    step.name
                );
            }
            if step.name.starts_with('.') {
                bail!("step name '{}' must not start with '.'", step.name);
            }
            if seen.contains(&step.name.as_str()) {
                bail!("duplicate step name '{}'", step.name);
            }
            seen.push(step.name.as_str());

            let kinds = [step.copy.is_some(), step.content.is_some(), !step.run.is_empty()];
            if kinds.iter().filter(|set| **set).count() != 1 {
                bail!(
                    "step '{}' must set exactly one of copy, content or run",
                    step.name
                );
            }
            if (step.copy.is_some() || step.content.is_some()) && step.to.is_none() {
                bail!("step '{}' copies a file but has no 'to' path", step.name);
            }
            if step.run.is_empty() && step.stdin_secret.is_some() {
                bail!("step '{}' sets stdin_secret but runs no command", step.name);
            }
        }
        Ok(())
    }
}

/// Step names become marker file names on the remote host
fn is_step_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
stack = "prod"

[flags]
create_ip = true

[server]
name = "{stack}.example.com"
extra_ssh_keys = ["ops"]

[readiness]
settled_timeout = 0

[bootstrap]
rerun = "checksum"

[[steps]]
name = "compose"
copy = "docker-compose.{stack}.yml"
to = "docker-compose.yml"

[[steps]]
name = "login"
run = ["docker login ghcr.io -u me --password-stdin"]
stdin_secret = "github_pat"

[[steps]]
name = "install"
run = ["apt-get update", "docker-compose pull"]
depends_on = ["login", "compose"]
"#;

    #[test]
    fn test_parse_sample() {
        let config = StackConfig::parse(SAMPLE).unwrap();

        assert_eq!(config.stack, "prod");
        assert!(config.get_bool("create_ip"));
        assert!(!config.get_bool("unknown_flag"));
        assert_eq!(config.render(&config.server.name), "prod.example.com");
        assert_eq!(config.server.server_type, "cx11");
        assert_eq!(config.steps.len(), 3);
        assert_eq!(config.steps[2].depends_on, vec!["login", "compose"]);
        assert_eq!(config.bootstrap.rerun, RerunPolicy::Checksum);
    }

    #[test]
    fn test_defaults_for_empty_file() {
        let config = StackConfig::parse("").unwrap();

        assert_eq!(config.stack, "dev");
        assert!(config.network.ipv4 && config.network.ipv6);
        assert_eq!(config.network.connect_via, AddressFamily::Ipv6);
        assert_eq!(config.ssh.user, "root");
        assert_eq!(config.provider.token_secret, "hcloud_token");
        assert!(config.steps.is_empty());
    }

    #[test]
    fn test_with_stack_overrides_name() {
        let config = StackConfig::parse(SAMPLE)
            .unwrap()
            .with_stack(Some("staging".to_string()));
        assert_eq!(config.render("{stack}-primary_ip-v4"), "staging-primary_ip-v4");
    }

    #[test]
    fn test_step_must_have_one_operation() {
        let err = StackConfig::parse(
            r#"
[[steps]]
name = "broken"
copy = "a"
run = ["b"]
to = "c"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("exactly one"));

        let err = StackConfig::parse(
            r#"
[[steps]]
name = "nowhere"
content = "x"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no 'to' path"));
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let err = StackConfig::parse(
            r#"
[[steps]]
name = "a"
run = ["true"]

[[steps]]
name = "a"
run = ["false"]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate step"));
    }

    #[test]
    fn test_connect_via_disabled_family_rejected() {
        let err = StackConfig::parse(
            r#"
[network]
ipv6 = false
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("connect_via"));
    }

    #[test]
    fn test_backoff_factor_below_one_rejected() {
        let err = StackConfig::parse("[retry]\nbackoff_factor = -1.0\n").unwrap_err();
        assert!(err.to_string().contains("retry.backoff_factor"));

        let err = StackConfig::parse("[readiness]\nbackoff_factor = 0.5\n").unwrap_err();
        assert!(err.to_string().contains("readiness.backoff_factor"));

        assert!(StackConfig::parse("[retry]\nbackoff_factor = nan\n").is_err());
        assert!(StackConfig::parse("[retry]\nbackoff_factor = 1.0\n").is_ok());
    }

    #[test]
    fn test_step_names_limited_to_file_name_characters() {
        for name in ["it's", "../escape", "a b", " login", ".hidden"] {
            let toml = format!("[[steps]]\nname = {name:?}\nrun = [\"true\"]\n");
            let err = StackConfig::parse(&toml).unwrap_err();
            assert!(err.to_string().contains("step name"), "{name}: {err}");
        }
        let ok = "[[steps]]\nname = \"app-conf_v1.2\"\nrun = [\"true\"]\n";
        assert!(StackConfig::parse(ok).is_ok());
    }

    #[test]
    fn test_empty_key_selector_rejected() {
        let err = StackConfig::parse("[server]\nssh_key_selector = \" \"\n").unwrap_err();
        assert!(err.to_string().contains("ssh_key_selector"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(StackConfig::parse("[server]\nflavour = \"big\"\n").is_err());
    }

    #[test]
    fn test_load_sets_base_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("stackup.toml");
        fs::write(&path, SAMPLE).unwrap();

        let config = StackConfig::load(&path).unwrap();

        assert_eq!(config.base_dir, temp.path());
        assert_eq!(
            config.local_path("docker-compose.{stack}.yml"),
            temp.path().join("docker-compose.prod.yml")
        );
        assert_eq!(config.local_path("/etc/app.conf"), PathBuf::from("/etc/app.conf"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = StackConfig::load(Path::new("/nonexistent/stackup.toml")).unwrap_err();
        assert!(err.to_string().contains("Could not read"));
    }

    #[test]
    fn test_execute_options() {
        let config = StackConfig::parse(SAMPLE).unwrap();

        let options = config.execute_options(4);

        assert_eq!(options.jobs, 4);
        assert_eq!(options.sequencer.jobs, 4);
        assert_eq!(options.sequencer.rerun, RerunPolicy::Checksum);
        assert!(options.reconcile.readiness.settled.timeout.is_zero());
        assert_eq!(
            options.reconcile.readiness.fresh.timeout,
            Duration::from_secs(300)
        );
        assert_eq!(options.reconcile.retry.max_attempts, 5);
    }
}
