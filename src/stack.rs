//! The fixed resource graph and the bootstrap steps of a stack.
//!
//! ```text
//! primary_ip-v4 ─┐
//! primary_ip-v6 ─┤
//! image ─────────┼─> server ─> connection ─> steps
//! keypair ─> ssh_key ─┤            ^
//!    │       extra keys ┤          │
//!    │    selected keys ┘          │
//!    └─────────────────────────────┘
//! ```
//!
//! Declaring a stack reads local files and secrets but performs no
//! provider or remote call.

use crate::config::{AddressFamily, StackConfig, StepConfig};
use crate::provider::attr;
use crate::secrets::Secrets;
use anyhow::{Context, Result};
use converge::{BootstrapStep, Kind, ResourceSpec, ResourceStore, Value};
use std::fs;

/// Resource ids of a declared stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackIds {
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub key_pair: String,
    pub ssh_key: String,
    pub image: String,
    pub server: String,
    pub connection: String,
}

impl StackIds {
    fn new(config: &StackConfig) -> Self {
        let id = |suffix: &str| format!("{}-{suffix}", config.stack);
        Self {
            ipv4: config.network.ipv4.then(|| id("primary_ip-v4")),
            ipv6: config.network.ipv6.then(|| id("primary_ip-v6")),
            key_pair: id("keypair"),
            ssh_key: id("ssh_key"),
            image: id("image"),
            server: id("server"),
            connection: id("connection"),
        }
    }
}

/// Declared resources and steps, ready to plan
#[derive(Debug)]
pub struct Stack {
    pub name: String,
    pub ids: StackIds,
    pub store: ResourceStore,
    pub steps: Vec<BootstrapStep>,
}

/// Declare the resources and steps of a stack
///
/// Fails with `MissingSecret` when a step needs a secret that is not
/// available, before anything is planned or contacted.
pub fn declare(config: &StackConfig, secrets: &Secrets) -> Result<Stack> {
    let ids = StackIds::new(config);
    let specs = resources(config, &ids);
    let store = ResourceStore::from_specs(specs)?;

    let steps = config
        .steps
        .iter()
        .map(|step| declare_step(config, secrets, &ids, step))
        .collect::<Result<Vec<_>>>()?;

    log::debug!(
        "Declared stack '{}': {} resources, {} steps",
        config.stack,
        store.len(),
        steps.len()
    );
    Ok(Stack {
        name: config.stack.clone(),
        ids,
        store,
        steps,
    })
}

fn resources(config: &StackConfig, ids: &StackIds) -> Vec<ResourceSpec> {
    let network = &config.network;
    let server = &config.server;
    let create_ip = config.get_bool("create_ip");
    let mut specs = Vec::new();

    let families = [
        (&ids.ipv4, "ipv4", &network.ipv4_name),
        (&ids.ipv6, "ipv6", &network.ipv6_name),
    ];
    for (id, family, name) in families {
        let Some(id) = id else { continue };
        let spec = if create_ip {
            ResourceSpec::create(Kind::IpAddress, id.as_str())
                .with(attr::TYPE, family)
                .with(attr::DATACENTER, network.datacenter.as_str())
                .with(attr::AUTO_DELETE, network.auto_delete)
        } else {
            ResourceSpec::lookup(Kind::IpAddress, id.as_str())
        };
        specs.push(spec.named(config.render(name)));
    }

    let key_name = config.render(&config.ssh.key_name);
    specs.push(ResourceSpec::create(Kind::KeyPair, ids.key_pair.as_str()).named(&key_name));
    specs.push(
        ResourceSpec::create(Kind::SshKey, ids.ssh_key.as_str())
            .named(&key_name)
            .with(attr::PUBLIC_KEY, Value::reference(&ids.key_pair, attr::PUBLIC_KEY)),
    );

    let mut ssh_keys = vec![Value::reference(&ids.ssh_key, attr::NAME)];
    for extra in &server.extra_ssh_keys {
        let name = config.render(extra);
        let id = format!("{}-ssh_key-{name}", config.stack);
        ssh_keys.push(Value::reference(&id, attr::NAME));
        specs.push(ResourceSpec::lookup(Kind::SshKey, id).named(name));
    }
    if let Some(selector) = &server.ssh_key_selector {
        let selector = config.render(selector);
        let id = format!("{}-ssh_keys-selected", config.stack);
        ssh_keys.push(Value::reference(&id, attr::NAMES));
        specs.push(
            ResourceSpec::lookup(Kind::SshKey, id)
                .named(selector.as_str())
                .with(attr::LABEL_SELECTOR, selector.as_str()),
        );
    }

    specs.push(
        ResourceSpec::lookup(Kind::Image, ids.image.as_str())
            .named(config.render(&server.image))
            .with(attr::ARCHITECTURE, config.render(&server.architecture)),
    );

    let mut server_spec = ResourceSpec::create(Kind::Server, ids.server.as_str())
        .named(config.render(&server.name))
        .with(attr::SERVER_TYPE, config.render(&server.server_type))
        .with(attr::LOCATION, config.render(&server.location))
        .with(attr::IMAGE, Value::reference(&ids.image, attr::ID))
        .with(attr::SSH_KEYS, Value::List(ssh_keys))
        .with(attr::ENABLE_IPV4, network.ipv4)
        .with(attr::ENABLE_IPV6, network.ipv6);
    if let Some(id) = &ids.ipv4 {
        server_spec = server_spec.with(attr::IPV4, Value::reference(id, attr::ID));
    }
    if let Some(id) = &ids.ipv6 {
        server_spec = server_spec.with(attr::IPV6, Value::reference(id, attr::ID));
    }
    specs.push(server_spec);

    let host = match network.connect_via {
        AddressFamily::Ipv4 => attr::IPV4_ADDRESS,
        AddressFamily::Ipv6 => attr::IPV6_ADDRESS,
    };
    specs.push(
        ResourceSpec::create(Kind::Connection, ids.connection.as_str())
            .with("host", Value::reference(&ids.server, host))
            .with("user", config.ssh.user.as_str())
            .with(
                "private_key",
                Value::reference(&ids.key_pair, attr::PRIVATE_KEY_PATH),
            ),
    );

    specs
}

fn declare_step(
    config: &StackConfig,
    secrets: &Secrets,
    ids: &StackIds,
    step: &StepConfig,
) -> Result<BootstrapStep> {
    let connection = ids.connection.as_str();
    let declared = if let Some(source) = &step.copy {
        let path = config.local_path(source);
        let content = fs::read(&path).with_context(|| {
            format!("Step '{}': could not read {}", step.name, path.display())
        })?;
        BootstrapStep::copy_file(
            &step.name,
            connection,
            path.display().to_string(),
            content,
            remote_path(config, step),
        )
    } else if let Some(content) = &step.content {
        BootstrapStep::copy_file(
            &step.name,
            connection,
            "inline",
            config.render(content).into_bytes(),
            remote_path(config, step),
        )
    } else {
        let commands = step.run.iter().map(|command| config.render(command));
        let run = BootstrapStep::run(&step.name, connection, commands);
        match &step.stdin_secret {
            Some(key) => run.with_stdin_secret(secrets.require_secret(key)?),
            None => run,
        }
    };

    Ok(declared.after(step.depends_on.iter().map(|dep| config.render(dep))))
}

fn remote_path(config: &StackConfig, step: &StepConfig) -> String {
    config.render(step.to.as_deref().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::tests::without_env_var;
    use converge::{Mode, NodeId, RemoteOperation, build_plan};
    use tempfile::TempDir;

    fn config(extra: &str) -> StackConfig {
        StackConfig::parse(&format!("stack = \"prod\"\n{extra}")).unwrap()
    }

    #[test]
    fn test_create_ip_declares_primary_ips() {
        let config = config("[flags]\ncreate_ip = true\n");
        let stack = declare(&config, &Secrets::from_env()).unwrap();

        let ip = stack.store.spec("prod-primary_ip-v6").unwrap();
        assert_eq!(ip.mode, Mode::Create);
        assert_eq!(ip.name, "prod-primary_ip-v6");
        assert_eq!(ip.desired[attr::TYPE], Value::from("ipv6"));
        assert_eq!(ip.desired[attr::DATACENTER], Value::from("nbg1-dc3"));
    }

    #[test]
    fn test_without_create_ip_addresses_are_looked_up() {
        let config = config("");
        let stack = declare(&config, &Secrets::from_env()).unwrap();

        for id in ["prod-primary_ip-v4", "prod-primary_ip-v6"] {
            let ip = stack.store.spec(id).unwrap();
            assert_eq!(ip.mode, Mode::Lookup);
            assert!(ip.desired.is_empty());
        }
    }

    #[test]
    fn test_server_references_its_dependencies() {
        let config = config("[server]\nname = \"{stack}.example.com\"\nextra_ssh_keys = [\"ops\"]\n");
        let stack = declare(&config, &Secrets::from_env()).unwrap();

        let server = stack.store.spec("prod-server").unwrap();
        assert_eq!(server.name, "prod.example.com");
        assert_eq!(
            server.dependencies(),
            vec![
                "prod-image",
                "prod-primary_ip-v4",
                "prod-primary_ip-v6",
                "prod-ssh_key",
                "prod-ssh_key-ops",
            ]
        );
        assert_eq!(
            stack.store.spec("prod-ssh_key-ops").unwrap().mode,
            Mode::Lookup
        );

        let connection = stack.store.spec("prod-connection").unwrap();
        assert_eq!(
            connection.desired["host"],
            Value::reference("prod-server", attr::IPV6_ADDRESS)
        );
        assert_eq!(connection.desired["user"], Value::from("root"));
    }

    #[test]
    fn test_key_selector_declares_lookup() {
        let config = config("[server]\nssh_key_selector = \"team=ops\"\n");
        let stack = declare(&config, &Secrets::from_env()).unwrap();

        let selected = stack.store.spec("prod-ssh_keys-selected").unwrap();
        assert_eq!(selected.mode, Mode::Lookup);
        assert_eq!(selected.kind, Kind::SshKey);
        assert_eq!(selected.desired[attr::LABEL_SELECTOR], Value::from("team=ops"));

        let server = stack.store.spec("prod-server").unwrap();
        assert!(server.dependencies().contains(&"prod-ssh_keys-selected"));
        let keys = server.desired[attr::SSH_KEYS].as_list().unwrap();
        assert_eq!(
            keys.last(),
            Some(&Value::reference("prod-ssh_keys-selected", attr::NAMES))
        );
    }

    #[test]
    fn test_ipv4_only_stack() {
        let config = config("[network]\nipv6 = false\nconnect_via = \"ipv4\"\n");
        let stack = declare(&config, &Secrets::from_env()).unwrap();

        assert!(stack.ids.ipv6.is_none());
        assert!(!stack.store.contains("prod-primary_ip-v6"));
        let server = stack.store.spec("prod-server").unwrap();
        assert!(!server.desired.contains_key(attr::IPV6));
        assert_eq!(server.desired[attr::ENABLE_IPV6], Value::Bool(false));
    }

    #[test]
    fn test_steps_follow_the_connection() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("docker-compose.prod.yml"), "services: {}\n").unwrap();
        let path = temp.path().join("stackup.toml");
        fs::write(
            &path,
            r#"
stack = "prod"

[[steps]]
name = "compose"
copy = "docker-compose.{stack}.yml"
to = "docker-compose.yml"

[[steps]]
name = "app-conf"
content = "server_name {stack}.example.com;"
to = "user_conf.d/app.conf"

[[steps]]
name = "install"
run = ["apt-get update", "docker-compose pull"]
depends_on = ["compose", "app-conf"]
"#,
        )
        .unwrap();
        let config = StackConfig::load(&path).unwrap();

        let stack = declare(&config, &Secrets::from_env()).unwrap();
        let plan = build_plan(&stack.store, &stack.steps).unwrap();

        let RemoteOperation::CopyFile { content, .. } = &stack.steps[1].operation else {
            panic!("expected a copy step");
        };
        assert_eq!(content, b"server_name prod.example.com;");

        let connection = plan
            .index_of(&NodeId::Resource("prod-connection".into()))
            .unwrap();
        let install = plan.index_of(&NodeId::Step("install".into())).unwrap();
        let compose = plan.index_of(&NodeId::Step("compose".into())).unwrap();
        assert!(connection < compose && compose < install);
    }

    #[test]
    fn test_missing_copy_source() {
        let config = config("[[steps]]\nname = \"compose\"\ncopy = \"absent.yml\"\nto = \"x.yml\"\n");
        let err = declare(&config, &Secrets::from_env()).unwrap_err();
        assert!(err.to_string().contains("could not read"));
    }

    #[test]
    fn test_missing_secret_aborts_declaration() {
        let config = config(
            "[[steps]]\nname = \"login\"\nrun = [\"docker login --password-stdin\"]\nstdin_secret = \"stack_test_pat\"\n",
        );

        let err = without_env_var("STACKUP_SECRET_STACK_TEST_PAT", || {
            declare(&config, &Secrets::from_env()).unwrap_err()
        });

        let engine = err.downcast_ref::<converge::Error>().unwrap();
        assert!(matches!(engine, converge::Error::MissingSecret(key) if key == "stack_test_pat"));
    }
}
