//! Provider backed by the Hetzner Cloud API and the local key store.
//!
//! Key pairs are generated locally; everything else goes to the API.
//! Attribute names produced here are what the stack declaration refers to.

use converge::{Attributes, Kind, Provider, ProviderError, Value};
use hcloud::{
    Client, CreatePrimaryIp, CreatePublicNet, CreateServer, CreateSshKey, Image, IpType,
    PrimaryIp, Server, SshKey,
};
use sshkit::{KeyPair, KeyStore};

/// Attribute keys shared with the stack declaration
pub mod attr {
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const IP: &str = "ip";
    pub const TYPE: &str = "type";
    pub const DATACENTER: &str = "datacenter";
    pub const AUTO_DELETE: &str = "auto_delete";
    pub const PUBLIC_KEY: &str = "public_key";
    pub const PRIVATE_KEY_PATH: &str = "private_key_path";
    pub const FINGERPRINT: &str = "fingerprint";
    pub const ARCHITECTURE: &str = "architecture";
    pub const SERVER_TYPE: &str = "server_type";
    pub const LOCATION: &str = "location";
    pub const IMAGE: &str = "image";
    pub const SSH_KEYS: &str = "ssh_keys";
    pub const IPV4: &str = "ipv4";
    pub const IPV6: &str = "ipv6";
    pub const ENABLE_IPV4: &str = "enable_ipv4";
    pub const ENABLE_IPV6: &str = "enable_ipv6";
    pub const STATUS: &str = "status";
    pub const IPV4_ADDRESS: &str = "ipv4_address";
    pub const IPV6_ADDRESS: &str = "ipv6_address";
    pub const LABEL_SELECTOR: &str = "label_selector";
    pub const NAMES: &str = "names";
}

pub struct StackProvider {
    client: Client,
    keys: KeyStore,
}

impl StackProvider {
    pub fn new(client: Client, keys: KeyStore) -> Self {
        Self { client, keys }
    }

    fn create_primary_ip(&self, name: &str, desired: &Attributes) -> Result<Attributes, ProviderError> {
        let ip_type = desired
            .get(attr::TYPE)
            .and_then(Value::as_str)
            .and_then(IpType::parse)
            .ok_or_else(|| ProviderError::rejected("ip address needs type 'ipv4' or 'ipv6'"))?;
        let datacenter = required_str(desired, attr::DATACENTER)?;
        let request = CreatePrimaryIp {
            name,
            ip_type,
            assignee_type: "server",
            datacenter,
            auto_delete: desired
                .get(attr::AUTO_DELETE)
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };
        let ip = self.client.create_primary_ip(&request).map_err(api_error)?;
        Ok(primary_ip_attributes(&ip))
    }

    fn create_ssh_key(&self, name: &str, desired: &Attributes) -> Result<Attributes, ProviderError> {
        let public_key = required_str(desired, attr::PUBLIC_KEY)?;
        let key = self
            .client
            .create_ssh_key(&CreateSshKey { name, public_key })
            .map_err(api_error)?;
        Ok(ssh_key_attributes(&key))
    }

    fn create_server(&self, name: &str, desired: &Attributes) -> Result<Attributes, ProviderError> {
        let image = match desired.get(attr::IMAGE) {
            Some(Value::Int(id)) => id.to_string(),
            Some(Value::Str(name)) => name.clone(),
            _ => return Err(ProviderError::rejected("server needs an image")),
        };
        let mut ssh_keys = Vec::new();
        if let Some(keys) = desired.get(attr::SSH_KEYS) {
            collect_key_names(keys, &mut ssh_keys);
        }
        let ipv4 = desired.get(attr::IPV4).and_then(Value::as_int);
        let ipv6 = desired.get(attr::IPV6).and_then(Value::as_int);
        let flag = |key: &str, fallback: bool| {
            desired.get(key).and_then(Value::as_bool).unwrap_or(fallback)
        };

        let request = CreateServer {
            name,
            server_type: required_str(desired, attr::SERVER_TYPE)?,
            image,
            location: required_str(desired, attr::LOCATION)?,
            ssh_keys,
            public_net: CreatePublicNet {
                enable_ipv4: flag(attr::ENABLE_IPV4, ipv4.is_some()),
                enable_ipv6: flag(attr::ENABLE_IPV6, ipv6.is_some()),
                ipv4,
                ipv6,
            },
            start_after_create: true,
        };
        let server = self.client.create_server(&request).map_err(api_error)?;
        Ok(server_attributes(&server))
    }
}

impl Provider for StackProvider {
    fn read_by_name(
        &self,
        kind: Kind,
        name: &str,
        hints: &Attributes,
    ) -> Result<Option<Attributes>, ProviderError> {
        match kind {
            Kind::IpAddress => Ok(self
                .client
                .primary_ip_by_name(name)
                .map_err(api_error)?
                .as_ref()
                .map(primary_ip_attributes)),
            Kind::SshKey if hints.contains_key(attr::LABEL_SELECTOR) => {
                let selector = required_str(hints, attr::LABEL_SELECTOR)?;
                let keys = self
                    .client
                    .ssh_keys_by_selector(selector)
                    .map_err(api_error)?;
                Ok(Some(selected_keys_attributes(selector, &keys)))
            }
            Kind::SshKey => Ok(self
                .client
                .ssh_key_by_name(name)
                .map_err(api_error)?
                .as_ref()
                .map(ssh_key_attributes)),
            Kind::KeyPair => Ok(self
                .keys
                .load(name)
                .map_err(key_error)?
                .as_ref()
                .map(key_pair_attributes)),
            Kind::Image => {
                let arch = hints.get(attr::ARCHITECTURE).and_then(Value::as_str);
                Ok(self
                    .client
                    .image_by_name(name, arch)
                    .map_err(api_error)?
                    .as_ref()
                    .map(image_attributes))
            }
            Kind::Server => Ok(self
                .client
                .server_by_name(name)
                .map_err(api_error)?
                .as_ref()
                .map(server_attributes)),
            Kind::Connection => Err(derived_kind(kind)),
        }
    }

    fn create(
        &self,
        kind: Kind,
        name: &str,
        attributes: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        match kind {
            Kind::IpAddress => self.create_primary_ip(name, attributes),
            Kind::SshKey => self.create_ssh_key(name, attributes),
            Kind::KeyPair => {
                let pair = self.keys.generate(name).map_err(key_error)?;
                Ok(key_pair_attributes(&pair))
            }
            Kind::Server => self.create_server(name, attributes),
            Kind::Image => Err(ProviderError::rejected(format!(
                "image '{name}' cannot be created; declare it as a lookup"
            ))),
            Kind::Connection => Err(derived_kind(kind)),
        }
    }
}

/// Key names from a list that may nest the names of a selector lookup
fn collect_key_names(value: &Value, names: &mut Vec<String>) {
    match value {
        Value::List(items) => {
            for item in items {
                collect_key_names(item, names);
            }
        }
        other => {
            let name = other.to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
}

/// `ssh-ed25519 AAAA... user@host` -> `ssh-ed25519 AAAA...`
///
/// The comment is not part of the key, and the API may not keep it.
fn key_material(public_key: &str) -> String {
    public_key
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}

fn required_str<'a>(attributes: &'a Attributes, key: &str) -> Result<&'a str, ProviderError> {
    attributes
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::rejected(format!("missing attribute '{key}'")))
}

fn derived_kind(kind: Kind) -> ProviderError {
    ProviderError::rejected(format!("{kind} resources are not managed by the provider"))
}

fn api_error(err: hcloud::Error) -> ProviderError {
    let message = format!("{err} ({})", err.category().advice());
    if err.is_retryable() {
        ProviderError::transient(message)
    } else {
        ProviderError::rejected(message)
    }
}

fn key_error(err: sshkit::Error) -> ProviderError {
    let message = format!("{err} ({})", err.category().advice());
    ProviderError::rejected(message)
}

fn primary_ip_attributes(ip: &PrimaryIp) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(attr::ID.into(), Value::Int(ip.id));
    attrs.insert(attr::NAME.into(), Value::Str(ip.name.clone()));
    attrs.insert(attr::IP.into(), Value::Str(ip.ip.clone()));
    attrs.insert(attr::TYPE.into(), Value::Str(ip.ip_type.as_str().to_string()));
    attrs.insert(attr::AUTO_DELETE.into(), Value::Bool(ip.auto_delete));
    attrs
}

fn ssh_key_attributes(key: &SshKey) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(attr::ID.into(), Value::Int(key.id));
    attrs.insert(attr::NAME.into(), Value::Str(key.name.clone()));
    attrs.insert(attr::FINGERPRINT.into(), Value::Str(key.fingerprint.clone()));
    if !key.public_key.is_empty() {
        attrs.insert(attr::PUBLIC_KEY.into(), Value::Str(key_material(&key.public_key)));
    }
    attrs
}

fn selected_keys_attributes(selector: &str, keys: &[SshKey]) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(attr::LABEL_SELECTOR.into(), Value::from(selector));
    attrs.insert(
        attr::NAMES.into(),
        Value::List(keys.iter().map(|k| Value::Str(k.name.clone())).collect()),
    );
    attrs
}

fn key_pair_attributes(pair: &KeyPair) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(attr::NAME.into(), Value::Str(pair.name.clone()));
    attrs.insert(
        attr::PRIVATE_KEY_PATH.into(),
        Value::Str(pair.private_key.display().to_string()),
    );
    attrs.insert(attr::PUBLIC_KEY.into(), Value::Str(key_material(&pair.public_key)));
    attrs
}

fn image_attributes(image: &Image) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(attr::ID.into(), Value::Int(image.id));
    if let Some(name) = &image.name {
        attrs.insert(attr::NAME.into(), Value::Str(name.clone()));
    }
    attrs.insert(attr::ARCHITECTURE.into(), Value::Str(image.architecture.clone()));
    attrs
}

fn server_attributes(server: &Server) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(attr::ID.into(), Value::Int(server.id));
    attrs.insert(attr::NAME.into(), Value::Str(server.name.clone()));
    attrs.insert(attr::STATUS.into(), Value::Str(server.status.clone()));
    if let Some(server_type) = server.server_type_name() {
        attrs.insert(attr::SERVER_TYPE.into(), Value::from(server_type));
    }
    if let Some(location) = server.location_name() {
        attrs.insert(attr::LOCATION.into(), Value::from(location));
    }
    if let Some(ip) = server.ipv4_address() {
        attrs.insert(attr::IPV4_ADDRESS.into(), Value::Str(ip.to_string()));
    }
    if let Some(ip) = server.ipv6_address() {
        attrs.insert(attr::IPV6_ADDRESS.into(), Value::Str(ip));
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcloud::{Datacenter, NameRef, PublicIp, PublicNet};
    use std::fs;
    use tempfile::TempDir;

    fn offline_provider(keys: &TempDir) -> StackProvider {
        // Port 9 (discard) refuses connections; tests below never reach the API
        let client = Client::with_api_base(
            secrecy::SecretString::from("t".to_string()),
            "http://127.0.0.1:9/v1",
        );
        StackProvider::new(client, KeyStore::new(keys.path()))
    }

    #[test]
    fn test_server_attributes() {
        let server = Server {
            id: 42,
            name: "prod.example.com".into(),
            status: "initializing".into(),
            public_net: PublicNet {
                ipv4: Some(PublicIp {
                    id: Some(7),
                    ip: "203.0.113.10".into(),
                }),
                ipv6: Some(PublicIp {
                    id: Some(8),
                    ip: "2001:db8:1::/64".into(),
                }),
            },
            server_type: Some(NameRef {
                name: "cx11".into(),
            }),
            datacenter: Some(Datacenter {
                name: "nbg1-dc3".into(),
                location: NameRef {
                    name: "nbg1".into(),
                },
            }),
        };

        let attrs = server_attributes(&server);

        assert_eq!(attrs[attr::ID], Value::Int(42));
        assert_eq!(attrs[attr::SERVER_TYPE], Value::from("cx11"));
        assert_eq!(attrs[attr::LOCATION], Value::from("nbg1"));
        assert_eq!(attrs[attr::IPV4_ADDRESS], Value::from("203.0.113.10"));
        assert_eq!(attrs[attr::IPV6_ADDRESS], Value::from("2001:db8:1::1"));
    }

    #[test]
    fn test_registered_key_compares_without_comment() {
        let registered = SshKey {
            id: 5,
            name: "default".into(),
            fingerprint: "b7:2f:30".into(),
            public_key: "ssh-rsa AAAA me@laptop\n".into(),
        };
        let pair = KeyPair {
            name: "default".into(),
            private_key: "/state/keys/default".into(),
            public_key: "ssh-rsa AAAA default".into(),
        };

        assert_eq!(
            ssh_key_attributes(&registered)[attr::PUBLIC_KEY],
            key_pair_attributes(&pair)[attr::PUBLIC_KEY]
        );
    }

    #[test]
    fn test_selected_keys_feed_server_key_list() {
        let keys = [
            SshKey {
                id: 11,
                name: "alice".into(),
                fingerprint: "b7:2f:30".into(),
                public_key: String::new(),
            },
            SshKey {
                id: 12,
                name: "bob".into(),
                fingerprint: "0e:11:9a".into(),
                public_key: String::new(),
            },
        ];
        let selected = selected_keys_attributes("team=ops", &keys);
        assert!(!selected.contains_key(attr::PUBLIC_KEY));

        let declared = Value::List(vec![
            Value::from("default"),
            selected[attr::NAMES].clone(),
            Value::from("alice"),
        ]);
        let mut names = Vec::new();
        collect_key_names(&declared, &mut names);

        assert_eq!(names, ["default", "alice", "bob"]);
    }

    #[test]
    fn test_api_errors_classified() {
        let busy = hcloud::Error::Api {
            status: 503,
            code: "unavailable".into(),
            message: "try later".into(),
        };
        let invalid = hcloud::Error::Api {
            status: 422,
            code: "invalid_input".into(),
            message: "bad server_type".into(),
        };

        assert!(api_error(busy).is_retryable());
        let rejected = api_error(invalid);
        assert!(!rejected.is_retryable());
        assert!(rejected.message.contains("bad server_type"));
    }

    #[test]
    fn test_key_pair_read_from_store() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("default"), "PRIVATE").unwrap();
        fs::write(temp.path().join("default.pub"), "ssh-rsa AAAA default\n").unwrap();
        let provider = offline_provider(&temp);

        let attrs = provider
            .read_by_name(Kind::KeyPair, "default", &Attributes::new())
            .unwrap()
            .unwrap();

        assert_eq!(attrs[attr::PUBLIC_KEY], Value::from("ssh-rsa AAAA"));
        assert_eq!(
            attrs[attr::PRIVATE_KEY_PATH],
            Value::Str(temp.path().join("default").display().to_string())
        );
        assert!(
            provider
                .read_by_name(Kind::KeyPair, "other", &Attributes::new())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_images_and_connections_are_not_created() {
        let temp = TempDir::new().unwrap();
        let provider = offline_provider(&temp);

        let image = provider
            .create(Kind::Image, "docker-ce", &Attributes::new())
            .unwrap_err();
        let connection = provider
            .create(Kind::Connection, "ssh", &Attributes::new())
            .unwrap_err();

        assert!(!image.is_retryable());
        assert!(!connection.is_retryable());
    }

    #[test]
    fn test_create_requires_attributes() {
        let temp = TempDir::new().unwrap();
        let provider = offline_provider(&temp);

        let err = provider
            .create(Kind::IpAddress, "prod-primary_ip-v4", &Attributes::new())
            .unwrap_err();
        assert!(err.message.contains("type"));

        let mut server = Attributes::new();
        server.insert(attr::IMAGE.into(), Value::Int(1));
        let err = provider.create(Kind::Server, "prod", &server).unwrap_err();
        assert!(err.message.contains("server_type"));
    }
}
