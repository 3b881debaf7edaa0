//! API payloads.
//!
//! Only the fields this crate needs are modelled; unknown fields are ignored.

use serde::{Deserialize, Serialize};

/// Primary IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpType {
    Ipv4,
    Ipv6,
}

impl IpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ipv4" => Some(Self::Ipv4),
            "ipv6" => Some(Self::Ipv6),
            _ => None,
        }
    }
}

/// A primary IP.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrimaryIp {
    pub id: i64,
    pub name: String,
    /// Address, or network in CIDR notation for IPv6 (`2001:db8::/64`).
    pub ip: String,
    #[serde(rename = "type")]
    pub ip_type: IpType,
    #[serde(default)]
    pub assignee_id: Option<i64>,
    #[serde(default)]
    pub auto_delete: bool,
}

/// Request body for creating a primary IP.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePrimaryIp<'a> {
    pub name: &'a str,
    #[serde(rename = "type")]
    pub ip_type: IpType,
    pub assignee_type: &'a str,
    pub datacenter: &'a str,
    pub auto_delete: bool,
}

/// A public key registered with the project.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SshKey {
    pub id: i64,
    pub name: String,
    pub fingerprint: String,
    #[serde(default)]
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSshKey<'a> {
    pub name: &'a str,
    pub public_key: &'a str,
}

/// An OS or app image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Image {
    pub id: i64,
    /// Unique name; only set for system and app images.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub architecture: String,
}

/// A server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub public_net: PublicNet,
    #[serde(default)]
    pub server_type: Option<NameRef>,
    #[serde(default)]
    pub datacenter: Option<Datacenter>,
}

/// Embedded object of which only the name is used.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NameRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Datacenter {
    pub name: String,
    pub location: NameRef,
}

impl Server {
    /// Server type name, e.g. `cx11`.
    pub fn server_type_name(&self) -> Option<&str> {
        self.server_type.as_ref().map(|t| t.name.as_str())
    }

    /// Location name, e.g. `nbg1`.
    pub fn location_name(&self) -> Option<&str> {
        self.datacenter.as_ref().map(|dc| dc.location.name.as_str())
    }

    /// IPv4 address, if the server has one.
    pub fn ipv4_address(&self) -> Option<&str> {
        self.public_net.ipv4.as_ref().map(|ip| ip.ip.as_str())
    }

    /// First address of the server's IPv6 network.
    ///
    /// The API reports a /64 network; the server answers on its `::1`.
    pub fn ipv6_address(&self) -> Option<String> {
        self.public_net
            .ipv6
            .as_ref()
            .map(|net| first_address(&net.ip))
    }
}

/// `2001:db8:1::/64` -> `2001:db8:1::1`
pub fn first_address(network: &str) -> String {
    let prefix = network.split('/').next().unwrap_or(network);
    if prefix.ends_with("::") {
        format!("{prefix}1")
    } else {
        prefix.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublicNet {
    #[serde(default)]
    pub ipv4: Option<PublicIp>,
    #[serde(default)]
    pub ipv6: Option<PublicIp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublicIp {
    /// Primary IP id; absent on older API responses.
    #[serde(default)]
    pub id: Option<i64>,
    pub ip: String,
}

/// Request body for creating a server.
#[derive(Debug, Clone, Serialize)]
pub struct CreateServer<'a> {
    pub name: &'a str,
    pub server_type: &'a str,
    /// Image id or name.
    pub image: String,
    pub location: &'a str,
    /// Key ids or names.
    pub ssh_keys: Vec<String>,
    pub public_net: CreatePublicNet,
    pub start_after_create: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreatePublicNet {
    pub enable_ipv4: bool,
    pub enable_ipv6: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<i64>,
}

// Response envelopes

#[derive(Debug, Deserialize)]
pub(crate) struct PrimaryIpList {
    pub primary_ips: Vec<PrimaryIp>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PrimaryIpEnvelope {
    pub primary_ip: PrimaryIp,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SshKeyList {
    pub ssh_keys: Vec<SshKey>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SshKeyEnvelope {
    pub ssh_key: SshKey,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImageList {
    pub images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerList {
    pub servers: Vec<Server>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerEnvelope {
    pub server: Server,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ApiError,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub code: String,
    pub message: String,
}
