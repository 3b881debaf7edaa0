//! Minimal blocking client for the Hetzner Cloud API.
//!
//! Covers what provisioning a single host needs: primary IPs, SSH keys,
//! image lookup and servers. Lookups go through the `name` filter, which
//! the API guarantees to be unique per project, so callers can read
//! before they create.

pub mod client;
pub mod error;
pub mod types;

pub use client::{Client, DEFAULT_API_BASE};
pub use error::{Error, ErrorCategory, Result};
pub use types::{
    CreatePrimaryIp, CreatePublicNet, CreateServer, CreateSshKey, Datacenter, Image, IpType,
    NameRef, PrimaryIp, PublicIp, PublicNet, Server, SshKey, first_address,
};
