//! Blocking API client.

use crate::error::{Error, Result};
use crate::types::{
    CreatePrimaryIp, CreateServer, CreateSshKey, ErrorEnvelope, Image, ImageList, PrimaryIp,
    PrimaryIpEnvelope, PrimaryIpList, Server, ServerEnvelope, ServerList, SshKey, SshKeyEnvelope,
    SshKeyList,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Public API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.hetzner.cloud/v1";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest page the list endpoints return.
const MAX_PER_PAGE: &str = "50";

const USER_AGENT: &str = concat!("stackup-hcloud/", env!("CARGO_PKG_VERSION"));

/// Hetzner Cloud API client.
///
/// # Example
///
/// ```no_run
/// use hcloud::Client;
/// use secrecy::SecretString;
///
/// let client = Client::new(SecretString::from("token".to_string()));
/// let server = client.server_by_name("prod.example.com").unwrap();
/// ```
pub struct Client {
    agent: ureq::Agent,
    api_base: String,
    token: SecretString,
}

impl Client {
    /// Create a client for the public API.
    #[must_use]
    pub fn new(token: SecretString) -> Self {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    /// Create a client with a custom API base (for testing).
    #[must_use]
    pub fn with_api_base(token: SecretString, api_base: impl Into<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the current API base URL.
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.url(path);
        log::debug!("GET {url} {query:?}");

        let mut request = self
            .agent
            .get(&url)
            .header("Authorization", &self.auth())
            .header("User-Agent", USER_AGENT);
        for (key, value) in query {
            request = request.query(*key, *value);
        }
        decode(request.call()?)
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path);
        log::debug!("POST {url}");

        let response = self
            .agent
            .post(&url)
            .header("Authorization", &self.auth())
            .header("User-Agent", USER_AGENT)
            .send_json(body)?;
        decode(response)
    }

    /// Find a primary IP by its unique name.
    pub fn primary_ip_by_name(&self, name: &str) -> Result<Option<PrimaryIp>> {
        let list: PrimaryIpList = self.get("primary_ips", &[("name", name)])?;
        Ok(list.primary_ips.into_iter().find(|ip| ip.name == name))
    }

    pub fn create_primary_ip(&self, request: &CreatePrimaryIp<'_>) -> Result<PrimaryIp> {
        let envelope: PrimaryIpEnvelope = self.post("primary_ips", request)?;
        Ok(envelope.primary_ip)
    }

    /// Find an SSH key by its unique name.
    pub fn ssh_key_by_name(&self, name: &str) -> Result<Option<SshKey>> {
        let list: SshKeyList = self.get("ssh_keys", &[("name", name)])?;
        Ok(list.ssh_keys.into_iter().find(|key| key.name == name))
    }

    /// List the SSH keys matching a label selector, e.g. `team=ops`.
    pub fn ssh_keys_by_selector(&self, selector: &str) -> Result<Vec<SshKey>> {
        let list: SshKeyList = self.get(
            "ssh_keys",
            &[("label_selector", selector), ("per_page", MAX_PER_PAGE)],
        )?;
        log::debug!("{} SSH key(s) match '{selector}'", list.ssh_keys.len());
        Ok(list.ssh_keys)
    }

    pub fn create_ssh_key(&self, request: &CreateSshKey<'_>) -> Result<SshKey> {
        let envelope: SshKeyEnvelope = self.post("ssh_keys", request)?;
        Ok(envelope.ssh_key)
    }

    /// Find an image by name, optionally restricted to one architecture.
    pub fn image_by_name(&self, name: &str, architecture: Option<&str>) -> Result<Option<Image>> {
        let mut query = vec![("name", name)];
        if let Some(arch) = architecture {
            query.push(("architecture", arch));
        }
        let list: ImageList = self.get("images", &query)?;
        Ok(list
            .images
            .into_iter()
            .find(|image| image.name.as_deref() == Some(name)))
    }

    /// Find a server by its unique name.
    pub fn server_by_name(&self, name: &str) -> Result<Option<Server>> {
        let list: ServerList = self.get("servers", &[("name", name)])?;
        Ok(list.servers.into_iter().find(|server| server.name == name))
    }

    /// Create a server; it is returned while still initializing.
    pub fn create_server(&self, request: &CreateServer<'_>) -> Result<Server> {
        let envelope: ServerEnvelope = self.post("servers", request)?;
        Ok(envelope.server)
    }
}

fn decode<T: DeserializeOwned>(mut response: ureq::http::Response<ureq::Body>) -> Result<T> {
    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(response.body_mut().read_json()?);
    }
    let body = response.body_mut().read_to_string().unwrap_or_default();
    Err(api_error(status, &body))
}

/// Build an error from a non-success response body.
pub(crate) fn api_error(status: u16, body: &str) -> Error {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => Error::Api {
            status,
            code: envelope.error.code,
            message: envelope.error.message,
        },
        Err(_) => Error::Api {
            status,
            code: String::new(),
            message: body.trim().chars().take(200).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_url_building() {
        let client = Client::with_api_base(
            SecretString::from("t".to_string()),
            "http://localhost:8080/v1/",
        );
        assert_eq!(client.api_base(), "http://localhost:8080/v1");
        assert_eq!(client.url("servers"), "http://localhost:8080/v1/servers");
    }

    #[test]
    fn test_api_error_from_body() {
        let body = r#"{"error": {"code": "uniqueness_error", "message": "SSH key with the same fingerprint already exists"}}"#;

        let err = api_error(409, body);

        assert_eq!(err.category(), ErrorCategory::Rejected);
        assert!(err.to_string().contains("uniqueness_error"));
    }

    #[test]
    fn test_api_error_from_plain_body() {
        let err = api_error(502, "<html>Bad Gateway</html>");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_create_ssh_key_body() {
        let body = CreateSshKey {
            name: "default",
            public_key: "ssh-rsa AAAA",
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"name":"default","public_key":"ssh-rsa AAAA"}"#);
    }
}
