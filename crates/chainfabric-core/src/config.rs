//! Peer connection configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where and how to reach a peer's event service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Event source URL, e.g. "grpcs://peer0.org1.example.com:7053"
    pub url: String,
    /// PEM file with the CA certificate(s) trusted for this peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_cert: Option<PathBuf>,
    /// TLS server name to verify instead of the URL host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_host_override: Option<String>,
    /// Allow plaintext when the URL carries no scheme and no CA is configured
    #[serde(default)]
    pub allow_insecure: bool,
}

impl PeerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_tls_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_ca_cert = Some(path.into());
        self
    }

    pub fn with_server_host_override(mut self, name: impl Into<String>) -> Self {
        self.server_host_override = Some(name.into());
        self
    }

    pub fn with_allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }

    /// Whether the connection must use TLS.
    ///
    /// `grpcs://` and `https://` always do, `grpc://` and `http://` never do.
    /// A bare `host:port` uses TLS unless a CA is absent and
    /// `allow_insecure` is set.
    pub fn is_secure(&self) -> bool {
        match self.scheme() {
            Some("grpcs") | Some("https") => true,
            Some("grpc") | Some("http") => false,
            _ => self.tls_ca_cert.is_some() || !self.allow_insecure,
        }
    }

    /// URL rewritten to the `http(s)://` form gRPC endpoints expect.
    pub fn endpoint_uri(&self) -> String {
        let rest = match self.url.split_once("://") {
            Some((_, rest)) => rest,
            None => self.url.as_str(),
        };
        let scheme = if self.is_secure() { "https" } else { "http" };
        format!("{scheme}://{rest}")
    }

    /// Host part of the URL, without scheme or port.
    pub fn host(&self) -> &str {
        let rest = match self.url.split_once("://") {
            Some((_, rest)) => rest,
            None => self.url.as_str(),
        };
        let authority = rest.split('/').next().unwrap_or(rest);
        authority.rsplit_once(':').map(|(h, _)| h).unwrap_or(authority)
    }

    fn scheme(&self) -> Option<&str> {
        self.url.split_once("://").map(|(scheme, _)| scheme)
    }
}
