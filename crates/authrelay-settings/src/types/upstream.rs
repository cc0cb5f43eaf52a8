//! Identity provider connection settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identity provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// Base URL of the identity provider API.
    pub base_url: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,
    /// Default API key for support-status lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Default `X-Labels` value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<String>,
    /// Default dispatch hints; request hints override per key.
    pub dispatch_hints: BTreeMap<String, String>,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8788/api/idp".to_string(),
            timeout_ms: 10_000,
            user_agent: "authrelay/0.1".to_string(),
            accept_invalid_certs: false,
            api_key: None,
            labels: None,
            dispatch_hints: BTreeMap::new(),
        }
    }
}
