use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::VaultSettings;
use crate::security::bootstrap::{BootstrapError, SecretSource};

pub const VAULT_ADDR_ENV: &str = "VAULT_ADDR";
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";

/// Development-only fallbacks used when the environment is not configured.
pub const DEFAULT_VAULT_ADDR: &str = "http://vault:8200";
pub const DEFAULT_VAULT_TOKEN: &str = "dev-only-root-token";

/// Vault KV v2 read envelope: `{"data":{"data":{...},"metadata":{...}}}`
#[derive(Debug, Deserialize)]
struct VaultKvResponse {
    #[serde(default)]
    data: VaultKvData,
}

#[derive(Debug, Deserialize, Default)]
struct VaultKvData {
    #[serde(default)]
    data: HashMap<String, serde_json::Value>,
    #[serde(default)]
    metadata: Option<VaultKvMetadata>,
}

#[derive(Debug, Deserialize, Clone)]
struct VaultKvMetadata {
    version: Option<u64>,
}

/// Client for the single KV v2 secret holding the service's signing material.
#[derive(Debug, Clone)]
pub struct VaultClient {
    base_url: String,
    token: String,
    mount: String,
    path: String,
    http_client: Client,
}

impl VaultClient {
    pub fn new(base_url: &str, token: &str, settings: &VaultSettings) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("creating HTTP client")?;

        debug!("Vault client initialized with base_url={}", base_url);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            mount: settings.mount.trim_matches('/').to_string(),
            path: settings.path.trim_matches('/').to_string(),
            http_client,
        })
    }

    /// Create a client from `VAULT_ADDR` / `VAULT_TOKEN`.
    ///
    /// Unset variables fall back to [`DEFAULT_VAULT_ADDR`] / [`DEFAULT_VAULT_TOKEN`]
    /// with a warning, unless `reject_insecure_defaults` is set, in which case
    /// the missing variable is reported as a bootstrap failure.
    pub fn from_env(settings: &VaultSettings) -> std::result::Result<Self, BootstrapError> {
        let base_url = env_or_default(
            VAULT_ADDR_ENV,
            DEFAULT_VAULT_ADDR,
            settings.reject_insecure_defaults,
        )?;
        let token = env_or_default(
            VAULT_TOKEN_ENV,
            DEFAULT_VAULT_TOKEN,
            settings.reject_insecure_defaults,
        )?;

        Self::new(&base_url, &token, settings)
            .map_err(|e| BootstrapError::Client(format!("{e:#}")))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn secret_url(&self) -> String {
        format!("{}/v1/{}/data/{}", self.base_url, self.mount, self.path)
    }

    /// Read the configured secret and flatten it into string values.
    ///
    /// Path: GET {base_url}/v1/{mount}/data/{path}
    pub async fn read_secret(&self) -> Result<HashMap<String, String>> {
        let url = self.secret_url();

        debug!("Fetching secret from Vault: {}", url);

        let response = self
            .http_client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .context("sending Vault request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Vault fetch failed with status {}: {}",
                status,
                body
            ));
        }

        let vault_resp: VaultKvResponse =
            response.json().await.context("parsing Vault response")?;

        if let Some(version) = vault_resp.data.metadata.as_ref().and_then(|m| m.version) {
            debug!(version, "Vault secret version");
        }

        Ok(vault_resp
            .data
            .data
            .into_iter()
            .map(|(k, v)| (k, stringify(v)))
            .collect())
    }
}

#[async_trait]
impl SecretSource for VaultClient {
    async fn fetch(&self) -> Result<HashMap<String, String>> {
        self.read_secret().await
    }

    fn describe(&self) -> String {
        format!("vault at {}", self.base_url)
    }
}

fn env_or_default(
    var: &'static str,
    fallback: &str,
    strict: bool,
) -> std::result::Result<String, BootstrapError> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ if strict => Err(BootstrapError::InsecureDefault(var)),
        _ => {
            warn!(
                variable = var,
                "environment variable not set, using development default (do not deploy like this)"
            );
            Ok(fallback.to_string())
        }
    }
}

fn stringify(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
