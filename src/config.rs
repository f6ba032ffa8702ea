use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Vault KV v2 location and bootstrap retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// KV v2 mount point (e.g. `secret`)
    pub mount: String,
    /// Secret path under the mount
    pub path: String,
    /// Total fetch attempts before startup is aborted
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub retry_delay_secs: u64,
    /// Per-request HTTP timeout against Vault
    pub request_timeout_secs: u64,
    /// Fail instead of falling back to the development address/token
    pub reject_insecure_defaults: bool,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            mount: "secret".to_string(),
            path: "go-authservice".to_string(),
            max_attempts: 5,
            retry_delay_secs: 3,
            request_timeout_secs: 10,
            reject_insecure_defaults: false,
        }
    }
}

impl VaultSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Names of the entries read out of the Vault secret payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretKeys {
    pub signing_key: String,
    pub issuer: String,
    pub audience: String,
    pub connection_string: String,
}

impl Default for SecretKeys {
    fn default() -> Self {
        Self {
            signing_key: "Jwt__Secret".to_string(),
            issuer: "Jwt__Issuer".to_string(),
            audience: "Jwt__Audience".to_string(),
            connection_string: "ConnectionStrings__MongoDb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    /// Clock skew tolerated on `exp` / `nbf`
    pub leeway_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Reported as `service` by the version endpoint
    pub service_name: String,
    pub vault: VaultSettings,
    pub secret_keys: SecretKeys,
    pub token: TokenSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "User Directory Service".to_string(),
            vault: VaultSettings::default(),
            secret_keys: SecretKeys::default(),
            token: TokenSettings::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let cfg: ServiceConfig = serde_json::from_str(&raw).context("parsing config JSON")?;
        if cfg.vault.max_attempts == 0 {
            anyhow::bail!("vault.max_attempts must be at least 1");
        }
        Ok(cfg)
    }

    /// Load from `path` when given, otherwise run on defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    /// `--strict-secrets` can only tighten the file setting, never relax it.
    pub fn apply_strict_secrets(&mut self, strict: bool) {
        if strict {
            self.vault.reject_insecure_defaults = true;
        }
    }
}
