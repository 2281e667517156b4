use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::settings::SettingsConfig;
use crate::oauth2::{AuthStyle, ClientCredentials};

/// ================================
/// Full configuration of the binary
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
}

/// ================================
/// Client-credentials grant
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    pub client_id: String,
    pub client_secret: SecretValue,
    pub token_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub endpoint_params: BTreeMap<String, String>,
    #[serde(default)]
    pub auth_style: AuthStyle,
    pub safety_margin_seconds: Option<u64>,
    pub invalid_token_code: Option<String>,
    /// upper bound of one token renewal
    pub renewal_timeout_ms: Option<u64>,
}

/// Secret value sources
#[derive(Deserialize, Clone)]
#[serde(untagged)]
pub enum SecretValue {
    Literal { value: String },
    FromEnv { from_env: String },
    FromFile { path: String },
}

impl SecretValue {
    pub async fn resolve(&self) -> Result<String> {
        match self {
            SecretValue::Literal { value } => Ok(value.to_owned()),
            SecretValue::FromEnv { from_env } => std::env::var(from_env)
                .with_context(|| format!("client_secret: env var '{}' is not set", from_env)),
            SecretValue::FromFile { path } => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("client_secret: cannot read '{}'", path))?;
                Ok(content.trim_end_matches(['\r', '\n']).to_owned())
            }
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretValue::Literal { .. } => f.write_str("Literal([redacted])"),
            SecretValue::FromEnv { from_env } => f.debug_struct("FromEnv").field("from_env", from_env).finish(),
            SecretValue::FromFile { path } => f.debug_struct("FromFile").field("path", path).finish(),
        }
    }
}

impl CredentialsConfig {
    /// Resolves the secret and builds validated grant configuration.
    pub async fn to_client_credentials(&self) -> Result<ClientCredentials> {
        let secret = self.client_secret.resolve().await?;
        let mut builder = ClientCredentials::builder(&self.client_id, secret, &self.token_url)
            .scopes(self.scopes.iter().cloned())
            .auth_style(self.auth_style);
        for (key, value) in &self.endpoint_params {
            builder = builder.endpoint_param(key, value);
        }
        if let Some(seconds) = self.safety_margin_seconds {
            builder = builder.safety_margin_seconds(seconds);
        }
        if let Some(code) = &self.invalid_token_code {
            builder = builder.invalid_token_code(code);
        }
        if let Some(timeout_ms) = self.renewal_timeout_ms {
            builder = builder.renewal_timeout(Duration::from_millis(timeout_ms));
        }
        builder.build().context("credentials")
    }
}
