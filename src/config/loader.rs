use std::path::Path;

use anyhow::{anyhow, Context, Result};
use http::Uri;
use regex::Regex;
use tracing::{debug, error};

use crate::config::credentials::{SecretValue, ServiceConfig};
use crate::config::settings::{LoggingConfig, LOG_LEVELS};

/// Load and validate config from YAML file
pub async fn file_to_config(path: &Path) -> Result<ServiceConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read config '{}'", path.display()))?;

    let expanded = expand_env_vars(&content)?;
    parse_config(&expanded)
}

pub fn parse_config(content: &str) -> Result<ServiceConfig> {
    let mut service_config: ServiceConfig = serde_yaml::from_str(content)
        .inspect_err(|e| error!("parse config error: {}", e))?;

    // Apply defaults
    if service_config.settings.logging.is_none() {
        service_config.settings.logging = Some(LoggingConfig::default());
    }

    debug!("validation config ...");
    validate_service_config(&service_config)
        .map_err(|errors| anyhow!("Invalid config: {}", errors.join("; ")))?;

    Ok(service_config)
}

/// Replaces `${VAR}` and `${VAR:default}` with the environment value or the default.
pub fn expand_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{(\w+)(?::([^\}]+))?\}")?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}

/// Returns Ok(()) or every issue found.
pub fn validate_service_config(cfg: &ServiceConfig) -> Result<(), Vec<String>> {
    let mut errors: Vec<String> = Vec::new();
    let credentials = &cfg.credentials;

    if credentials.client_id.trim().is_empty() {
        errors.push("credentials.client_id must not be empty".to_string());
    }
    match credentials.token_url.parse::<Uri>() {
        Ok(uri) if uri.scheme().is_some() && uri.host().is_some() => {}
        Ok(_) => errors.push(format!(
            "credentials.token_url '{}' must be an absolute URL",
            credentials.token_url
        )),
        Err(e) => errors.push(format!(
            "credentials.token_url '{}' is invalid: {}",
            credentials.token_url, e
        )),
    }
    if credentials.invalid_token_code.as_deref().is_some_and(str::is_empty) {
        errors.push("credentials.invalid_token_code must not be empty".to_string());
    }
    if credentials.renewal_timeout_ms == Some(0) {
        errors.push("credentials.renewal_timeout_ms must be greater than 0".to_string());
    }
    if let SecretValue::FromEnv { from_env } = &credentials.client_secret {
        if from_env.is_empty() {
            errors.push("credentials.client_secret.from_env must name a variable".to_string());
        }
    }

    if let Some(logging) = &cfg.settings.logging {
        if !LOG_LEVELS.contains(&logging.level.to_lowercase().as_str()) {
            errors.push(format!(
                "settings.logging.level '{}' must be one of {:?}",
                logging.level, LOG_LEVELS
            ));
        }
    }
    if cfg.settings.timeout_ms == Some(0) {
        errors.push("settings.timeout_ms must be greater than 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        errors.iter().for_each(|e| error!("{}", e));
        Err(errors)
    }
}
