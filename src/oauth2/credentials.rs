use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use http::Uri;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Default sentinel carried by a resource server's 401 body when the token is no longer valid.
pub const INVALID_ACCESS_TOKEN: &str = "invalid_access_token";

pub const SAFETY_MARGIN_SECONDS_DEFAULT: u64 = 10;

/// Upper bound of one renewal round, waiters or not.
pub const RENEWAL_TIMEOUT_DEFAULT: Duration = Duration::from_secs(30);

/// How the client authenticates against the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStyle {
    /// HTTP Basic with url-encoded client id and secret.
    #[default]
    Header,
    /// `client_id` and `client_secret` form parameters.
    Params,
}

/// Immutable client-credentials grant configuration.
#[derive(Clone)]
pub struct ClientCredentials {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) token_url: Uri,
    pub(crate) scopes: Vec<String>,
    pub(crate) endpoint_params: BTreeMap<String, String>,
    pub(crate) auth_style: AuthStyle,
    pub(crate) safety_margin_seconds: u64,
    pub(crate) invalid_token_code: String,
    pub(crate) renewal_timeout: Duration,
}

impl ClientCredentials {
    pub fn builder(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl AsRef<str>,
    ) -> ClientCredentialsBuilder {
        ClientCredentialsBuilder {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.as_ref().to_owned(),
            scopes: Vec::new(),
            endpoint_params: BTreeMap::new(),
            auth_style: AuthStyle::default(),
            safety_margin_seconds: SAFETY_MARGIN_SECONDS_DEFAULT,
            invalid_token_code: INVALID_ACCESS_TOKEN.to_owned(),
            renewal_timeout: RENEWAL_TIMEOUT_DEFAULT,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn token_url(&self) -> &Uri {
        &self.token_url
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn auth_style(&self) -> AuthStyle {
        self.auth_style
    }

    pub fn safety_margin_seconds(&self) -> u64 {
        self.safety_margin_seconds
    }

    pub fn invalid_token_code(&self) -> &str {
        &self.invalid_token_code
    }

    pub fn renewal_timeout(&self) -> Duration {
        self.renewal_timeout
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .field("endpoint_params", &self.endpoint_params.keys().collect::<Vec<_>>())
            .field("auth_style", &self.auth_style)
            .field("safety_margin_seconds", &self.safety_margin_seconds)
            .field("invalid_token_code", &self.invalid_token_code)
            .field("renewal_timeout", &self.renewal_timeout)
            .finish()
    }
}

#[derive(Clone)]
pub struct ClientCredentialsBuilder {
    client_id: String,
    client_secret: String,
    token_url: String,
    scopes: Vec<String>,
    endpoint_params: BTreeMap<String, String>,
    auth_style: AuthStyle,
    safety_margin_seconds: u64,
    invalid_token_code: String,
    renewal_timeout: Duration,
}

impl ClientCredentialsBuilder {
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    #[must_use]
    pub fn scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Extra form parameter sent with every grant request (e.g. `audience`).
    #[must_use]
    pub fn endpoint_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.endpoint_params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn auth_style(mut self, auth_style: AuthStyle) -> Self {
        self.auth_style = auth_style;
        self
    }

    /// Seconds before expiry at which a cached token stops being used.
    #[must_use]
    pub fn safety_margin_seconds(mut self, seconds: u64) -> Self {
        self.safety_margin_seconds = seconds;
        self
    }

    #[must_use]
    pub fn invalid_token_code(mut self, code: impl Into<String>) -> Self {
        self.invalid_token_code = code.into();
        self
    }

    /// Longest a renewal may take before it counts as failed and the next
    /// rejected request starts a new one.
    #[must_use]
    pub fn renewal_timeout(mut self, timeout: Duration) -> Self {
        self.renewal_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ClientCredentials> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("client_id must not be empty".into()));
        }
        let token_url: Uri = self
            .token_url
            .parse()
            .map_err(|e| Error::Config(format!("invalid token url '{}': {e}", self.token_url)))?;
        if token_url.scheme().is_none() || token_url.host().is_none() {
            return Err(Error::Config(format!(
                "token url '{}' must be absolute",
                self.token_url
            )));
        }
        if self.invalid_token_code.is_empty() {
            return Err(Error::Config("invalid_token_code must not be empty".into()));
        }
        if self.renewal_timeout.is_zero() {
            return Err(Error::Config("renewal_timeout must be greater than 0".into()));
        }

        Ok(ClientCredentials {
            client_id: self.client_id,
            client_secret: self.client_secret,
            token_url,
            scopes: self.scopes,
            endpoint_params: self.endpoint_params,
            auth_style: self.auth_style,
            safety_margin_seconds: self.safety_margin_seconds,
            invalid_token_code: self.invalid_token_code,
            renewal_timeout: self.renewal_timeout,
        })
    }
}
