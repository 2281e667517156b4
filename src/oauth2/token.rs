use std::fmt;

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::helpers::time::{expires_at, now};

/// Access token issued by the token endpoint.
#[derive(Clone)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    /// `None` when the endpoint did not say; such tokens are valid until rejected.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn new(access_token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            expires_at: None,
        }
    }

    /// Expires `seconds` from now; a lifetime beyond the representable range never expires.
    pub fn expiring_in(mut self, seconds: i64) -> Self {
        self.expires_at = expires_at(seconds);
        self
    }

    pub fn expiring_after(self, lifetime: Duration) -> Self {
        match i64::try_from(lifetime.as_secs()) {
            Ok(seconds) => self.expiring_in(seconds),
            Err(_) => self,
        }
    }

    /// Usable for at least `safety_margin_seconds` more.
    pub fn is_valid(&self, safety_margin_seconds: u64) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expires_at {
            None => true,
            Some(expires_at) => i64::try_from(safety_margin_seconds)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|margin| now().checked_add_signed(margin))
                .is_some_and(|usable_until| usable_until < expires_at),
        }
    }

    /// Scheme for the `Authorization` header; common lowercase spellings are normalized.
    pub fn scheme(&self) -> &str {
        match self.token_type.to_ascii_lowercase().as_str() {
            "" | "bearer" => "Bearer",
            "mac" => "MAC",
            "basic" => "Basic",
            _ => &self.token_type,
        }
    }

    pub fn authorization(&self) -> String {
        format!("{} {}", self.scheme(), self.access_token)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
