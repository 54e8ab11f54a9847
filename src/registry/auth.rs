//! Authentication types for Docker registry access
//!
//! A registry that wants credentials answers 401 with a `WWW-Authenticate`
//! header. [`AuthChallenge::parse`] turns that header into a typed value;
//! [`TokenResponse`] and [`BearerToken`] model the token service's answer.

use crate::error::{RegistryError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Lifetime assumed when the token service omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 60;

/// A token is retired this long before its real expiry.
const EXPIRY_LEEWAY_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthScheme {
    Bearer,
    Basic,
}

/// Parsed `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthChallenge {
    pub scheme: AuthScheme,
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl AuthChallenge {
    /// Parse `Bearer realm="...",service="...",scope="..."` or `Basic realm="..."`.
    ///
    /// Quoted values may contain commas (`scope="repository:app:pull,push"`).
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        let (scheme_str, params_str) = match header.find(char::is_whitespace) {
            Some(pos) => (&header[..pos], header[pos..].trim()),
            None => (header, ""),
        };

        let scheme = match scheme_str.to_ascii_lowercase().as_str() {
            "bearer" => AuthScheme::Bearer,
            "basic" => AuthScheme::Basic,
            other => {
                return Err(RegistryError::Auth(format!(
                    "unsupported authentication scheme '{}'",
                    other
                )));
            }
        };

        let params = parse_params(params_str);
        let realm = params.get("realm").cloned().unwrap_or_default();

        if scheme == AuthScheme::Bearer && realm.is_empty() {
            return Err(RegistryError::Auth(format!(
                "bearer challenge without realm: {}",
                header
            )));
        }

        Ok(Self {
            scheme,
            realm,
            service: params.get("service").cloned().filter(|s| !s.is_empty()),
            scope: params.get("scope").cloned().filter(|s| !s.is_empty()),
        })
    }

    /// Identity of the token this challenge asks for.
    pub fn token_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.realm,
            self.service.as_deref().unwrap_or_default(),
            self.scope.as_deref().unwrap_or_default()
        )
    }
}

fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let key: String = chars
            .by_ref()
            .take_while(|c| *c != '=')
            .collect::<String>()
            .trim()
            .to_ascii_lowercase();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        params.insert(key, value);
    }

    params
}

/// Token service answer. Registries use either `token` or `access_token`.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub issued_at: Option<String>,
}

impl TokenResponse {
    pub fn into_bearer_token(self, now: DateTime<Utc>) -> Result<BearerToken> {
        let token = self
            .token
            .or(self.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::Auth("token response carried no token".to_string()))?;

        let issued_at = self
            .issued_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);
        let lifetime = self
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        Ok(BearerToken {
            token,
            issued_at,
            expires_at: issued_at + ChronoDuration::seconds(lifetime),
        })
    }
}

/// Issued access token. Replaced when it expires, never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BearerToken {
    /// True while the token can still be sent. Short-lived tokens give up
    /// half their lifetime as leeway instead of the full default.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        let lifetime = (self.expires_at - self.issued_at).num_seconds();
        let leeway = EXPIRY_LEEWAY_SECS.min(lifetime / 2);
        now < self.expires_at - ChronoDuration::seconds(leeway)
    }

    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerToken")
            .field("token", &"***")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
