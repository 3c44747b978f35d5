//! Credential tuples, store keys, and the authorization headers built from them.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue, PROXY_AUTHORIZATION};
use url::Url;

use super::ChallengeKind;

/// A username/password pair.
///
/// The password is redacted in Debug output to prevent accidental logging.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Credential {
    username: String,
    password: String,
}

impl Credential {
    /// Creates a credential.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password (sensitive, never log).
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

// Custom Debug impl that redacts the password.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Identifies stored credentials: protocol, host, port, and realm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    /// URL scheme (`http` or `https`).
    pub protocol: String,
    /// Host name.
    pub host: String,
    /// Port, explicit or the scheme default.
    pub port: u16,
    /// Authentication realm.
    pub realm: String,
}

impl CredentialKey {
    /// Creates a key for `realm` on the host addressed by `url`.
    ///
    /// Returns `None` for URLs without a host.
    #[must_use]
    pub fn for_url(url: &Url, realm: impl Into<String>) -> Option<Self> {
        Some(Self {
            protocol: url.scheme().to_string(),
            host: url.host_str()?.to_ascii_lowercase(),
            port: url.port_or_known_default()?,
            realm: realm.into(),
        })
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{} realm={}",
            self.protocol, self.host, self.port, self.realm
        )
    }
}

/// A ready-to-send `Authorization` or `Proxy-Authorization` header.
#[derive(Clone)]
pub struct AuthorizationHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl AuthorizationHeader {
    /// Builds a `Basic` authorization header for `credential`.
    ///
    /// Returns `None` if the encoded value is not a valid header value.
    #[must_use]
    pub fn basic(kind: ChallengeKind, credential: &Credential) -> Option<Self> {
        let token = STANDARD.encode(format!(
            "{}:{}",
            credential.username(),
            credential.password()
        ));
        let mut value = HeaderValue::from_str(&format!("Basic {token}")).ok()?;
        value.set_sensitive(true);
        let name = match kind {
            ChallengeKind::Server => AUTHORIZATION,
            ChallengeKind::Proxy => PROXY_AUTHORIZATION,
        };
        Some(Self { name, value })
    }

    /// Header name.
    #[must_use]
    pub fn name(&self) -> &HeaderName {
        &self.name
    }

    /// Header value.
    #[must_use]
    pub fn value(&self) -> &HeaderValue {
        &self.value
    }
}

impl fmt::Debug for AuthorizationHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationHeader")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}
