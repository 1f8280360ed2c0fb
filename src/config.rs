use camino::Utf8PathBuf;

use crate::api::RetryPolicy;

pub const DEFAULT_HOSTNAME: &str = "https://registeredpreventad.loris.ca";
pub const DEFAULT_API_VERSION: &str = "/api/v0.0.3-dev";

/// Login credentials. Held only for the duration of the authentication call
/// and never persisted.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Bearer token returned by the login endpoint. Obtained once per run and
/// treated as valid until the process exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Immutable per-run settings, constructed once in the binary and passed by
/// reference into every component.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub hostname: String,
    pub api_version: String,
    pub output_root: Utf8PathBuf,
    pub retry: RetryPolicy,
}

impl RunContext {
    pub fn new(output_root: Utf8PathBuf) -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            output_root,
            retry: RetryPolicy::unbounded(),
        }
    }

    /// Base URL every API request string is appended to.
    pub fn api_base(&self) -> String {
        format!("{}{}", self.hostname, self.api_version)
    }
}
