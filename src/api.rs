use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, ETAG, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::{Credentials, RunContext, SessionToken};
use crate::error::MirrorError;

/// How many times a request may be reissued after a transport-level failure.
///
/// The production default is `Unbounded`: the server is known to drop
/// connections transiently without signaling, and the run would rather wait
/// than fail a multi-hour download over a blip. HTTP error statuses are never
/// retried under any policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    Unbounded,
    Bounded(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub limit: RetryLimit,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self {
            limit: RetryLimit::Unbounded,
            delay: Duration::ZERO,
        }
    }

    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            limit: RetryLimit::Bounded(max_attempts),
            delay,
        }
    }

    fn allows_attempt(&self, attempts_made: u32) -> bool {
        match self.limit {
            RetryLimit::Unbounded => true,
            RetryLimit::Bounded(max_attempts) => attempts_made < max_attempts,
        }
    }
}

/// Fully buffered response to one logical GET. `etag` carries the server's
/// cache-validation token when one was sent.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub body: Vec<u8>,
}

/// One logical connection to the API. Every request string is relative to the
/// versioned API base (e.g. `/candidates/1200000/V1/images`).
pub trait ApiSession {
    /// Issues a GET, retrying transport-level failures per the session's
    /// retry policy. A response whose status is in `expected` is returned
    /// as-is; any other status is a final `ServerStatus` error, never retried.
    fn get(
        &self,
        request: &str,
        headers: &[(&str, &str)],
        expected: &[u16],
    ) -> Result<ApiResponse, MirrorError>;

    fn get_json<T: DeserializeOwned>(&self, request: &str) -> Result<T, MirrorError> {
        let response = self.get(request, &[], &[200])?;
        serde_json::from_slice(&response.body).map_err(|err| MirrorError::ApiResponseParse {
            context: request.to_string(),
            message: err.to_string(),
        })
    }
}

/// HTTP-backed session. Each instance owns its own `reqwest` client, so
/// connection reuse is scoped to the worker holding it.
pub struct HttpSession {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpSession {
    pub fn connect(ctx: &RunContext, token: &SessionToken) -> Result<Self, MirrorError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("loris-mirror/{}", env!("CARGO_PKG_VERSION")))
                .map_err(MirrorError::filesystem)?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
                .map_err(|err| MirrorError::Authentication(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| MirrorError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            base_url: ctx.api_base(),
            retry: ctx.retry,
        })
    }

    fn attempt(&self, url: &str, headers: &[(&str, &str)]) -> Result<ApiResponse, reqwest::Error> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send()?;
        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes()?.to_vec();
        Ok(ApiResponse { status, etag, body })
    }
}

impl ApiSession for HttpSession {
    fn get(
        &self,
        request: &str,
        headers: &[(&str, &str)],
        expected: &[u16],
    ) -> Result<ApiResponse, MirrorError> {
        let url = format!("{}{}", self.base_url, request);
        let mut attempts_made = 0u32;
        loop {
            attempts_made += 1;
            match self.attempt(&url, headers) {
                Ok(response) => {
                    if expected.contains(&response.status) {
                        debug!(request, status = response.status, "request completed");
                        return Ok(response);
                    }
                    return Err(MirrorError::ServerStatus {
                        status: response.status,
                        context: request.to_string(),
                    });
                }
                Err(err) => {
                    if !self.retry.allows_attempt(attempts_made) {
                        return Err(MirrorError::Transport(err.to_string()));
                    }
                    warn!(request, error = %err, "connection error, retrying");
                    if !self.retry.delay.is_zero() {
                        thread::sleep(self.retry.delay);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Obtains the bearer token for the run. Unlike the download path, login is
/// never retried: a transport error or any non-200 status aborts the run.
pub fn login(ctx: &RunContext, credentials: &Credentials) -> Result<SessionToken, MirrorError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|err| MirrorError::Authentication(err.to_string()))?;

    let response = client
        .post(format!("{}/login", ctx.api_base()))
        .json(&serde_json::json!({
            "username": credentials.username,
            "password": credentials.password,
        }))
        .send()
        .map_err(|err| MirrorError::Authentication(err.to_string()))?;

    let status = response.status().as_u16();
    if status != 200 {
        return Err(MirrorError::Authentication(format!(
            "login returned status {status}, check your credentials"
        )));
    }

    let body: LoginResponse = response
        .json()
        .map_err(|err| MirrorError::Authentication(format!("malformed login response: {err}")))?;
    Ok(SessionToken::new(body.token))
}

/// Login plus per-worker session creation. Every call to `connect` yields a
/// fresh session with its own connection handle, so parallel candidate jobs
/// never share one.
pub trait Connector {
    type Session: ApiSession;

    fn login(&self, credentials: &Credentials) -> Result<SessionToken, MirrorError>;
    fn connect(&self, token: &SessionToken) -> Result<Self::Session, MirrorError>;
}

pub struct HttpConnector {
    ctx: RunContext,
}

impl HttpConnector {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }
}

impl Connector for HttpConnector {
    type Session = HttpSession;

    fn login(&self, credentials: &Credentials) -> Result<SessionToken, MirrorError> {
        login(&self.ctx, credentials)
    }

    fn connect(&self, token: &SessionToken) -> Result<Self::Session, MirrorError> {
        HttpSession::connect(&self.ctx, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_policy_always_allows_another_attempt() {
        let policy = RetryPolicy::unbounded();
        assert!(policy.allows_attempt(0));
        assert!(policy.allows_attempt(1_000_000));
    }

    #[test]
    fn bounded_policy_stops_at_max_attempts() {
        let policy = RetryPolicy::bounded(3, Duration::ZERO);
        assert!(policy.allows_attempt(1));
        assert!(policy.allows_attempt(2));
        assert!(!policy.allows_attempt(3));
    }
}
