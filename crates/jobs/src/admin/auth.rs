// HTTP Basic authentication for the monitoring router
// Decision: One shared credential pair, checked on every route

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;

/// Realm advertised in `WWW-Authenticate`
pub const REALM: &str = "queues";

/// Username and password accepted by the monitoring router
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Default for Credentials {
    /// Insecure `admin`/`admin`; override in every deployment
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn matches(&self, username: &str, password: &str) -> bool {
        // Evaluate both comparisons regardless of the first result
        let user_ok = constant_time_eq(self.username.as_bytes(), username.as_bytes());
        let pass_ok = constant_time_eq(self.password.as_bytes(), password.as_bytes());
        user_ok & pass_ok
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Decode `Authorization: Basic <base64(user:pass)>`
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?.trim();
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn unauthorized() -> Response {
    let mut response = (StatusCode::UNAUTHORIZED, "Authentication required").into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"queues\""),
    );
    response
}

/// Reject requests without valid Basic credentials
pub async fn basic_auth(
    State(credentials): State<Arc<Credentials>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match basic_credentials(req.headers()) {
        Some((username, password)) if credentials.matches(&username, &password) => {
            next.run(req).await
        }
        Some((username, _)) => {
            tracing::warn!(username = %username, "Rejected monitoring credentials");
            unauthorized()
        }
        None => unauthorized(),
    }
}
