//! Upgrade gatekeeper: validates the session token carried by a
//! connection request before the connection is admitted.

use http::header::{AUTHORIZATION, COOKIE};
use http::HeaderMap;
use murmur_core::{AuthError, Identity, TokenService};
use std::sync::Arc;
use tracing::debug;

/// Token extraction and validation for incoming requests. Pure: no state is
/// touched on success or failure.
pub struct Gatekeeper {
    tokens: Arc<dyn TokenService>,
    cookie_name: String,
}

impl Gatekeeper {
    pub fn new(tokens: Arc<dyn TokenService>, cookie_name: impl Into<String>) -> Self {
        Self {
            tokens,
            cookie_name: cookie_name.into(),
        }
    }

    /// Extract and validate the session token from request headers.
    pub fn admit(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = self.extract_token(headers).ok_or(AuthError::Missing)?;
        let claims = self.tokens.validate(&token)?;
        debug!(username = %claims.username, expires_at = claims.expires_at, "token accepted");
        Ok(claims.into())
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Session cookie first, then `Authorization: Bearer`.
    fn extract_token(&self, headers: &HeaderMap) -> Option<String> {
        let from_cookie = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|header| cookie_value(header, &self.cookie_name));
        if let Some(token) = from_cookie {
            return Some(token.to_string());
        }

        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

/// Find `name` in a `Cookie` header value (`a=1; b=2`). Empty values count
/// as absent.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use murmur_core::{generate_secret, Claims, HmacTokenService};

    fn gatekeeper() -> (Arc<HmacTokenService>, Gatekeeper) {
        let tokens = Arc::new(HmacTokenService::new(&generate_secret().unwrap()));
        let gate = Gatekeeper::new(tokens.clone(), "token");
        (tokens, gate)
    }

    fn headers(name: http::header::HeaderName, value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(name, HeaderValue::from_str(value).unwrap());
        map
    }

    #[test]
    fn cookie_parsing() {
        assert_eq!(cookie_value("token=abc", "token"), Some("abc"));
        assert_eq!(cookie_value("a=1; token=abc; b=2", "token"), Some("abc"));
        assert_eq!(cookie_value("a=1;token = abc ", "token"), Some("abc"));
        assert_eq!(cookie_value("mytoken=abc", "token"), None);
        assert_eq!(cookie_value("token=", "token"), None);
        assert_eq!(cookie_value("garbage", "token"), None);
        assert_eq!(cookie_value("", "token"), None);
    }

    #[test]
    fn admits_valid_cookie() {
        let (tokens, gate) = gatekeeper();
        let token = tokens.issue_for("alice", 60);
        let map = headers(COOKIE, &format!("theme=dark; token={}", token.as_str()));
        assert_eq!(gate.admit(&map).unwrap().username, "alice");
    }

    #[test]
    fn admits_bearer_header() {
        let (tokens, gate) = gatekeeper();
        let token = tokens.issue_for("bob", 60);
        let map = headers(AUTHORIZATION, &format!("Bearer {}", token.as_str()));
        assert_eq!(gate.admit(&map).unwrap().username, "bob");
    }

    #[test]
    fn missing_token() {
        let (_, gate) = gatekeeper();
        assert_eq!(gate.admit(&HeaderMap::new()), Err(AuthError::Missing));
        assert_eq!(
            gate.admit(&headers(COOKIE, "theme=dark")),
            Err(AuthError::Missing)
        );
        assert_eq!(
            gate.admit(&headers(AUTHORIZATION, "Basic Zm9vOmJhcg==")),
            Err(AuthError::Missing)
        );
    }

    #[test]
    fn invalid_token() {
        let (_, gate) = gatekeeper();
        let err = gate.admit(&headers(COOKIE, "token=forged")).unwrap_err();
        assert!(matches!(err, AuthError::Invalid { .. }));
        assert_eq!(err.to_string(), "auth failed");
    }

    #[test]
    fn expired_token() {
        let (tokens, gate) = gatekeeper();
        let token = tokens.issue(&Claims {
            username: "alice".into(),
            expires_at: murmur_core::token::unix_now() - 1,
        });
        let map = headers(COOKIE, &format!("token={}", token.as_str()));
        assert!(matches!(gate.admit(&map), Err(AuthError::Invalid { .. })));
    }
}
