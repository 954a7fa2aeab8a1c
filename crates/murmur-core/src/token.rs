//! HMAC session tokens for murmur.
//!
//! A token binds a username to an expiry time and is signed with a server
//! secret. Text format: `hex(username) "." expiry "." hex(HMAC-SHA256)`,
//! where the MAC covers everything before the last dot. The format is
//! cookie-safe (no `;`, `,`, `=` or whitespace).

use crate::error::{AuthError, RelayError, RelayResult};
use ring::hmac;
use std::fmt;

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub username: String,
    /// Unix seconds after which the token is rejected.
    pub expires_at: u64,
}

impl Claims {
    pub fn expiring_in(username: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            username: username.into(),
            expires_at: unix_now().saturating_add(ttl_secs),
        }
    }
}

/// Identity bound to a connection once its token has been validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            username: claims.username,
        }
    }
}

/// Opaque bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

/// Issues and validates session tokens.
pub trait TokenService: Send + Sync {
    fn issue(&self, claims: &Claims) -> SessionToken;

    fn validate(&self, token: &str) -> Result<Claims, AuthError>;

    /// Issue a token for `username` valid for `ttl_secs` from now.
    fn issue_for(&self, username: &str, ttl_secs: u64) -> SessionToken {
        self.issue(&Claims::expiring_in(username, ttl_secs))
    }
}

/// HMAC-SHA256 token service keyed by a server secret.
pub struct HmacTokenService {
    key: hmac::Key,
}

impl HmacTokenService {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }
}

impl fmt::Debug for HmacTokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacTokenService").finish_non_exhaustive()
    }
}

impl TokenService for HmacTokenService {
    fn issue(&self, claims: &Claims) -> SessionToken {
        let signed = format!("{}.{}", hex::encode(&claims.username), claims.expires_at);
        let tag = hmac::sign(&self.key, signed.as_bytes());
        SessionToken(format!("{signed}.{}", hex::encode(tag.as_ref())))
    }

    fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let (signed, tag_hex) = token
            .rsplit_once('.')
            .ok_or_else(|| AuthError::invalid("malformed token"))?;
        let (user_hex, expiry) = signed
            .split_once('.')
            .ok_or_else(|| AuthError::invalid("malformed token"))?;

        let tag = hex::decode(tag_hex).map_err(|_| AuthError::invalid("malformed signature"))?;
        hmac::verify(&self.key, signed.as_bytes(), &tag)
            .map_err(|_| AuthError::invalid("invalid token signature"))?;

        let expires_at: u64 = expiry
            .parse()
            .map_err(|_| AuthError::invalid("malformed expiry"))?;
        if unix_now() >= expires_at {
            return Err(AuthError::invalid("token expired"));
        }

        let username = hex::decode(user_hex)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| AuthError::invalid("malformed username"))?;
        if username.is_empty() {
            return Err(AuthError::invalid("empty username"));
        }

        Ok(Claims {
            username,
            expires_at,
        })
    }
}

/// Generate a random server secret (32 bytes).
pub fn generate_secret() -> RelayResult<Vec<u8>> {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    let mut secret = vec![0u8; 32];
    rng.fill(&mut secret)
        .map_err(|_| RelayError::Other("system RNG unavailable".into()))?;
    Ok(secret)
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
