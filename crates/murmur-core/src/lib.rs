//! murmur-core: Shared protocol library for the murmur relay.
//!
//! Provides the JSON envelope types, the text codec, HMAC session tokens,
//! and the error taxonomy shared by the server and its tests.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod token;

// Re-export commonly used items at crate root.
pub use codec::{decode_envelope, encode};
pub use envelope::{Envelope, EnvelopeKind, Notice};
pub use error::{AuthError, RelayError, RelayResult, RouteError};
pub use token::{generate_secret, Claims, HmacTokenService, Identity, SessionToken, TokenService};
