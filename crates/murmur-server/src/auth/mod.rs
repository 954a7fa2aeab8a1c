//! Accounts, login rate limiting, and the auth HTTP API.

pub mod accounts;
pub mod api;
pub mod rate_limit;

pub use accounts::{AccountError, AccountStore};
pub use rate_limit::LoginRateLimiter;
