//! Identity assertion: token issuance, verification and the REST extractors.

pub mod jwt;
pub mod middleware;
pub mod verify;

pub use jwt::Identity;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication error: no token provided")]
    Missing,
    #[error("Authentication error: invalid token")]
    Invalid { expired: bool },
}
