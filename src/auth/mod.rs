//! Bearer-token authorization and usage accounting.
//!
//! Every rejection maps to a stable detail code. Header problems are 401,
//! a well-formed but unknown token is 403.

mod store;

pub use store::{fingerprint, TokenStore, UsageStats};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authorization header is missing")]
    MissingHeader,

    #[error("Authorization header is malformed")]
    MalformedHeader,

    #[error("Authorization scheme must be Bearer")]
    UnsupportedScheme,

    #[error("Unknown bearer token")]
    UnknownToken,

    #[error("Failed to read token file '{path}': {source}")]
    TokenFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl AuthError {
    /// Stable machine-readable code returned to clients.
    pub fn detail(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_credentials",
            Self::MalformedHeader => "malformed_credentials",
            Self::UnsupportedScheme => "unsupported_auth_scheme",
            Self::UnknownToken => "invalid_token",
            Self::TokenFile { .. } => "token_store_unavailable",
        }
    }

    /// True when the caller presented a credential that was refused.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::UnknownToken)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` value.
pub fn parse_bearer(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingHeader)?.trim();
    if header.is_empty() {
        return Err(AuthError::MissingHeader);
    }

    let mut parts = header.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::MalformedHeader)?;
    let token = parts.next();
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::UnsupportedScheme);
    }
    match (token, parts.next()) {
        (Some(token), None) => Ok(token),
        _ => Err(AuthError::MalformedHeader),
    }
}
