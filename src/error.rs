//! Error taxonomy surfaced by the server core.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors surfaced by the server core.
///
/// The variants map onto HTTP statuses in [IntoResponse]; internal detail
/// (SQL text, key material) never reaches the client.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Password, TOTP code or recovery code mismatch
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// Request was denied by the rate limiter
    #[error("Rate limited")]
    RateLimited,
    /// Session is valid but the role is insufficient
    #[error("Unauthorized")]
    Unauthorized,
    /// Entity was not found
    #[error("Not found")]
    NotFound,
    /// Unique constraint or duplicate ActivityPub id
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Schema or changeset rejection
    #[error("Validation failed: {0}")]
    Validation(String),
    /// Incoming request failed HTTP signature verification
    #[error("Signature invalid: {0}")]
    SignatureInvalid(#[from] SignatureError),
    /// A remote server could not be reached or returned garbage
    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),
    /// Envelope encryption or decryption failed
    #[error("Vault error")]
    VaultError,
    /// The account is banned
    #[error("Banned")]
    Banned,
    /// URL failed verification (scheme, domain list, local-origin check)
    #[error("URL failed verification: {0}")]
    UrlVerification(&'static str),
    /// Storage layer failure
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),
    /// other error
    #[error("{0}")]
    Other(String),
}

/// Subtypes of inbound HTTP signature failure.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    /// The keyId's actor could not be resolved
    #[error("Signing actor is unknown")]
    UnknownActor,
    /// The RSA signature did not verify
    #[error("Signature did not verify")]
    BadSignature,
    /// The Date header is outside the clock-skew window
    #[error("Date header too far from current time")]
    StaleDate,
    /// A required covered header is absent
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),
    /// The Digest header does not match the body
    #[error("Body digest mismatch")]
    DigestMismatch,
}

impl Error {
    pub fn other<T: std::fmt::Display>(error: T) -> Self {
        Error::Other(error.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::Unauthorized => StatusCode::FORBIDDEN,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
            Error::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            Error::VaultError => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Banned => StatusCode::FORBIDDEN,
            Error::UrlVerification(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Storage(crate::storage::StorageError::NotFound) => StatusCode::NOT_FOUND,
            Error::Storage(crate::storage::StorageError::Conflict(_)) => StatusCode::CONFLICT,
            Error::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match status {
            // Never echo internal detail for server-side failures.
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE => {
                "internal error".to_string()
            }
            _ => self.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::Validation(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Validation(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::UpstreamFailure(e.to_string())
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(e: reqwest_middleware::Error) -> Self {
        Error::UpstreamFailure(e.to_string())
    }
}
