//! ACME error types

use std::io;
use thiserror::Error;

use crate::error::CertError;

/// Errors that can occur during issuance or renewal
///
/// Every variant is an issuance failure from the caller's point of view; the
/// variant records which step of the protocol gave up.
#[derive(Debug, Error)]
pub enum AcmeError {
    /// The configuration names no domains
    #[error("No domains configured for certificate issuance")]
    NoDomains,

    /// Failed to create or load ACME account
    #[error("Failed to create ACME account: {0}")]
    AccountCreation(String),

    /// Failed to create certificate order
    #[error("Failed to create certificate order: {0}")]
    OrderCreation(String),

    /// The CA offered no challenge of the configured type
    #[error("No {kind} challenge available for domain '{domain}'")]
    NoChallenge { domain: String, kind: &'static str },

    /// Challenge validation failed
    #[error("Challenge validation failed for domain '{domain}': {message}")]
    ChallengeValidation { domain: String, message: String },

    /// Certificate finalization failed
    #[error("Failed to finalize certificate: {0}")]
    Finalization(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// ACME protocol error reported by the provider
    #[error("ACME protocol error: {0}")]
    Protocol(String),

    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The issued or existing certificate could not be read
    #[error(transparent)]
    Certificate(#[from] CertError),
}

/// Errors specific to certificate storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to serialize/deserialize data
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<instant_acme::Error> for AcmeError {
    fn from(e: instant_acme::Error) -> Self {
        AcmeError::Protocol(e.to_string())
    }
}
