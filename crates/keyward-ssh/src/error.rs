// ABOUTME: Error types for key provisioning operations using thiserror.
// ABOUTME: Covers request validation, generation, ledger registration and key reads.

use crate::request::RequestKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while provisioning SSH key material.
#[derive(Error, Debug)]
pub enum SshError {
    /// The request is missing a required field or carries an unusable value.
    #[error("invalid key request: {0}")]
    InvalidRequest(String),

    /// A non-directory entry occupies a path that must be a directory.
    #[error("path {path} exists and is not a directory")]
    PathConflict { path: PathBuf },

    /// The key-generation mechanism failed.
    #[error("key generation failed (`{command}`): {detail}")]
    KeyGeneration { command: String, detail: String },

    /// A trust ledger could not be updated.
    #[error("failed to register key in {path}: {reason}")]
    TrustRegistration {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Failed to read a key file or ledger from disk.
    #[error("failed to read {path}: {source}")]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to generate an SSH key in-process.
    #[error("failed to generate SSH key: {0}")]
    GenerateKey(#[source] ssh_key::Error),

    /// Failed to serialize a key.
    #[error("failed to serialize key: {0}")]
    SerializeKey(#[source] ssh_key::Error),

    /// Failed to write or move a key file.
    #[error("failed to write key to {path}: {source}")]
    WriteKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create a directory.
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to set file permissions.
    #[error("failed to set permissions on {path}: {source}")]
    SetPermissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unsupported key type for the selected mechanism.
    #[error("unsupported key type: {0} (only ed25519 is supported in-process)")]
    UnsupportedKeyType(String),

    /// A request failed after validation.
    #[error("{kind} request for {} failed: {source}", .name.as_deref().unwrap_or("<ledger>"))]
    Request {
        kind: RequestKind,
        name: Option<String>,
        #[source]
        source: Box<SshError>,
    },
}

impl SshError {
    /// The underlying error, looking through any request wrapper.
    pub fn root(&self) -> &SshError {
        match self {
            SshError::Request { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn registration(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SshError::TrustRegistration {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn registration_io(
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        SshError::TrustRegistration {
            path: path.into(),
            reason: reason.into(),
            source: Some(source),
        }
    }
}

/// Result type alias using SshError.
pub type Result<T> = std::result::Result<T, SshError>;
