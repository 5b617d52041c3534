//! Errors surfaced by group encryption and decryption.

use thiserror::Error;

use crate::crypto::CipherError;
use crate::wire::WireError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupsError {
    /// A proof or signature check failed. Never retried locally.
    #[error("Verification failed")]
    VerificationFailed,

    /// Structurally malformed group or member data. The group is unusable
    /// until a fresh fetch.
    #[error("Invalid group state: {0}")]
    InvalidGroupState(String),

    /// A builder was called with arguments that cannot form a valid change.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error(transparent)]
    Wire(#[from] WireError),
}

pub type Result<T> = std::result::Result<T, GroupsError>;

impl GroupsError {
    /// Map a codec failure met while decrypting a record. Verification
    /// failures stay distinct; anything else means the record is malformed.
    pub fn from_decrypt(err: CipherError, what: &str) -> Self {
        match err {
            CipherError::VerificationFailed => GroupsError::VerificationFailed,
            other => GroupsError::InvalidGroupState(format!("{}: {}", what, other)),
        }
    }

    pub fn from_encrypt(err: CipherError) -> Self {
        GroupsError::Encryption(err.to_string())
    }
}
