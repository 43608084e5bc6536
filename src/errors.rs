//! Typed domain errors (§7). Transport/boundary errors are wrapped in
//! `anyhow::Error`; errors a caller needs to `match` on are `thiserror` enums.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CryptoError {
    #[error("invalid proof of knowledge from participant {0}")]
    InvalidPok(u64),
    #[error("invalid secret share from participant {0}")]
    InvalidShare(u64),
    #[error("signing share does not match verification share")]
    ShareMismatch,
    #[error("cannot invert a zero scalar")]
    ZeroScalarInversion,
    #[error("point at infinity where a valid point was required")]
    PointAtInfinity,
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum KeyGenError {
    #[error("unknown group {0:#x}")]
    UnknownGroup(u64),
    #[error("participant {0} already registered")]
    AlreadyRegistered(u64),
    #[error(transparent)]
    InvalidPok(#[from] CryptoError),
    #[error("prerequisites incomplete: {0}")]
    IncompletePrereqs(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SigningError {
    #[error("unknown signature request {0:#x}")]
    UnknownRequest(u64),
    #[error("fewer than threshold signers: have {have}, need {need}")]
    InsufficientSigners { have: usize, need: usize },
    #[error("no unburned nonces remain for group {0:#x}")]
    NoncesExhausted(u64),
    #[error(transparent)]
    InvalidShare(#[from] CryptoError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record already present for key {0}")]
    AlreadyExists(String),
    #[error("set-once column {0} already populated")]
    SetOnceViolation(&'static str),
    #[error("backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("block not found: {0}")]
    BlockNotFound(u64),
    #[error("nonce too low")]
    NonceTooLow,
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

/// Thrown by the service shell on unrecoverable storage integrity failures;
/// the shell flushes and exits with code 1 rather than propagating further.
#[derive(Debug, Error)]
#[error("fatal storage integrity violation: {0}")]
pub struct FatalStorageError(#[source] pub StorageError);
