//! Error taxonomy shared by the server modules
//!
//! Handshake rejections carry the exact `[ERROR]` line sent to the peer.
//! Transport failures never produce a reply: they end the owning connection
//! and are only logged.

use shared::{error_line, CredentialError};
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Failures of the credential store backing the handshake
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential table is corrupt: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("credential store lock poisoned")]
    Poisoned,
    #[error("account {0} already exists")]
    AlreadyExists(String),
    #[error("credential store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failures on a single client connection
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line exceeds {} bytes", shared::MAX_LINE_LEN)]
    LineTooLong,
    #[error("peer closed the connection")]
    Closed,
}

impl From<LinesCodecError> for TransportError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => TransportError::LineTooLong,
            LinesCodecError::Io(e) => TransportError::Io(e),
        }
    }
}

/// Every way the login/register exchange can end without a chat session
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("malformed credentials line")]
    InvalidFormat,
    #[error("invalid pseudo or password")]
    InvalidCredentials,
    #[error("pseudo already registered")]
    DuplicateUser,
    #[error("pseudo already connected")]
    DuplicateSession,
    #[error("credential store failure: {0}")]
    AuthStore(#[from] StoreError),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

impl From<CredentialError> for HandshakeError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::InvalidFormat => HandshakeError::InvalidFormat,
            CredentialError::InvalidCredentials => HandshakeError::InvalidCredentials,
        }
    }
}

impl HandshakeError {
    /// The single line reported to the peer, if the peer is still reachable
    pub fn reply(&self) -> Option<String> {
        let text = match self {
            HandshakeError::InvalidFormat => "Invalid Format.",
            HandshakeError::InvalidCredentials => "Invalid pseudo or password.",
            HandshakeError::DuplicateUser => "This pseudo already exists.",
            HandshakeError::DuplicateSession => "This pseudo is already connected.",
            HandshakeError::AuthStore(_) => "Server error.",
            HandshakeError::Transport(_) => return None,
        };
        Some(error_line(text))
    }
}

/// Failures while loading or starting the animation
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("no frames found in {}", .0.display())]
    NoFramesFound(PathBuf),
    #[error("failed to read frame {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode frame image {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}
