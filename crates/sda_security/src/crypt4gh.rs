//! Crypt4GH decrypt contract.
//!
//! The pipeline never parses the Crypt4GH container format itself — it only
//! consumes an external decryptor through this trait. Header bytes and a
//! private key go in, a plaintext `AsyncRead` comes out.

use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Error, Debug)]
pub enum Crypt4GhError {
    #[error("crypt4gh header is malformed: {0}")]
    HeaderInvalid(String),

    #[error("crypt4gh header could not be unlocked with the configured private key")]
    KeyMismatch,

    #[error("io error while decrypting: {0}")]
    Io(#[from] std::io::Error),
}

/// External collaborator contract for decrypting a Crypt4GH-encrypted body.
///
/// Implementations are expected to live outside this workspace (spec.md §1
/// Non-goals); this trait exists so `sda_verify`'s pipeline composition
/// compiles and can be tested against a fake.
#[async_trait::async_trait]
pub trait Crypt4GhDecryptor: Send + Sync {
    /// Wrap `body` so reads from the result yield decrypted plaintext.
    /// `header` is the Crypt4GH header recorded at archival time (spec.md
    /// §4.4: "the header bytes recorded by `archived`"); `private_key` is
    /// the recipient's Crypt4GH private key material.
    async fn decrypt<'a>(
        &self,
        header: &[u8],
        private_key: &[u8],
        body: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send + 'a>, Crypt4GhError>;
}

/// Splits a raw Crypt4GH-encrypted object into its header frame and the
/// remaining ciphertext body (spec.md §4.5 — "peels Crypt4GH header (first
/// frame)"). Container parsing, like decryption, is an external contract;
/// ingest never interprets the header bytes beyond this boundary.
#[async_trait::async_trait]
pub trait Crypt4GhHeaderReader: Send + Sync {
    /// Returns the header bytes and a reader positioned just past them.
    async fn peel_header<'a>(
        &self,
        body: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> Result<(Vec<u8>, Box<dyn AsyncRead + Unpin + Send + 'a>), Crypt4GhError>;
}

/// Placeholder wired in by default where a real Crypt4GH library isn't
/// linked in. Every call fails with [`Crypt4GhError::HeaderInvalid`] rather
/// than panicking, so a deployment missing the real collaborator degrades
/// to "every file errors out" instead of refusing to start.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnimplementedCrypt4Gh;

#[async_trait::async_trait]
impl Crypt4GhDecryptor for UnimplementedCrypt4Gh {
    async fn decrypt<'a>(
        &self,
        _header: &[u8],
        _private_key: &[u8],
        _body: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send + 'a>, Crypt4GhError> {
        Err(Crypt4GhError::HeaderInvalid(
            "no Crypt4GH decryptor configured".to_string(),
        ))
    }
}

#[async_trait::async_trait]
impl Crypt4GhHeaderReader for UnimplementedCrypt4Gh {
    async fn peel_header<'a>(
        &self,
        _body: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> Result<(Vec<u8>, Box<dyn AsyncRead + Unpin + Send + 'a>), Crypt4GhError> {
        Err(Crypt4GhError::HeaderInvalid(
            "no Crypt4GH header reader configured".to_string(),
        ))
    }
}
