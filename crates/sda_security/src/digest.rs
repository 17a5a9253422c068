//! Streaming tee/hash adapters (spec.md §4.4).
//!
//! Wraps any `AsyncRead` so bytes are hashed as they pass through, without
//! buffering the file — the verify worker chains these around the Crypt4GH
//! decrypt contract to get the encrypted SHA-256 and the decrypted MD5 +
//! SHA-256 in a single pass.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use md5::Md5;
use pin_project::pin_project;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, ReadBuf};

use sda_protocol::{Checksum, ChecksumType};

/// A single `AsyncRead` wrapper that accumulates `D` over every byte read.
#[pin_project]
pub struct HashingReader<R, D> {
    #[pin]
    inner: R,
    hasher: D,
    count: u64,
}

impl<R, D: Default> HashingReader<R, D> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: D::default(),
            count: 0,
        }
    }
}

impl<R, D> HashingReader<R, D> {
    pub fn bytes_read(&self) -> u64 {
        self.count
    }

    /// Consume the reader, returning the wrapped inner value, the hasher
    /// state, and the byte count — used to unwrap nested tee readers.
    pub fn into_parts(self) -> (R, D, u64) {
        (self.inner, self.hasher, self.count)
    }
}

impl<R: AsyncRead, D: Digest> AsyncRead for HashingReader<R, D> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let result = this.inner.poll_read(cx, buf);
        if result.is_ready() {
            if let Poll::Ready(Ok(())) = &result {
                let fresh = &buf.filled()[before..];
                this.hasher.update(fresh);
                *this.count += fresh.len() as u64;
            }
        }
        result
    }
}

pub type Sha256TeeReader<R> = HashingReader<R, Sha256>;

impl<R> Sha256TeeReader<R> {
    /// Finalize, returning the hex-encoded SHA-256 checksum and byte count.
    pub fn finish(self) -> (Checksum, u64) {
        let (_, hasher, count) = self.into_parts();
        (
            Checksum {
                checksum_type: ChecksumType::Sha256,
                value: hex::encode(hasher.finalize()),
            },
            count,
        )
    }
}

/// Tees a plaintext stream through both MD5 and SHA-256 simultaneously
/// (spec.md §4.4 requires both on the decrypted body).
#[pin_project]
pub struct DualHashReader<R> {
    #[pin]
    inner: HashingReader<HashingReader<R, Md5>, Sha256>,
}

impl<R> DualHashReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: HashingReader::new(HashingReader::new(inner)),
        }
    }
}

impl<R: AsyncRead> AsyncRead for DualHashReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl<R> DualHashReader<R> {
    pub fn finish(self) -> (Vec<Checksum>, u64) {
        let (md5_reader, sha256, count) = self.inner.into_parts();
        let (_, md5, _) = md5_reader.into_parts();
        let checksums = vec![
            Checksum {
                checksum_type: ChecksumType::Sha256,
                value: hex::encode(sha256.finalize()),
            },
            Checksum {
                checksum_type: ChecksumType::Md5,
                value: hex::encode(md5.finalize()),
            },
        ];
        (checksums, count)
    }
}

/// A SHA-256 tee whose running digest can be read out through a cloned
/// [`TeeHandle`] while the reader itself is still being driven — the verify
/// worker boxes this reader into the Crypt4GH decrypt contract (spec.md
/// §4.4) and so loses ownership of it before end-of-stream, but still needs
/// the encrypted checksum once the decrypt contract has consumed every byte.
#[pin_project]
pub struct SharedSha256Reader<R> {
    #[pin]
    inner: R,
    state: Arc<Mutex<Sha256>>,
    count: Arc<AtomicU64>,
}

impl<R> SharedSha256Reader<R> {
    pub fn new(inner: R) -> (Self, TeeHandle) {
        let state = Arc::new(Mutex::new(Sha256::new()));
        let count = Arc::new(AtomicU64::new(0));
        let handle = TeeHandle {
            state: state.clone(),
            count: count.clone(),
        };
        (
            Self {
                inner,
                state,
                count,
            },
            handle,
        )
    }
}

impl<R: AsyncRead> AsyncRead for SharedSha256Reader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let result = this.inner.poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let fresh = &buf.filled()[before..];
            if !fresh.is_empty() {
                this.state
                    .lock()
                    .expect("tee hasher lock poisoned")
                    .update(fresh);
                this.count.fetch_add(fresh.len() as u64, Ordering::Relaxed);
            }
        }
        result
    }
}

/// Cloneable handle onto a [`SharedSha256Reader`]'s running digest. Cloning
/// the inner `Sha256` state to finalize leaves the live hasher untouched, so
/// the handle may be read from at any point, including mid-stream.
#[derive(Clone)]
pub struct TeeHandle {
    state: Arc<Mutex<Sha256>>,
    count: Arc<AtomicU64>,
}

impl TeeHandle {
    pub fn digest(&self) -> Checksum {
        let hasher = self.state.lock().expect("tee hasher lock poisoned").clone();
        Checksum {
            checksum_type: ChecksumType::Sha256,
            value: hex::encode(hasher.finalize()),
        }
    }

    pub fn bytes_seen(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn shared_tee_handle_digest_matches_after_reader_is_boxed() {
        let data = b"header-separated archive body bytes";
        let (reader, handle) = SharedSha256Reader::new(&data[..]);
        let mut boxed: Box<dyn tokio::io::AsyncRead + Unpin + Send> = Box::new(reader);

        let mut direct = Sha256::new();
        direct.update(data);
        assert_eq!(handle.bytes_seen(), 0);

        let mut buf = Vec::new();
        boxed.read_to_end(&mut buf).await.unwrap();

        assert_eq!(buf, data);
        assert_eq!(handle.bytes_seen(), data.len() as u64);
        assert_eq!(handle.digest().value, hex::encode(direct.finalize()));
    }

    #[tokio::test]
    async fn sha256_tee_matches_direct_hash() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut reader = Sha256TeeReader::new(&data[..]);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        let (checksum, count) = reader.finish();

        let mut direct = Sha256::new();
        direct.update(data);
        assert_eq!(checksum.value, hex::encode(direct.finalize()));
        assert_eq!(count, data.len() as u64);
        assert_eq!(buf, data);
    }

    #[tokio::test]
    async fn dual_hash_reader_produces_both_digests() {
        let data = b"sensitive payload bytes";
        let mut reader = DualHashReader::new(&data[..]);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        let (checksums, count) = reader.finish();

        assert_eq!(count, data.len() as u64);
        assert_eq!(checksums.len(), 2);
        assert!(checksums
            .iter()
            .any(|c| c.checksum_type == ChecksumType::Sha256));
        assert!(checksums
            .iter()
            .any(|c| c.checksum_type == ChecksumType::Md5));
    }

    proptest! {
        /// The tee reader must pass every byte through unmodified and report
        /// the same digest a direct, non-streaming hash would produce,
        /// regardless of how the data is chunked.
        #[test]
        fn tee_reader_preserves_bytes_and_matches_direct_hash(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let mut reader = Sha256TeeReader::new(&data[..]);
                let mut out = Vec::new();
                reader.read_to_end(&mut out).await.unwrap();
                let (checksum, count) = reader.finish();

                let mut direct = Sha256::new();
                direct.update(&data);
                prop_assert_eq!(out, data.clone());
                prop_assert_eq!(count, data.len() as u64);
                prop_assert_eq!(checksum.value, hex::encode(direct.finalize()));
                Ok(())
            })?;
        }
    }
}
