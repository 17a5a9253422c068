//! Checksumming and the Crypt4GH decrypt contract shared by the SDA
//! pipeline's worker binaries. TLS material is handled directly by each
//! connector that needs it rather than through a shared loader:
//! `sda_db::pool` reads client-certificate paths straight into
//! `PgConnectOptions`, and `sda_storage::s3` reads an optional CA bundle
//! into a `rustls` root store for its own HTTPS client. Neither carries
//! client-certificate auth for the broker — spec.md names no such
//! requirement for it — so there was nothing pipeline-wide for a shared
//! type here to usefully own.

pub mod crypt4gh;
pub mod digest;

pub use crypt4gh::{Crypt4GhDecryptor, Crypt4GhError, Crypt4GhHeaderReader, UnimplementedCrypt4Gh};
pub use digest::{DualHashReader, HashingReader, Sha256TeeReader, SharedSha256Reader, TeeHandle};
