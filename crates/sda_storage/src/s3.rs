//! S3-compatible object store, enriched from the ecosystem's `aws-sdk-s3`
//! dependency (the teacher has no S3 backend of its own).
//!
//! Reads stream directly off the S3 response body. Writes buffer to a local
//! scratch file and are uploaded with a single `put_object` call on
//! shutdown — good enough for archive-sized objects without reimplementing
//! multipart upload.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_smithy_runtime::client::http::hyper_014::HyperClientBuilder;
use hyper_rustls::HttpsConnectorBuilder;
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Result, StorageError};
use crate::ObjectStore;

/// S3 connection settings (spec.md §4.2/§6): bucket, optional custom
/// endpoint (for S3-compatible stores) with path-style addressing, and an
/// optional CA bundle for self-signed endpoints.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub path_style: bool,
    pub ca_bundle: Option<PathBuf>,
}

pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    pub async fn new(config: S3Config) -> Result<Self> {
        let mut builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder.credentials_provider(Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "sda_storage",
            ));
        }
        if let Some(ca_bundle) = &config.ca_bundle {
            builder = builder.http_client(https_client_with_ca_bundle(ca_bundle)?);
        }
        let shared = builder.load().await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            s3_builder = s3_builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(s3_builder.build()),
            bucket: config.bucket,
        })
    }
}

/// Builds an HTTPS client trusting the system root store plus the given PEM
/// CA bundle, for S3-compatible endpoints behind a self-signed certificate
/// (spec.md §4.2).
fn https_client_with_ca_bundle(
    ca_bundle: &PathBuf,
) -> Result<aws_smithy_runtime_api::client::http::SharedHttpClient> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs()
        .map_err(|e| StorageError::io(ca_bundle.display().to_string(), e))?
    {
        let _ = roots.add(&rustls::Certificate(cert.0));
    }

    let pem = std::fs::read(ca_bundle).map_err(|e| StorageError::io(ca_bundle.display().to_string(), e))?;
    let mut reader = std::io::BufReader::new(pem.as_slice());
    let bundle_certs = rustls_pemfile::certs(&mut reader)
        .map_err(|e| StorageError::io(ca_bundle.display().to_string(), e))?;
    if bundle_certs.is_empty() {
        return Err(StorageError::S3(format!(
            "ca_bundle {} contains no PEM certificates",
            ca_bundle.display()
        )));
    }
    for cert in bundle_certs {
        roots
            .add(&rustls::Certificate(cert))
            .map_err(|e| StorageError::S3(format!("invalid certificate in ca_bundle: {e}")))?;
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let connector = HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();

    Ok(HyperClientBuilder::new().build(connector))
}

#[async_trait::async_trait]
impl ObjectStore for S3Backend {
    async fn get_file_size(&self, path: &str) -> Result<u64> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| map_not_found(path, e.to_string()))?;
        Ok(head.content_length().unwrap_or(0) as u64)
    }

    async fn reader(&self, path: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| map_not_found(path, e.to_string()))?;
        Ok(Box::new(object.body.into_async_read()))
    }

    async fn writer(&self, path: &str) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
        let temp_path = std::env::temp_dir().join(format!("sda-s3-upload-{}.tmp", uuid::Uuid::new_v4()));
        let file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| StorageError::io(temp_path.display().to_string(), e))?;
        Ok(Box::new(S3UploadWriter {
            file,
            temp_path,
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: path.to_string(),
            upload_fut: None,
        }))
    }
}

fn map_not_found(path: &str, detail: String) -> StorageError {
    if detail.contains("NoSuchKey") || detail.contains("NotFound") {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::S3(detail)
    }
}

#[pin_project]
struct S3UploadWriter {
    #[pin]
    file: tokio::fs::File,
    temp_path: PathBuf,
    client: Client,
    bucket: String,
    key: String,
    upload_fut: Option<Pin<Box<dyn Future<Output = std::io::Result<()>> + Send>>>,
}

impl AsyncWrite for S3UploadWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.project().file.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().file.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let mut this = self.project();

        match this.file.as_mut().poll_shutdown(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => {}
        }

        if this.upload_fut.is_none() {
            let client = this.client.clone();
            let bucket = this.bucket.clone();
            let key = this.key.clone();
            let temp_path = this.temp_path.clone();
            *this.upload_fut = Some(Box::pin(async move {
                let body = ByteStream::from_path(&temp_path)
                    .await
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
                client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| std::io::Error::other(e.to_string()))?;
                let _ = tokio::fs::remove_file(&temp_path).await;
                Ok(())
            }));
        }

        this.upload_fut.as_mut().unwrap().as_mut().poll(cx)
    }
}
