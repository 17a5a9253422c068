//! Canonical message and domain types shared across every worker.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// File lifecycle status (spec.md §3). Monotonic except for `ERROR`, which
/// may be entered from any state and does not transition back without
/// administrative intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileStatus {
    Registered,
    Uploaded,
    Submitted,
    Archived,
    Completed,
    Ready,
    Error,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Registered => "REGISTERED",
            FileStatus::Uploaded => "UPLOADED",
            FileStatus::Submitted => "SUBMITTED",
            FileStatus::Archived => "ARCHIVED",
            FileStatus::Completed => "COMPLETED",
            FileStatus::Ready => "READY",
            FileStatus::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

impl FromStr for FileStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGISTERED" => Ok(FileStatus::Registered),
            "UPLOADED" => Ok(FileStatus::Uploaded),
            "SUBMITTED" => Ok(FileStatus::Submitted),
            "ARCHIVED" => Ok(FileStatus::Archived),
            "COMPLETED" => Ok(FileStatus::Completed),
            "READY" => Ok(FileStatus::Ready),
            "ERROR" => Ok(FileStatus::Error),
            other => Err(ProtocolError::UnknownFileStatus(other.to_string())),
        }
    }
}

impl FileStatus {
    /// Whether `self` is reachable from `other` by forward-only progress,
    /// i.e. `other <= self` on the non-error lattice. `ERROR` is reachable
    /// from anywhere.
    pub fn is_forward_from(self, other: FileStatus) -> bool {
        self == FileStatus::Error || self >= other
    }
}

/// Checksum algorithm tag, recorded alongside every stored checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChecksumType {
    Sha256,
    Md5,
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumType::Sha256 => write!(f, "SHA256"),
            ChecksumType::Md5 => write!(f, "MD5"),
        }
    }
}

impl FromStr for ChecksumType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SHA256" => Ok(ChecksumType::Sha256),
            "MD5" => Ok(ChecksumType::Md5),
            other => Err(ProtocolError::UnknownChecksumType(other.to_string())),
        }
    }
}

/// A single checksum value paired with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    #[serde(rename = "type")]
    pub checksum_type: ChecksumType,
    pub value: String,
}

/// `ingestion-trigger.json` — inbox notification that kicks off ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionTriggerMessage {
    pub user: String,
    pub filepath: String,
    pub correlation_id: String,
}

/// `ingestion-verification.json` — input to the verify worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationMessage {
    pub file_id: i64,
    pub archive_path: String,
    pub user: String,
    pub filepath: String,
    pub encrypted_checksums: Vec<Checksum>,
    #[serde(default)]
    pub re_verify: bool,
    pub correlation_id: String,
}

/// `ingestion-accession-request.json` — published by verify on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessionRequestMessage {
    pub file_id: i64,
    pub user: String,
    pub filepath: String,
    pub decrypted_checksums: Vec<Checksum>,
    pub correlation_id: String,
}

/// `ingestion-accession.json` — consumed by finalize to assign a stable id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessionMessage {
    pub file_id: i64,
    pub accession_id: String,
    pub decrypted_checksums: Vec<Checksum>,
    pub correlation_id: String,
}

/// `ingestion-completion.json` — published by finalize, consumed by backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub file_id: i64,
    pub accession_id: String,
    pub archive_path: String,
    pub correlation_id: String,
}

/// `dataset-mapping.json` — consumed by the mapper worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMappingMessage {
    pub dataset_id: String,
    pub accession_ids: Vec<String>,
    pub correlation_id: String,
}

/// Timestamp wrapper used for the `files.created_at` column, mirroring
/// `casparian_db::backend::DbTimestamp`'s RFC3339-everywhere convention.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub type Timestamp = DateTime<Utc>;
