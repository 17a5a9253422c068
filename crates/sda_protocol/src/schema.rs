//! JSON Schema validation for message envelopes.
//!
//! Schemas are loaded from disk by name (e.g. `ingestion-verification.json`)
//! rather than compiled in, so that schema versions can be rolled out
//! independently of worker binaries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use jsonschema::JSONSchema;
use serde_json::Value;

use crate::error::{ProtocolError, Result};

/// A cache of compiled schemas keyed by file name, loaded once at worker
/// startup from [`crate::config::SystemConfig::schema_dir`].
pub struct SchemaRegistry {
    dir: PathBuf,
    compiled: HashMap<String, Arc<JSONSchema>>,
}

impl SchemaRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            compiled: HashMap::new(),
        }
    }

    /// Load and compile every schema named in `names`, failing fast if any
    /// is missing or malformed. Call once at startup.
    pub fn load(mut self, names: &[&str]) -> Result<Self> {
        for name in names {
            self.compile(name)?;
        }
        Ok(self)
    }

    fn compile(&mut self, name: &str) -> Result<()> {
        let path = self.dir.join(name);
        let raw = std::fs::read_to_string(&path).map_err(|source| ProtocolError::SchemaLoad {
            schema: name.to_string(),
            path: path.display().to_string(),
            source,
        })?;
        let value: Value = serde_json::from_str(&raw)?;
        let compiled = JSONSchema::compile(&value).map_err(|e| ProtocolError::SchemaInvalid {
            schema: name.to_string(),
            detail: e.to_string(),
        })?;
        self.compiled.insert(name.to_string(), Arc::new(compiled));
        Ok(())
    }

    /// Validate `body` (raw message bytes) against the named schema.
    pub fn validate(&self, schema_name: &str, body: &[u8]) -> Result<()> {
        let schema = self
            .compiled
            .get(schema_name)
            .ok_or_else(|| ProtocolError::SchemaInvalid {
                schema: schema_name.to_string(),
                detail: "schema not loaded".to_string(),
            })?;
        let instance: Value = serde_json::from_slice(body)?;
        schema.validate(&instance).map_err(|errors| {
            let detail = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            ProtocolError::SchemaViolation {
                schema: schema_name.to_string(),
                detail,
            }
        })
    }

    pub fn schema_dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_schema(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn validates_conforming_message() {
        let tmp = tempfile::tempdir().unwrap();
        write_schema(
            tmp.path(),
            "ingestion-verification.json",
            r#"{"type":"object","required":["file_id"],"properties":{"file_id":{"type":"integer"}}}"#,
        );
        let registry = SchemaRegistry::new(tmp.path())
            .load(&["ingestion-verification.json"])
            .unwrap();
        assert!(registry
            .validate("ingestion-verification.json", br#"{"file_id": 1}"#)
            .is_ok());
    }

    #[test]
    fn rejects_malformed_message() {
        let tmp = tempfile::tempdir().unwrap();
        write_schema(
            tmp.path(),
            "ingestion-verification.json",
            r#"{"type":"object","required":["file_id"],"properties":{"file_id":{"type":"integer"}}}"#,
        );
        let registry = SchemaRegistry::new(tmp.path())
            .load(&["ingestion-verification.json"])
            .unwrap();
        let err = registry
            .validate("ingestion-verification.json", br#"{"file_id": "not-an-int"}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::SchemaViolation { .. }));
    }

    #[test]
    fn missing_schema_file_fails_fast() {
        let tmp = tempfile::tempdir().unwrap();
        let err = SchemaRegistry::new(tmp.path())
            .load(&["does-not-exist.json"])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::SchemaLoad { .. }));
    }
}
