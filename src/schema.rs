use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PipelineError;

/// Bump whenever field semantics change without the names changing.
pub const FEATURE_SCHEMA_VERSION: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Value emitted when history is insufficient or the input is missing.
    pub default: f64,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, default: f64) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }
}

/// Ordered, versioned field list. The hash covers version and names, so any drift
/// between the schema a model was trained on and the one it scores is detectable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    version: u32,
    fields: Vec<FieldSpec>,
    hash: String,
}

impl FeatureSchema {
    pub fn new(version: u32, fields: Vec<FieldSpec>) -> Self {
        let hash = schema_hash(version, fields.iter().map(|f| f.name.as_str()));
        Self {
            version,
            fields,
            hash,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn defaults(&self) -> Vec<f64> {
        self.fields.iter().map(|f| f.default).collect()
    }

    /// True when the stored hash still matches the field list (e.g. after deserializing).
    pub fn hash_is_consistent(&self) -> bool {
        schema_hash(self.version, self.names()) == self.hash
    }

    pub fn ensure_same(&self, other: &FeatureSchema) -> Result<(), PipelineError> {
        if self.hash == other.hash && self.len() == other.len() {
            return Ok(());
        }
        Err(self.mismatch(other.hash(), other.names()))
    }

    /// Exact field-set check for loosely keyed inputs.
    pub fn ensure_names<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), PipelineError> {
        let names: Vec<&str> = names.into_iter().collect();
        let expected: BTreeSet<&str> = self.names().collect();
        let found: BTreeSet<&str> = names.iter().copied().collect();
        if expected == found && names.len() == self.len() {
            return Ok(());
        }
        Err(self.mismatch("<unhashed>", names.into_iter()))
    }

    pub fn mismatch<'a>(
        &self,
        found_hash: &str,
        found_names: impl Iterator<Item = &'a str>,
    ) -> PipelineError {
        let expected: BTreeSet<&str> = self.names().collect();
        let found: BTreeSet<&str> = found_names.collect();
        PipelineError::SchemaMismatch {
            expected_hash: self.hash.clone(),
            found_hash: found_hash.to_string(),
            missing: expected
                .difference(&found)
                .map(|s| s.to_string())
                .collect(),
            unexpected: found
                .difference(&expected)
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

pub fn schema_hash<'a>(version: u32, names: impl Iterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(version.to_le_bytes());
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
