//! Identifier types shared by the import pipeline and its stores

use serde::{Deserialize, Serialize};

use crate::error::{Result, RtdsError};

/// Owner (user or session) identity that scopes jobs and stored records.
///
/// Owners are opaque strings supplied by the collaborator that handles
/// authentication; the only rule enforced here is that they are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RtdsError::InvalidOwner("owner id must not be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a materialized record set: `(owner, dataset type)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetKey {
    pub owner: OwnerId,
    pub dataset_type: String,
}

impl DatasetKey {
    pub fn new(owner: OwnerId, dataset_type: impl Into<String>) -> Result<Self> {
        let dataset_type = dataset_type.into();
        if dataset_type.trim().is_empty() {
            return Err(RtdsError::InvalidDatasetType(
                "dataset type must not be empty".to_string(),
            ));
        }
        Ok(Self {
            owner,
            dataset_type,
        })
    }
}

impl std::fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.dataset_type)
    }
}
