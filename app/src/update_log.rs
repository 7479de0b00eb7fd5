// ==============================================================================
// update_log.rs - Update Log of Applied Batches
// ==============================================================================
// Description: Idempotency tokens recording which batches a table has absorbed
// Author: Matt Barham
// Created: 2026-09-17
// Modified: 2026-10-03
// Version: 1.1.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::Result;

/// Identifies one (callset, project sample mapping) application
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UpdateLogToken {
    pub callset: String,
    pub project_guid: String,
    /// SHA-256 of the remap file bytes (when present) followed by the
    /// pedigree file bytes
    pub remap_pedigree_hash: String,
}

impl UpdateLogToken {
    pub fn new(callset: &str, project_guid: &str, remap_pedigree_hash: &str) -> Self {
        Self {
            callset: callset.to_string(),
            project_guid: project_guid.to_string(),
            remap_pedigree_hash: remap_pedigree_hash.to_string(),
        }
    }

    /// Build a token by hashing the sample mapping inputs
    ///
    /// A remap path that does not exist contributes nothing to the hash.
    pub fn from_files(
        callset: &str,
        project_guid: &str,
        remap_path: Option<&Path>,
        pedigree_path: &Path,
    ) -> Result<Self> {
        let mut hasher = Sha256::new();
        if let Some(remap) = remap_path.filter(|p| p.exists()) {
            hash_file(&mut hasher, remap)?;
        }
        hash_file(&mut hasher, pedigree_path)?;

        Ok(Self::new(
            callset,
            project_guid,
            &format!("{:x}", hasher.finalize()),
        ))
    }
}

fn hash_file(hasher: &mut Sha256, path: &Path) -> Result<()> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(())
}

/// Set of tokens already merged into a table; only ever grows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateLog(BTreeSet<UpdateLogToken>);

impl UpdateLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, token: &UpdateLogToken) -> bool {
        self.0.contains(token)
    }

    /// Returns a log with `token` added
    pub fn with(&self, token: UpdateLogToken) -> Self {
        let mut tokens = self.0.clone();
        tokens.insert(token);
        Self(tokens)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UpdateLogToken> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<UpdateLogToken> for UpdateLog {
    fn from_iter<I: IntoIterator<Item = UpdateLogToken>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
