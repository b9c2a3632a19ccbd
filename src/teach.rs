//! Teaching new mappings.
//!
//! Inserts a patch-replace entry and then publishes the store file itself so
//! the new mapping travels with the repository.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::publisher::{PublishOutcome, PublishScope, Publisher};
use crate::store::{MappingEntry, MappingStore, RemediationAction, StoreError};

/// Fields of a new patch-replace mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeachRequest {
    /// Regex or literal to recognize the failure.
    pub signature: String,
    /// File to patch.
    pub file: PathBuf,
    /// Text to find.
    pub search: String,
    /// Text to put in its place.
    pub replace: String,
}

/// Result of a teach operation. The entry is persisted in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeachReport {
    /// Inserted and published.
    Published {
        /// The new entry.
        entry: MappingEntry,
        /// How the store file was published.
        outcome: PublishOutcome,
    },
    /// Inserted; publishing was not requested.
    Recorded {
        /// The new entry.
        entry: MappingEntry,
    },
    /// Inserted, but publishing the store file failed.
    PublishFailed {
        /// The new entry.
        entry: MappingEntry,
        /// Transport error text.
        reason: String,
    },
}

impl TeachReport {
    /// The inserted entry.
    pub fn entry(&self) -> &MappingEntry {
        match self {
            Self::Published { entry, .. }
            | Self::Recorded { entry }
            | Self::PublishFailed { entry, .. } => entry,
        }
    }

    /// Process exit code: non-zero only when publishing failed.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::PublishFailed { .. } => 1,
            _ => 0,
        }
    }
}

/// Insert the mapping described by `request` into `store`, then publish the
/// file at `store_path` with `publisher` if one is given.
///
/// # Errors
///
/// Returns [`StoreError::Validation`] for an empty signature or an invalid
/// file path, and [`StoreError::Database`] if the insert fails.
pub async fn teach(
    store: &MappingStore,
    store_path: &Path,
    request: &TeachRequest,
    publisher: Option<&dyn Publisher>,
) -> Result<TeachReport, StoreError> {
    let action = RemediationAction::patch_replace(
        request.file.clone(),
        request.search.clone(),
        request.replace.clone(),
    );
    let entry = store.insert(&request.signature, &action).await?;
    info!(entry_id = entry.id, signature = %entry.signature, "inserted mapping");

    let Some(publisher) = publisher else {
        return Ok(TeachReport::Recorded { entry });
    };

    let message = format!("Add healer mapping id {}", entry.id);
    let scope = PublishScope::Paths(vec![store_path.to_path_buf()]);
    match publisher.publish(&message, &scope).await {
        Ok(outcome) => {
            info!(entry_id = entry.id, outcome = ?outcome, "published mapping store");
            Ok(TeachReport::Published { entry, outcome })
        }
        Err(e) => {
            warn!(entry_id = entry.id, error = %e, "mapping saved but store commit failed");
            Ok(TeachReport::PublishFailed {
                entry,
                reason: e.to_string(),
            })
        }
    }
}
