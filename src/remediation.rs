//! Remediation engine: match, apply, record.
//!
//! One call to [`remediate`] makes exactly one match attempt and at most one
//! apply attempt, and ends in exactly one [`Outcome`]. Hit counters move
//! only after a patch has been written to disk.
//!
//! Patching the same file from concurrent runs is not guarded by any lock.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::matcher::{self, MatchResult};
use crate::store::{MappingEntry, MappingStore, RemediationAction, StoreError};

/// Terminal outcome of one remediation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The fix was written and the entry's hit counter incremented.
    Applied {
        /// The entry that was applied, as it was before the hit was recorded.
        entry: MappingEntry,
    },
    /// An entry matched but nothing was changed.
    NoActionTaken {
        /// The matched entry.
        entry: MappingEntry,
        /// Why the action was not applied.
        reason: SkipReason,
    },
    /// No entry matched the log.
    NoMatch,
}

/// Why a matched entry was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The search text is not in the target file, e.g. it was already fixed.
    SearchTextAbsent {
        /// The file that was inspected.
        file: PathBuf,
    },
    /// The entry's action is not one this binary can execute.
    UnsupportedAction {
        /// Stored action tag.
        kind: String,
        /// Decoding diagnostic.
        reason: String,
    },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SearchTextAbsent { file } => {
                write!(f, "search text not found in {}", file.display())
            }
            Self::UnsupportedAction { kind, reason } => {
                write!(f, "unsupported action '{kind}': {reason}")
            }
        }
    }
}

/// Result of applying a single patch-replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The first occurrence was replaced and the file rewritten.
    Replaced,
    /// The search text was not present; the file is untouched.
    SearchTextAbsent,
}

/// Errors from applying a single patch-replace.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// The target file does not exist.
    #[error("{} not found", path.display())]
    FileNotFound {
        /// The missing file.
        path: PathBuf,
    },

    /// Reading or writing the target file failed.
    #[error("failed to patch {}: {source}", path.display())]
    Io {
        /// The file being patched.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort a remediation run.
#[derive(Debug, thiserror::Error)]
pub enum RemediationError {
    /// A mapping matched but its patch could not be applied.
    #[error("mapping {} matched but could not be applied: {source}", entry.id)]
    Apply {
        /// The matched entry.
        entry: Box<MappingEntry>,
        /// What went wrong.
        #[source]
        source: PatchError,
    },

    /// The mapping store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Match `log_text` against the store and apply the winning entry's action.
///
/// Relative action paths resolve against `workdir`.
///
/// # Errors
///
/// Returns [`RemediationError::Apply`] when the matched patch targets a
/// missing or unreadable file, and [`RemediationError::Store`] when the
/// store fails.
pub async fn remediate(
    log_text: &str,
    store: &MappingStore,
    workdir: &Path,
) -> Result<Outcome, RemediationError> {
    let entries = store.list_entries().await?;
    debug!(entries = entries.len(), "loaded mapping snapshot");

    let Some(found) = matcher::find_match(log_text, &entries) else {
        info!("no mapping matched the log");
        return Ok(Outcome::NoMatch);
    };

    info!(
        entry_id = found.entry.id,
        signature = %found.entry.signature,
        mode = ?found.mode,
        "found matching mapping"
    );

    apply_match(&found, store, workdir).await
}

/// Execute the action of a matched entry.
async fn apply_match(
    found: &MatchResult<'_>,
    store: &MappingStore,
    workdir: &Path,
) -> Result<Outcome, RemediationError> {
    let entry = found.entry;

    match &entry.action {
        RemediationAction::PatchReplace {
            file,
            search,
            replace,
        } => {
            let path = workdir.join(file);
            let patched = apply_patch_replace(&path, search, replace)
                .await
                .map_err(|source| RemediationError::Apply {
                    entry: Box::new(entry.clone()),
                    source,
                })?;
            match patched {
                PatchOutcome::Replaced => {
                    store.record_hit(entry.id).await?;
                    info!(entry_id = entry.id, file = %path.display(), "applied replace");
                    Ok(Outcome::Applied {
                        entry: entry.clone(),
                    })
                }
                PatchOutcome::SearchTextAbsent => {
                    info!(
                        entry_id = entry.id,
                        file = %path.display(),
                        "search text not found in file, patch not applied"
                    );
                    Ok(Outcome::NoActionTaken {
                        entry: entry.clone(),
                        reason: SkipReason::SearchTextAbsent { file: path },
                    })
                }
            }
        }
        RemediationAction::Unsupported { kind, reason } => {
            warn!(
                entry_id = entry.id,
                action_type = %kind,
                reason = %reason,
                "unknown action type, no action taken"
            );
            Ok(Outcome::NoActionTaken {
                entry: entry.clone(),
                reason: SkipReason::UnsupportedAction {
                    kind: kind.clone(),
                    reason: reason.clone(),
                },
            })
        }
    }
}

/// Replace the first occurrence of `search` in the file at `path`.
///
/// The new content replaces the old in one rename, so readers see either the
/// original or the patched file, never a partial write.
///
/// # Errors
///
/// Returns [`PatchError::FileNotFound`] if `path` does not exist and
/// [`PatchError::Io`] if it cannot be read or rewritten.
pub async fn apply_patch_replace(
    path: &Path,
    search: &str,
    replace: &str,
) -> Result<PatchOutcome, PatchError> {
    let target = match tokio::fs::canonicalize(path).await {
        Ok(p) => p,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PatchError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(PatchError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let content = tokio::fs::read_to_string(&target)
        .await
        .map_err(|source| PatchError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if !content.contains(search) {
        return Ok(PatchOutcome::SearchTextAbsent);
    }

    let patched = content.replacen(search, replace, 1);

    tokio::task::spawn_blocking(move || write_atomic(&target, &patched))
        .await
        .map_err(|e| PatchError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other(format!("patch write task panicked: {e}")),
        })?
        .map_err(|source| PatchError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(PatchOutcome::Replaced)
}

/// Write `contents` to a temp file beside `path` and rename it into place,
/// keeping the original file's permissions.
fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let permissions = std::fs::metadata(path)?.permissions();

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
