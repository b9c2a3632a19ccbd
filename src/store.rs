//! Mapping store backed by SQLite.
//!
//! Holds the registry of failure signatures and the remediation recorded for
//! each, plus a hit counter per entry. The schema is applied inline via
//! `include_str!` on open and matches databases written by earlier healer
//! tooling, so an existing `db.sqlite` committed to a repository keeps working.
//!
//! Every public operation is a single SQL statement and therefore its own
//! durable unit of work. The rollback journal is used instead of WAL so the
//! database file is self-contained when it is committed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Tag stored in `action_type` for [`RemediationAction::PatchReplace`].
pub const PATCH_REPLACE_KIND: &str = "patch_replace";

/// Errors raised by mapping store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The signature or action was rejected before anything was written.
    #[error("invalid mapping: {0}")]
    Validation(String),

    /// No entry exists with the given id.
    #[error("mapping {id} not found")]
    NotFound {
        /// The id that was looked up.
        id: i64,
    },

    /// The store's parent directory could not be created.
    #[error("failed to prepare store directory {path}: {source}")]
    Io {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The database rejected or failed an operation.
    #[error("mapping store error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What to do when an entry's signature matches a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationAction {
    /// Replace the first occurrence of `search` in `file` with `replace`.
    PatchReplace {
        /// File to patch. Relative paths resolve against the working tree.
        file: PathBuf,
        /// Literal text to look for.
        search: String,
        /// Replacement text.
        replace: String,
    },
    /// An action this binary does not understand. Never applied.
    Unsupported {
        /// The stored action tag, or empty when none was stored.
        kind: String,
        /// Why the action could not be decoded.
        reason: String,
    },
}

/// JSON payload stored in `action_payload` for patch-replace actions.
#[derive(Debug, Serialize, Deserialize)]
struct PatchReplacePayload {
    file: String,
    search: String,
    replace: String,
}

impl RemediationAction {
    /// Construct a patch-replace action.
    pub fn patch_replace(
        file: impl Into<PathBuf>,
        search: impl Into<String>,
        replace: impl Into<String>,
    ) -> Self {
        Self::PatchReplace {
            file: file.into(),
            search: search.into(),
            replace: replace.into(),
        }
    }

    /// The action tag as stored in the database.
    pub fn kind(&self) -> &str {
        match self {
            Self::PatchReplace { .. } => PATCH_REPLACE_KIND,
            Self::Unsupported { kind, .. } => kind,
        }
    }

    /// Decode a stored `(action_type, action_payload)` pair.
    ///
    /// Anything that does not decode to a known variant becomes
    /// [`RemediationAction::Unsupported`] rather than an error.
    pub fn decode(kind: Option<&str>, payload: Option<&str>) -> Self {
        let kind = kind.unwrap_or_default();
        if kind != PATCH_REPLACE_KIND {
            return Self::Unsupported {
                kind: kind.to_owned(),
                reason: format!("unknown action type '{kind}'"),
            };
        }

        let Some(payload) = payload else {
            return Self::Unsupported {
                kind: kind.to_owned(),
                reason: "missing action payload".to_owned(),
            };
        };

        match serde_json::from_str::<PatchReplacePayload>(payload) {
            Ok(p) if p.file.is_empty() => Self::Unsupported {
                kind: kind.to_owned(),
                reason: "patch_replace payload has an empty file path".to_owned(),
            },
            Ok(p) => Self::PatchReplace {
                file: PathBuf::from(p.file),
                search: p.search,
                replace: p.replace,
            },
            Err(e) => Self::Unsupported {
                kind: kind.to_owned(),
                reason: format!("invalid patch_replace payload: {e}"),
            },
        }
    }

    /// Encode into the stored `(action_type, action_payload)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for unsupported actions, empty or
    /// non-UTF-8 file paths.
    pub fn encode(&self) -> Result<(String, String), StoreError> {
        match self {
            Self::PatchReplace {
                file,
                search,
                replace,
            } => {
                let file = file.to_str().ok_or_else(|| {
                    StoreError::Validation("file path is not valid UTF-8".to_owned())
                })?;
                if file.is_empty() {
                    return Err(StoreError::Validation("file path is empty".to_owned()));
                }
                let payload = PatchReplacePayload {
                    file: file.to_owned(),
                    search: search.clone(),
                    replace: replace.clone(),
                };
                let json = serde_json::to_string(&payload).map_err(|e| {
                    StoreError::Validation(format!("failed to encode action payload: {e}"))
                })?;
                Ok((PATCH_REPLACE_KIND.to_owned(), json))
            }
            Self::Unsupported { kind, .. } => Err(StoreError::Validation(format!(
                "unsupported action type '{kind}'"
            ))),
        }
    }
}

/// A remediation rule: signature, action, and usage counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    /// Auto-increment row id. Never reused.
    pub id: i64,
    /// Regex or literal matched against log text.
    pub signature: String,
    /// What to do on match.
    pub action: RemediationAction,
    /// Number of successful applications.
    pub hit_count: i64,
    /// Insertion time (`YYYY-MM-DD HH:MM:SS`, UTC).
    pub created_at: String,
}

/// Raw row tuple from the `mappings` table.
type MappingRow = (
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<String>,
);

/// Convert a raw `mappings` row tuple into a [`MappingEntry`].
fn mapping_row_into_entry(row: MappingRow) -> MappingEntry {
    let (id, signature, action_type, action_payload, hit_count, created_at) = row;
    MappingEntry {
        id,
        signature: signature.unwrap_or_default(),
        action: RemediationAction::decode(action_type.as_deref(), action_payload.as_deref()),
        hit_count: hit_count.unwrap_or(0),
        created_at: created_at.unwrap_or_default(),
    }
}

/// Persisted registry of mapping entries.
pub struct MappingStore {
    pool: SqlitePool,
}

impl MappingStore {
    /// Open (or create) the store at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the database
    /// cannot be opened, or the schema cannot be applied.
    pub async fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete)
            .busy_timeout(busy_timeout)
            .pragma("trusted_schema", "OFF");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let schema = include_str!("../migrations/001_autoheal_schema.sql");
        sqlx::raw_sql(schema).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// All entries in ascending id order, which is insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn list_entries(&self) -> Result<Vec<MappingEntry>, StoreError> {
        let rows = sqlx::query_as::<_, MappingRow>(
            "SELECT id, signature, action_type, action_payload, hit_count, created_at
             FROM mappings
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(mapping_row_into_entry).collect())
    }

    /// Fetch a single entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no entry has this id.
    pub async fn get(&self, id: i64) -> Result<MappingEntry, StoreError> {
        let row = sqlx::query_as::<_, MappingRow>(
            "SELECT id, signature, action_type, action_payload, hit_count, created_at
             FROM mappings
             WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(mapping_row_into_entry)
            .ok_or(StoreError::NotFound { id })
    }

    /// Increment the hit counter of entry `id` by one.
    ///
    /// The increment happens inside the database, so concurrent runs hitting
    /// the same entry never lose an update.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no entry has this id.
    pub async fn record_hit(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE mappings SET hit_count = COALESCE(hit_count, 0) + 1 WHERE id = ?1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }

    /// Append a new entry with a zero hit count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] if the signature is empty or the
    /// action cannot be stored. Nothing is written in that case.
    pub async fn insert(
        &self,
        signature: &str,
        action: &RemediationAction,
    ) -> Result<MappingEntry, StoreError> {
        if signature.is_empty() {
            return Err(StoreError::Validation("signature is empty".to_owned()));
        }
        let (action_type, action_payload) = action.encode()?;
        let created_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let result = sqlx::query(
            "INSERT INTO mappings (signature, action_type, action_payload, hit_count, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
        )
        .bind(signature)
        .bind(&action_type)
        .bind(&action_payload)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        Ok(MappingEntry {
            id: result.last_insert_rowid(),
            signature: signature.to_owned(),
            action: action.clone(),
            hit_count: 0,
            created_at,
        })
    }

    /// Close the connection pool, flushing pending work.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
