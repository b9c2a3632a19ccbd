//! One healing run: remediate, then publish or escalate.
//!
//! Produces a [`RunReport`] that tells every terminal state apart so an
//! operator can see what happened without reading internals. A patch that
//! was applied but could not be published stays applied; the report says
//! so and the publish step can be retried on its own.

use std::path::Path;

use tracing::{error, info, warn};

use crate::config::HealerConfig;
use crate::escalation::{self, Escalator};
use crate::publisher::{PublishOutcome, PublishScope, Publisher};
use crate::remediation::{self, Outcome, RemediationError};
use crate::store::{MappingStore, StoreError};

/// Terminal state of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// Matched, applied, and published.
    Published {
        /// Id of the applied entry.
        entry_id: i64,
        /// Its signature.
        signature: String,
        /// How the change was published.
        outcome: PublishOutcome,
    },
    /// Matched and applied locally, but not published.
    AppliedNotPublished {
        /// Id of the applied entry.
        entry_id: i64,
        /// Its signature.
        signature: String,
        /// Why publishing did not happen.
        reason: String,
    },
    /// Matched, but the fix could not be applied.
    NotApplicable {
        /// Id of the matched entry.
        entry_id: i64,
        /// Its signature.
        signature: String,
        /// Why the fix was not applied.
        reason: String,
    },
    /// No match; a report was opened.
    Escalated {
        /// Link to the report, if known.
        url: Option<String>,
    },
    /// No match, and no report was opened.
    NotEscalated {
        /// Why escalation did not happen.
        reason: String,
    },
}

impl RunReport {
    /// Process exit code: 0 only when a fix was applied and published.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Published { .. } => 0,
            _ => 1,
        }
    }
}

/// Run remediation for `log_text` and publish or escalate the result.
///
/// `escalator` is `None` when no destination or credential is configured.
///
/// # Errors
///
/// Returns an error only when the mapping store fails. File and transport
/// problems are reported through [`RunReport`].
pub async fn run(
    log_text: &str,
    store: &MappingStore,
    workdir: &Path,
    publisher: &dyn Publisher,
    escalator: Option<&dyn Escalator>,
    config: &HealerConfig,
) -> Result<RunReport, StoreError> {
    let outcome = match remediation::remediate(log_text, store, workdir).await {
        Ok(outcome) => outcome,
        Err(RemediationError::Store(e)) => return Err(e),
        Err(RemediationError::Apply { entry, source }) => {
            error!(entry_id = entry.id, error = %source, "error applying patch");
            return Ok(RunReport::NotApplicable {
                entry_id: entry.id,
                signature: entry.signature,
                reason: source.to_string(),
            });
        }
    };

    let report = match outcome {
        Outcome::Applied { entry } => {
            let message = config.publish.run_message(&entry.signature);
            match publisher.publish(&message, &PublishScope::AllChanges).await {
                Ok(PublishOutcome::NothingToCommit) => {
                    warn!(entry_id = entry.id, "applied patch but there was nothing to commit");
                    RunReport::AppliedNotPublished {
                        entry_id: entry.id,
                        signature: entry.signature,
                        reason: "nothing to commit".to_owned(),
                    }
                }
                Ok(outcome) => {
                    info!(entry_id = entry.id, outcome = ?outcome, "published fix");
                    RunReport::Published {
                        entry_id: entry.id,
                        signature: entry.signature,
                        outcome,
                    }
                }
                Err(e) => {
                    error!(
                        entry_id = entry.id,
                        error = %e,
                        "applied patch locally but could not publish; retry the publish step"
                    );
                    RunReport::AppliedNotPublished {
                        entry_id: entry.id,
                        signature: entry.signature,
                        reason: e.to_string(),
                    }
                }
            }
        }
        Outcome::NoActionTaken { entry, reason } => {
            info!(entry_id = entry.id, reason = %reason, "mapping found but patch not applied");
            RunReport::NotApplicable {
                entry_id: entry.id,
                signature: entry.signature,
                reason: reason.to_string(),
            }
        }
        Outcome::NoMatch => escalate(log_text, escalator, config).await,
    };

    Ok(report)
}

/// Open a report for an unmatched log, if an escalator is available.
async fn escalate(
    log_text: &str,
    escalator: Option<&dyn Escalator>,
    config: &HealerConfig,
) -> RunReport {
    let Some(escalator) = escalator else {
        info!("no token/repo configured, skipping escalation");
        return RunReport::NotEscalated {
            reason: "no escalation destination or credential configured".to_owned(),
        };
    };

    let report = escalation::build_report(log_text, &config.escalation);
    match escalator.escalate(&report).await {
        Ok(escalation) => RunReport::Escalated {
            url: escalation.url,
        },
        Err(e) => {
            error!(error = %e, "failed to create issue");
            RunReport::NotEscalated {
                reason: e.to_string(),
            }
        }
    }
}
