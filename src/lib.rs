//! Autoheal: a minimal self-healing loop for CI failures.
//!
//! Matches a failure log against known signatures stored in a SQLite mapping
//! table, applies the recorded text replacement, and commits the result.
//! When nothing matches, the tail of the log is escalated as a GitHub issue.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration loading and validation.
pub mod config;
/// Escalation of unmatched failures as issues.
pub mod escalation;
/// One healing run: remediate, then publish or escalate.
pub mod heal;
/// Structured logging setup.
pub mod logging;
/// Signature matching against log text.
pub mod matcher;
/// Publishing applied fixes through git.
pub mod publisher;
/// Applying matched remediation actions.
pub mod remediation;
/// SQLite mapping store.
pub mod store;
/// Teaching new mappings.
pub mod teach;
