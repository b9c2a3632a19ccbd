//! Escalation of unrecognized failures as GitHub issues.
//!
//! When no mapping matches, a [`Report`] is built from the tail of the log
//! and handed to an [`Escalator`]. A missing repository or token means the
//! escalation is skipped; [`GitHubEscalator::from_target`] returns `None` in
//! that case instead of failing.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::EscalationConfig;

/// GitHub media type for the v3 REST API.
const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

/// Title and body of a report to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Issue title.
    pub title: String,
    /// Issue body (Markdown).
    pub body: String,
}

/// A report that was opened successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalation {
    /// Link to the opened issue, when the API returned one.
    pub url: Option<String>,
}

/// Transport failure while escalating.
#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request did not complete.
    #[error("issue request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("issue API returned status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },
}

/// Opens human-visible reports in an external tracker.
#[async_trait]
pub trait Escalator: Send + Sync {
    /// Open `report` and return a handle to it.
    async fn escalate(&self, report: &Report) -> Result<Escalation, EscalationError>;
}

/// Destination and credential for escalation, resolved by the caller.
#[derive(Clone, Default)]
pub struct EscalationTarget {
    /// GitHub `owner/repo`.
    pub repository: Option<String>,
    /// API token.
    pub token: Option<String>,
}

impl std::fmt::Debug for EscalationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationTarget")
            .field("repository", &self.repository)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Issue-opening [`Escalator`] for the GitHub REST API.
pub struct GitHubEscalator {
    client: reqwest::Client,
    api_base: String,
    repository: String,
    token: String,
}

impl std::fmt::Debug for GitHubEscalator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubEscalator")
            .field("api_base", &self.api_base)
            .field("repository", &self.repository)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Subset of the issue creation response we care about.
#[derive(Debug, Deserialize)]
struct CreatedIssue {
    html_url: Option<String>,
}

impl GitHubEscalator {
    /// Build an escalator for `target`, or `None` when the repository or
    /// token is missing or blank.
    ///
    /// # Errors
    ///
    /// Returns [`EscalationError::Client`] if the HTTP client cannot be built.
    pub fn from_target(
        config: &EscalationConfig,
        target: &EscalationTarget,
    ) -> Result<Option<Self>, EscalationError> {
        let (Some(repository), Some(token)) = (
            non_blank(target.repository.as_deref()),
            non_blank(target.token.as_deref()),
        ) else {
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("autoheal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(EscalationError::Client)?;

        Ok(Some(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            repository,
            token,
        }))
    }

    /// The `owner/repo` issues are opened in.
    pub fn repository(&self) -> &str {
        &self.repository
    }
}

#[async_trait]
impl Escalator for GitHubEscalator {
    async fn escalate(&self, report: &Report) -> Result<Escalation, EscalationError> {
        let url = format!("{}/repos/{}/issues", self.api_base, self.repository);
        let response = self
            .client
            .post(&url)
            .header("authorization", format!("token {}", self.token))
            .header("accept", GITHUB_ACCEPT)
            .json(&serde_json::json!({
                "title": report.title,
                "body": report.body,
            }))
            .send()
            .await?;

        let status = response.status().as_u16();
        info!(status, "issue creation status");

        if !matches!(status, 200 | 201) {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "issue creation rejected");
            return Err(EscalationError::Rejected { status, body });
        }

        let created: CreatedIssue = response.json().await?;
        if let Some(link) = &created.html_url {
            info!(url = %link, "created issue");
        }
        Ok(Escalation {
            url: created.html_url,
        })
    }
}

/// Trimmed value, or `None` when absent or blank.
fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Build the report for a log no mapping matched.
pub fn build_report(log_text: &str, config: &EscalationConfig) -> Report {
    let snippet = log_tail(log_text, config.tail_lines);
    let body = format!(
        "An automated run failed and no mapping matched.\n\n\
         Last part of log:\n```\n{snippet}\n```\n\
         You can teach the system by running \
         `autoheal teach --signature <pattern> --file <path> --search <text> --replace <text>` \
         to add a mapping."
    );
    Report {
        title: config.title.clone(),
        body,
    }
}

/// The last `lines` lines of `log_text`, joined with `\n`.
///
/// Bare `\r` counts as a line break, so progress-bar redraws in CI output
/// become separate lines.
pub fn log_tail(log_text: &str, lines: usize) -> String {
    let all = split_lines(log_text);
    let start = all.len().saturating_sub(lines);
    all.get(start..).unwrap_or_default().join("\n")
}

/// Split on every line boundary: `\r\n`, `\n`, `\r`, vertical tab, form
/// feed, the file/group/record separators, NEL, and the Unicode line and
/// paragraph separators. A trailing boundary does not start an empty line.
fn split_lines(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        match rest.char_indices().find(|(_, c)| is_line_boundary(*c)) {
            Some((at, c)) => {
                out.push(&rest[..at]);
                let skip = if c == '\r' && rest[at..].starts_with("\r\n") {
                    2
                } else {
                    c.len_utf8()
                };
                rest = &rest[at.saturating_add(skip)..];
            }
            None => {
                out.push(rest);
                break;
            }
        }
    }
    out
}

fn is_line_boundary(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}
