//! Configuration loading for the healer.
//!
//! Loads `autoheal.toml` with per-section defaults. All sections use
//! `#[serde(default)]` so a minimal, empty, or absent config file is valid.
//! Destination and credential values for escalation are not read here; the
//! CLI layer resolves them and passes an explicit [`EscalationTarget`].
//!
//! [`EscalationTarget`]: crate::escalation::EscalationTarget

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Top-level healer configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealerConfig {
    /// Mapping store connection settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Commit and push behavior after a fix is applied.
    #[serde(default)]
    pub publish: PublishConfig,

    /// Issue reporting when no mapping matches.
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Optional file logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Mapping store connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// How long a writer waits on a locked database before giving up.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Busy timeout as a [`Duration`].
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Commit and push behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// Push to the remote after committing a fix.
    #[serde(default = "default_true")]
    pub push: bool,

    /// Remote to push to. `None` uses the branch's configured upstream.
    #[serde(default)]
    pub remote: Option<String>,

    /// Branch to push. Only used together with `remote`.
    #[serde(default)]
    pub branch: Option<String>,

    /// Committer name for healer commits.
    #[serde(default = "default_user_name")]
    pub user_name: String,

    /// Committer email for healer commits.
    #[serde(default = "default_user_email")]
    pub user_email: String,

    /// Commit message for applied fixes. `{signature}` is substituted.
    #[serde(default = "default_run_message_template")]
    pub run_message_template: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            push: true,
            remote: None,
            branch: None,
            user_name: default_user_name(),
            user_email: default_user_email(),
            run_message_template: default_run_message_template(),
        }
    }
}

impl PublishConfig {
    /// Render the commit message for a fix applied for `signature`.
    pub fn run_message(&self, signature: &str) -> String {
        self.run_message_template.replace("{signature}", signature)
    }
}

/// Issue reporting settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EscalationConfig {
    /// Title of issues opened for unrecognized failures.
    #[serde(default = "default_issue_title")]
    pub title: String,

    /// Number of trailing log lines embedded in the issue body.
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,

    /// Base URL of the GitHub REST API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Request timeout for the issue API call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            title: default_issue_title(),
            tail_lines: default_tail_lines(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// File logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily-rotated JSON logs. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: default_log_level(),
        }
    }
}

impl HealerConfig {
    /// Validate that configuration values are within sane bounds.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.escalation.tail_lines > 0,
            "escalation.tail_lines must be > 0"
        );
        anyhow::ensure!(
            self.escalation.timeout_secs > 0,
            "escalation.timeout_secs must be > 0"
        );
        anyhow::ensure!(
            !self.escalation.api_base.trim().is_empty(),
            "escalation.api_base must not be empty"
        );
        anyhow::ensure!(
            !self.publish.user_name.trim().is_empty() && !self.publish.user_email.trim().is_empty(),
            "publish.user_name and publish.user_email must not be empty"
        );
        anyhow::ensure!(
            !self.logging.level.trim().is_empty(),
            "logging.level must not be empty"
        );
        anyhow::ensure!(
            self.publish.branch.is_none() || self.publish.remote.is_some(),
            "publish.branch requires publish.remote"
        );
        Ok(())
    }
}

/// Load healer configuration from a TOML file.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or fails
/// validation.
pub fn load_config(path: &Path) -> anyhow::Result<HealerConfig> {
    if !path.exists() {
        return Ok(HealerConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read healer config at {}", path.display()))?;
    let config: HealerConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse healer config at {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

// Default value functions for serde.

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_user_name() -> String {
    "auto-heal-bot".to_owned()
}

fn default_user_email() -> String {
    "auto-heal@example.com".to_owned()
}

fn default_run_message_template() -> String {
    "Auto-heal: applied fix for signature '{signature}'".to_owned()
}

fn default_issue_title() -> String {
    "[Auto-Heal] Unrecognized failure - please investigate".to_owned()
}

fn default_tail_lines() -> usize {
    80
}

fn default_api_base() -> String {
    "https://api.github.com".to_owned()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_owned()
}
