//! Signature matching against failure logs.
//!
//! A signature is compiled in up to three tiers, all multi-line (`^` and `$`
//! anchor at line boundaries):
//!
//! 1. the linear-time `regex` engine;
//! 2. `fancy-regex` for lookaround and backreferences, which databases
//!    written by earlier healer tooling may contain;
//! 3. plain substring containment when neither engine accepts the pattern.
//!
//! Entries are scanned in ascending id order and the first hit wins.

use tracing::warn;

use crate::store::MappingEntry;

/// How a signature was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// The signature compiled with the linear-time engine.
    Regex,
    /// The signature needed lookaround or backreferences.
    Backtracking,
    /// The signature is not a valid pattern and was found as a substring.
    Literal,
}

/// The entry chosen for a log, valid for one run only.
#[derive(Debug, Clone, Copy)]
pub struct MatchResult<'a> {
    /// The matching entry.
    pub entry: &'a MappingEntry,
    /// The log text that triggered the match.
    pub log_text: &'a str,
    /// Which tier matched the signature.
    pub mode: MatchMode,
}

/// A signature ready to be tested against log text.
#[derive(Debug)]
pub enum CompiledSignature {
    /// Accepted by the `regex` crate.
    Regex(regex::Regex),
    /// Accepted only by `fancy-regex`.
    Backtracking(fancy_regex::Regex),
    /// Rejected by both engines; matched by containment.
    Literal(String),
}

impl CompiledSignature {
    /// Compile `signature`, falling through the tiers. `None` for an empty
    /// signature, which never matches.
    pub fn compile(signature: &str) -> Option<Self> {
        if signature.is_empty() {
            return None;
        }
        if let Ok(re) = regex::RegexBuilder::new(signature)
            .multi_line(true)
            .build()
        {
            return Some(Self::Regex(re));
        }
        if let Ok(re) = fancy_regex::Regex::new(&format!("(?m){signature}")) {
            return Some(Self::Backtracking(re));
        }
        Some(Self::Literal(signature.to_owned()))
    }

    /// The tier this signature compiled to.
    pub fn mode(&self) -> MatchMode {
        match self {
            Self::Regex(_) => MatchMode::Regex,
            Self::Backtracking(_) => MatchMode::Backtracking,
            Self::Literal(_) => MatchMode::Literal,
        }
    }

    /// Test against `log_text`.
    ///
    /// A backtracking pattern that exceeds its backtrack limit counts as no
    /// match.
    pub fn is_match(&self, log_text: &str) -> bool {
        match self {
            Self::Regex(re) => re.is_match(log_text),
            Self::Backtracking(re) => match re.is_match(log_text) {
                Ok(hit) => hit,
                Err(e) => {
                    warn!(pattern = %re.as_str(), error = %e, "signature evaluation aborted");
                    false
                }
            },
            Self::Literal(literal) => log_text.contains(literal.as_str()),
        }
    }
}

/// Find the lowest-id entry whose signature matches `log_text`.
///
/// Entries with an empty signature never match. Entries whose signature is
/// not a valid pattern in either engine are logged and matched literally.
pub fn find_match<'a>(log_text: &'a str, entries: &'a [MappingEntry]) -> Option<MatchResult<'a>> {
    let mut ordered: Vec<&MappingEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.id);

    ordered.into_iter().find_map(|entry| {
        let compiled = CompiledSignature::compile(&entry.signature)?;
        if compiled.mode() == MatchMode::Literal {
            warn!(
                entry_id = entry.id,
                signature = %entry.signature,
                "signature is not a valid regex, matching as literal text"
            );
        }
        compiled.is_match(log_text).then(|| MatchResult {
            entry,
            log_text,
            mode: compiled.mode(),
        })
    })
}

/// Test a single signature against log text.
///
/// Returns how it matched, or `None` if it does not match.
pub fn signature_match(signature: &str, log_text: &str) -> Option<MatchMode> {
    let compiled = CompiledSignature::compile(signature)?;
    compiled.is_match(log_text).then(|| compiled.mode())
}
