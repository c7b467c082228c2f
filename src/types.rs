//! Core ledger types

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Smallest indivisible unit of value held in escrow.
pub type Amount = u64;

/// Number of `Amount` units that make up one whole token.
pub const UNITS_PER_TOKEN: Amount = 1_000_000_000;

/// Default prefix stripped from post URLs before they are used as references.
pub const DEFAULT_REFERENCE_PREFIX: &str = "https://twitter.com/";

/// Identity of a caller (account address or hotkey).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Create an identity, rejecting blank values.
    pub fn new(value: impl Into<String>) -> LedgerResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(LedgerError::InvalidInput(
                "caller identity must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Auto-incrementing bounty identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BountyId(pub u64);

impl fmt::Display for BountyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier of a piece of external content, e.g.
/// `deturb/status/1026354757718355968`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRef(String);

impl ContentRef {
    /// Parse a bare reference or a full post URL.
    ///
    /// URLs must start with `prefix` (scheme and `www.`/`mobile.` host
    /// variants are tolerated). Query strings, fragments and trailing
    /// slashes are dropped and the path is percent-decoded.
    pub fn parse(input: &str, prefix: &str) -> LedgerResult<Self> {
        let input = input.trim();
        let path = match strip_url_prefix(input, prefix) {
            Some(path) => path,
            None if looks_like_url(input) => {
                return Err(LedgerError::InvalidInput(format!(
                    "unsupported content url: {}",
                    input
                )));
            }
            None => input,
        };

        let path = path
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_matches('/');

        let decoded = urlencoding::decode(path)
            .map_err(|e| LedgerError::InvalidInput(format!("malformed reference: {}", e)))?;

        if decoded.is_empty() {
            return Err(LedgerError::InvalidInput(
                "content reference must not be empty".to_string(),
            ));
        }
        if decoded.chars().any(char::is_whitespace) {
            return Err(LedgerError::InvalidInput(format!(
                "content reference contains whitespace: {:?}",
                decoded
            )));
        }

        Ok(Self(decoded.into_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Raw constructor; performs no normalization.
impl From<&str> for ContentRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn strip_scheme_and_host_variant(s: &str) -> &str {
    let s = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"))
        .unwrap_or(s);
    s.strip_prefix("www.")
        .or_else(|| s.strip_prefix("mobile."))
        .unwrap_or(s)
}

fn looks_like_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn strip_url_prefix<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() || !looks_like_url(input) {
        return None;
    }
    let host = strip_scheme_and_host_variant(prefix);
    let host = host.trim_end_matches('/');
    let rest = strip_scheme_and_host_variant(input).strip_prefix(host)?;
    // Reject `twitter.community/...` style near-misses
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// Escrow record. Only the ledger mutates it.
#[derive(Debug, Clone)]
pub struct Bounty {
    pub(crate) issuer: Identity,
    pub(crate) fulfillment_amount: Amount,
    pub(crate) balance: Amount,
    pub(crate) target: ContentRef,
    pub(crate) required_text: Option<String>,
    pub(crate) used_references: HashSet<ContentRef>,
    pub(crate) open: bool,
    pub(crate) fulfillments: u64,
    pub(crate) created_at: DateTime<Utc>,
}

impl Bounty {
    pub(crate) fn new(
        issuer: Identity,
        fulfillment_amount: Amount,
        target: ContentRef,
        required_text: Option<String>,
        initial_contribution: Amount,
    ) -> Self {
        let mut used_references = HashSet::new();
        used_references.insert(target.clone());
        Self {
            issuer,
            fulfillment_amount,
            balance: initial_contribution,
            target,
            required_text,
            used_references,
            open: true,
            fulfillments: 0,
            created_at: Utc::now(),
        }
    }

    pub fn issuer(&self) -> &Identity {
        &self.issuer
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn has_used(&self, reference: &ContentRef) -> bool {
        self.used_references.contains(reference)
    }

    pub(crate) fn view(&self, id: BountyId) -> BountyView {
        BountyView {
            id,
            issuer: self.issuer.clone(),
            fulfillment_amount: self.fulfillment_amount,
            balance: self.balance,
            target: self.target.clone(),
            required_text: self.required_text.clone(),
            open: self.open,
            fulfillments: self.fulfillments,
            created_at: self.created_at,
        }
    }
}

/// Read model returned by `get_bounty`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BountyView {
    pub id: BountyId,
    pub issuer: Identity,
    pub fulfillment_amount: Amount,
    pub balance: Amount,
    pub target: ContentRef,
    /// `None` until the oracle has resolved the target content.
    pub required_text: Option<String>,
    pub open: bool,
    pub fulfillments: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionState {
    Requested,
    Resolved,
}

/// Cached oracle answer for one reference. Created once, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRecord {
    pub state: ResolutionState,
    pub text: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl OracleRecord {
    pub(crate) fn requested() -> Self {
        Self {
            state: ResolutionState::Requested,
            text: None,
            requested_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn resolved_text(&self) -> Option<&str> {
        match self.state {
            ResolutionState::Resolved => self.text.as_deref(),
            ResolutionState::Requested => None,
        }
    }
}
