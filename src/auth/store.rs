//! Static bearer-token allow-list with per-token request counters.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::AuthError;

type TokenDigest = [u8; 32];

/// Usage counters for one token, as shown by `/stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub num_of_requests: u64,
}

struct Entry {
    token: String,
    requests: AtomicU64,
}

/// Tokens are fixed at construction. Lookups go through a SHA-256 digest
/// so the raw token is only compared once it has already matched.
pub struct TokenStore {
    entries: HashMap<TokenDigest, Entry>,
}

impl TokenStore {
    /// Load a newline-delimited token list. Blank lines are skipped,
    /// surrounding whitespace stripped, duplicates collapsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| AuthError::TokenFile {
            path: path.display().to_string(),
            source,
        })?;
        let store = Self::from_tokens(contents.lines());
        if store.is_empty() {
            tracing::warn!(path = %path.display(), "token file contains no tokens, every secured request will be rejected");
        }
        Ok(store)
    }

    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = HashMap::new();
        for token in tokens {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }
            entries.entry(digest(token)).or_insert_with(|| Entry {
                token: token.to_string(),
                requests: AtomicU64::new(0),
            });
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, token: &str) -> Option<&Entry> {
        self.entries
            .get(&digest(token))
            .filter(|entry| constant_time_compare(entry.token.as_bytes(), token.as_bytes()))
    }

    pub fn verify(&self, token: &str) -> bool {
        self.lookup(token).is_some()
    }

    /// Count one request. Returns the new total.
    pub fn record_use(&self, token: &str) -> Result<u64, AuthError> {
        let entry = self.lookup(token).ok_or(AuthError::UnknownToken)?;
        Ok(entry.requests.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Validate an `Authorization` header value and count the request.
    pub fn authorize(&self, header: Option<&str>) -> Result<String, AuthError> {
        let token = super::parse_bearer(header)?;
        self.record_use(token)?;
        Ok(token.to_string())
    }

    pub fn usage(&self, token: &str) -> Option<UsageStats> {
        self.lookup(token).map(|entry| UsageStats {
            num_of_requests: entry.requests.load(Ordering::Acquire),
        })
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> BTreeMap<String, UsageStats> {
        self.entries
            .values()
            .map(|entry| {
                (
                    entry.token.clone(),
                    UsageStats {
                        num_of_requests: entry.requests.load(Ordering::Acquire),
                    },
                )
            })
            .collect()
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("tokens", &self.entries.len())
            .finish()
    }
}

/// Short stable identifier for a token, safe to log.
pub fn fingerprint(token: &str) -> String {
    hex::encode(&digest(token)[..4])
}

fn digest(token: &str) -> TokenDigest {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
