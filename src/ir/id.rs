//! Statement identifiers.
//!
//! Every statement node carries a [`StmtId`]: either a fresh, process-unique
//! synthetic tag or a user-supplied name. Synthetic IDs are produced by an
//! atomic monotonic counter and prefixed with `#` so introspection (and
//! serialization) can tell them apart from user names.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Prefix character reserved for synthetic IDs.
pub const SYNTHETIC_PREFIX: char = '#';

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Identifier of a statement node.
///
/// Equality is string equality; the hash is precomputed at construction so
/// IDs are cheap to use as map keys during analysis.
#[derive(Debug, Clone)]
pub struct StmtId {
    text: Arc<str>,
    hash: u64,
}

impl StmtId {
    /// Allocate a fresh synthetic ID.
    pub fn fresh() -> Self {
        let n = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self::named(format!("{SYNTHETIC_PREFIX}{n}"))
    }

    /// Create an ID from a user-supplied name.
    pub fn named(text: impl Into<String>) -> Self {
        let text: Arc<str> = Arc::from(text.into());
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        StmtId {
            hash: hasher.finish(),
            text,
        }
    }

    /// Derive a suffixed ID, as done by transformations that split one
    /// statement into several (`".a"`, `".b"`, `".0"`, `".1"`, ...).
    pub fn derived(&self, suffix: &str) -> Self {
        Self::named(format!("{}{suffix}", self.text))
    }

    /// Whether this ID was generated by the counter rather than a user.
    pub fn is_synthetic(&self) -> bool {
        self.text.starts_with(SYNTHETIC_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl PartialEq for StmtId {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.text == other.text
    }
}

impl Eq for StmtId {}

impl Hash for StmtId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl From<&str> for StmtId {
    fn from(s: &str) -> Self {
        StmtId::named(s)
    }
}

impl From<String> for StmtId {
    fn from(s: String) -> Self {
        StmtId::named(s)
    }
}
