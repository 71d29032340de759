//! Identity resolution: normalizing raw identifiers and unifying them into
//! canonical profile keys via union-find.
//!
//! Grounded on `rostra-core/src/id.rs`'s style of associated parsing
//! functions plus a `snafu` error enum, adapted from byte-encoding to
//! union-find over strings.

use std::collections::HashMap;
use std::sync::RwLock;

use snafu::ensure;
use tracing::trace;

use crate::error::{EmptyIdentifierListSnafu, IdentityResult};

const LOG_TARGET: &str = "cdp::identity";

/// A profile identifier is just its canonical, normalized string form (e.g.
/// `user:alice`), chosen deterministically by [`IdentityGraph::union`].
pub type ProfileId = String;

/// Normalizes a raw identifier string into its namespaced form.
///
/// - Trims surrounding whitespace.
/// - Keeps an existing `user:`/`email:`/`anon:` prefix (lowercasing the value
///   for `email:`).
/// - Otherwise infers the namespace: contains `@` → `email:`; contains
///   `anon` (case-insensitive) or starts with `anon-` → `anon:`; else
///   `user:`.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();

    if let Some(value) = trimmed.strip_prefix("email:") {
        return format!("email:{}", value.trim().to_lowercase());
    }
    if let Some(value) = trimmed.strip_prefix("user:") {
        return format!("user:{}", value.trim());
    }
    if let Some(value) = trimmed.strip_prefix("anon:") {
        return format!("anon:{}", value.trim());
    }

    if trimmed.contains('@') {
        return format!("email:{}", trimmed.to_lowercase());
    }
    if trimmed.to_lowercase().contains("anon") || trimmed.starts_with("anon-") {
        return format!("anon:{trimmed}");
    }
    format!("user:{trimmed}")
}

struct Node {
    parent: String,
    rank: u32,
}

struct Inner {
    nodes: HashMap<String, Node>,
}

impl Inner {
    fn find(&mut self, id: &str) -> String {
        if !self.nodes.contains_key(id) {
            self.nodes.insert(
                id.to_string(),
                Node {
                    parent: id.to_string(),
                    rank: 0,
                },
            );
            return id.to_string();
        }

        let parent = self.nodes.get(id).expect("just checked").parent.clone();
        if parent == id {
            return parent;
        }

        let root = self.find(&parent);
        self.nodes.get_mut(id).expect("present").parent = root.clone();
        root
    }

    fn union(&mut self, a: &str, b: &str) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }

        let rank_a = self.nodes.get(&root_a).expect("rooted").rank;
        let rank_b = self.nodes.get(&root_b).expect("rooted").rank;

        // Deterministic tie-break: lexicographically smaller id wins so
        // canonical ids don't depend on observation order.
        let (winner, loser) = match rank_a.cmp(&rank_b) {
            std::cmp::Ordering::Greater => (root_a, root_b),
            std::cmp::Ordering::Less => (root_b, root_a),
            std::cmp::Ordering::Equal => {
                if root_a <= root_b {
                    (root_a, root_b)
                } else {
                    (root_b, root_a)
                }
            }
        };

        let loser_rank = self.nodes.get(&loser).expect("rooted").rank;
        let winner_rank = self.nodes.get(&winner).expect("rooted").rank;
        self.nodes.get_mut(&loser).expect("rooted").parent = winner.clone();
        if winner_rank == loser_rank {
            self.nodes.get_mut(&winner).expect("rooted").rank += 1;
        }
    }
}

/// Union-find over normalized identifiers, resolving any set of identifiers
/// to one stable canonical [`ProfileId`].
///
/// Concurrency: a single `RwLock` guards the whole parent/rank map. No
/// operation ever awaits while holding it, so `std::sync::RwLock` is used
/// rather than `tokio::sync::RwLock`.
pub struct IdentityGraph {
    inner: RwLock<Inner>,
}

impl Default for IdentityGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityGraph {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                nodes: HashMap::new(),
            }),
        }
    }

    /// Returns the canonical root for a normalized identifier, creating it
    /// lazily if unseen.
    pub fn find(&self, id: &str) -> ProfileId {
        let normalized = normalize(id);
        self.inner
            .write()
            .expect("identity graph lock poisoned")
            .find(&normalized)
    }

    /// Unions two normalized identifiers into one profile.
    pub fn union(&self, a: &str, b: &str) {
        let a = normalize(a);
        let b = normalize(b);
        self.inner
            .write()
            .expect("identity graph lock poisoned")
            .union(&a, &b);
    }

    /// Normalizes and unions every identifier in `ids` onto the first,
    /// returning the resulting canonical id.
    pub fn canonical_id_for(&self, ids: &[&str]) -> IdentityResult<ProfileId> {
        ensure!(!ids.is_empty(), EmptyIdentifierListSnafu);

        let normalized: Vec<String> = ids.iter().map(|id| normalize(id)).collect();
        let mut inner = self.inner.write().expect("identity graph lock poisoned");

        let first = &normalized[0];
        for other in &normalized[1..] {
            inner.union(first, other);
        }

        let canonical = inner.find(first);
        trace!(target: LOG_TARGET, canonical = %canonical, count = normalized.len(), "resolved identity");
        Ok(canonical)
    }
}
