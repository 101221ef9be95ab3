use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// Trait for token revocation backends.
///
/// Entries only need to outlive the token they revoke: once a token's own
/// expiry has passed, validation rejects it anyway and the entry can go.
/// Implementations must be thread-safe (`Send + Sync`).
pub trait RevocationStore: Send + Sync {
    /// Revoke token `id` until `expires_at`.
    fn revoke(&self, id: Uuid, expires_at: DateTime<Utc>);

    /// Revoke token `id` only if it is not revoked yet. Returns `true` for
    /// the single caller that performed the revocation.
    fn revoke_once(&self, id: Uuid, expires_at: DateTime<Utc>) -> bool;

    /// Check if token `id` has been revoked.
    fn is_revoked(&self, id: &Uuid) -> bool;

    /// Drop entries whose token expired before `now`. Returns number purged.
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory revocation set backed by DashMap. Lost on restart, which only
/// re-admits tokens that were explicitly logged out before their expiry.
pub struct InMemoryRevocationStore {
    revoked: DashMap<Uuid, DateTime<Utc>>,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self {
            revoked: DashMap::new(),
        }
    }
}

impl Default for InMemoryRevocationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RevocationStore for InMemoryRevocationStore {
    fn revoke(&self, id: Uuid, expires_at: DateTime<Utc>) {
        self.revoked.insert(id, expires_at);
    }

    fn revoke_once(&self, id: Uuid, expires_at: DateTime<Utc>) -> bool {
        match self.revoked.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                true
            }
        }
    }

    fn is_revoked(&self, id: &Uuid) -> bool {
        self.revoked.contains_key(id)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.revoked.len();
        self.revoked.retain(|_, expires_at| *expires_at >= now);
        before.saturating_sub(self.revoked.len())
    }

    fn len(&self) -> usize {
        self.revoked.len()
    }
}
