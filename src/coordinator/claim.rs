use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lease on one `(alert, stage)` pair.
///
/// The token id identifies the run that holds the lease; results carrying
/// any other id are discarded. An expired lease may be re-claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimToken {
    id: Uuid,
    expires_at: DateTime<Utc>,
}

impl ClaimToken {
    pub fn issue(ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            expires_at: expiry_from_now(ttl),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn owns(&self, id: Uuid) -> bool {
        self.id == id
    }

    /// Heartbeat: push the expiry `ttl` past now.
    pub fn renew(&mut self, ttl: Duration) {
        self.expires_at = expiry_from_now(ttl);
    }
}

fn expiry_from_now(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_is_not_expired() {
        let token = ClaimToken::issue(Duration::from_secs(60));
        assert!(!token.is_expired(Utc::now()));
        assert!(token.is_expired(token.expires_at()));
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let token = ClaimToken::issue(Duration::ZERO);
        assert!(token.is_expired(Utc::now()));
    }

    #[test]
    fn test_renew_extends_expiry() {
        let mut token = ClaimToken::issue(Duration::ZERO);
        token.renew(Duration::from_secs(60));
        assert!(!token.is_expired(Utc::now()));
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = ClaimToken::issue(Duration::from_secs(1));
        let b = ClaimToken::issue(Duration::from_secs(1));
        assert!(!a.owns(b.id()));
        assert!(a.owns(a.id()));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let token = ClaimToken::issue(Duration::from_secs(u64::MAX));
        assert!(!token.is_expired(Utc::now()));
    }
}
