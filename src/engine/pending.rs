use alloy::primitives::{Address, U256};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use super::errors::EngineError;
use crate::commit_reveal::CasinoSeed;

/// A commit waiting for the agent's reveal.
#[derive(Clone, Debug)]
pub struct PendingCommit {
    pub casino_seed: CasinoSeed,
    pub commitment: String,
    pub bet: U256,
    /// Game-specific parameter fixed at commit time (e.g. coinflip choice).
    pub choice: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Single-flight commit store keyed by `(agent, game)`.
///
/// One live commit per key; committing to a different game in parallel is
/// allowed. Commits expire after the configured timeout.
pub struct PendingCommits {
    inner: DashMap<(Address, &'static str), PendingCommit>,
    timeout: Duration,
}

impl PendingCommits {
    pub fn new(timeout: Duration) -> Self {
        Self { inner: DashMap::new(), timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn expired(&self, commit: &PendingCommit, now: DateTime<Utc>) -> bool {
        now - commit.created_at > self.timeout
    }

    /// Stores a fresh commit. An unexpired commit already in the slot is an
    /// error; an expired one is replaced.
    pub fn put(
        &self,
        agent: Address,
        game: &'static str,
        commit: PendingCommit,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        use dashmap::mapref::entry::Entry;
        match self.inner.entry((agent, game)) {
            Entry::Occupied(mut slot) => {
                if !self.expired(slot.get(), now) {
                    return Err(EngineError::PendingCommitExists { game });
                }
                slot.insert(commit);
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(commit);
                Ok(())
            }
        }
    }

    /// Removes and returns the commit if present and fresh. An expired commit
    /// is cleaned up and reported; the slot is free afterwards either way.
    pub fn take_fresh(
        &self,
        agent: Address,
        game: &'static str,
        now: DateTime<Utc>,
    ) -> Result<PendingCommit, EngineError> {
        let (_, commit) = self
            .inner
            .remove(&(agent, game))
            .ok_or(EngineError::NoPendingCommit { game })?;
        if self.expired(&commit, now) {
            return Err(EngineError::CommitExpired { timeout_secs: self.timeout.num_seconds() });
        }
        Ok(commit)
    }

    pub fn peek(&self, agent: Address, game: &'static str) -> Option<PendingCommit> {
        self.inner.get(&(agent, game)).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_at(created_at: DateTime<Utc>) -> PendingCommit {
        PendingCommit {
            casino_seed: CasinoSeed::from("seed"),
            commitment: "commitment".into(),
            bet: U256::from(5u64),
            choice: None,
            created_at,
        }
    }

    fn store() -> PendingCommits {
        PendingCommits::new(Duration::minutes(5))
    }

    #[test]
    fn second_commit_to_same_game_is_rejected() {
        let store = store();
        let agent = Address::repeat_byte(1);
        let now = Utc::now();
        store.put(agent, "slots", commit_at(now), now).unwrap();
        assert!(matches!(
            store.put(agent, "slots", commit_at(now), now),
            Err(EngineError::PendingCommitExists { game: "slots" })
        ));
    }

    #[test]
    fn commit_to_a_different_game_is_allowed() {
        let store = store();
        let agent = Address::repeat_byte(1);
        let now = Utc::now();
        store.put(agent, "slots", commit_at(now), now).unwrap();
        store.put(agent, "coinflip", commit_at(now), now).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn expired_commit_is_cleared_on_take() {
        let store = store();
        let agent = Address::repeat_byte(1);
        let created = Utc::now();
        store.put(agent, "slots", commit_at(created), created).unwrap();
        let later = created + Duration::minutes(5) + Duration::seconds(1);
        assert!(matches!(
            store.take_fresh(agent, "slots", later),
            Err(EngineError::CommitExpired { .. })
        ));
        // Slot is free again.
        assert!(store.peek(agent, "slots").is_none());
        store.put(agent, "slots", commit_at(later), later).unwrap();
    }

    #[test]
    fn expired_commit_is_replaced_on_put() {
        let store = store();
        let agent = Address::repeat_byte(1);
        let created = Utc::now();
        store.put(agent, "slots", commit_at(created), created).unwrap();
        let later = created + Duration::minutes(6);
        store.put(agent, "slots", commit_at(later), later).unwrap();
        assert_eq!(store.peek(agent, "slots").unwrap().created_at, later);
    }

    #[test]
    fn take_without_commit_is_a_validation_error() {
        let store = store();
        assert!(matches!(
            store.take_fresh(Address::repeat_byte(1), "slots", Utc::now()),
            Err(EngineError::NoPendingCommit { .. })
        ));
    }
}
