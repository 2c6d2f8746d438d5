//! Verifiable-RNG round state machine.
//!
//! Alternate randomness path: instead of commit–reveal, the casino requests a
//! random value from an external provider and settles the round when the
//! callback lands. Rounds move `Requested → Fulfilled → Settled`, with
//! `Expired` reachable from `Requested` after the TTL and `Failed` as the
//! terminal sink for unrecoverable errors.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::games::CoinSide;

const LOG_TARGET: &str = "agent_casino::entropy";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Requested,
    Fulfilled,
    Settled,
    Expired,
    Failed,
}

#[derive(Debug, Error)]
pub enum EntropyError {
    #[error("provider request failed: {0}")]
    Provider(String),
    #[error("round {0} already exists")]
    RoundExists(u64),
    #[error("round {0} not found")]
    RoundNotFound(u64),
    #[error("round {id} is {found:?}, expected {expected:?}")]
    InvalidTransition { id: u64, found: RoundPhase, expected: RoundPhase },
    #[error("caller {caller} is not the entropy provider")]
    UnauthorizedProvider { caller: Address },
    #[error("round {id} does not expire until {deadline}")]
    NotYetExpired { id: u64, deadline: DateTime<Utc> },
}

/// Port to the external randomness provider. `request_randomness` returns the
/// provider-assigned request identifier; a failure here means no round ever
/// landed.
#[async_trait]
pub trait EntropySource: Send + Sync {
    async fn request_randomness(&self) -> Result<u64, EntropyError>;
    fn fee(&self) -> U256;
}

#[derive(Clone, Debug)]
pub struct EntropyRound {
    pub id: u64,
    pub agent: Address,
    pub bet: U256,
    pub choice: CoinSide,
    pub fee: U256,
    pub requested_at: DateTime<Utc>,
    pub random: Option<U256>,
    pub phase: RoundPhase,
}

#[derive(Clone, Debug)]
pub struct EntropySettlement {
    pub id: u64,
    pub outcome: CoinSide,
    pub won: bool,
    pub bet: U256,
}

/// Round table. One request identifier maps to exactly one round, ever.
pub struct EntropyRounds {
    rounds: DashMap<u64, EntropyRound>,
    provider: Address,
    ttl: Duration,
}

impl EntropyRounds {
    pub fn new(provider: Address, ttl: Duration) -> Self {
        Self { rounds: DashMap::new(), provider, ttl }
    }

    pub fn provider(&self) -> Address {
        self.provider
    }

    /// Requests randomness and records the round. A provider failure leaves
    /// no round behind; a duplicate identifier is rejected before any state
    /// is written.
    pub async fn request(
        &self,
        source: &dyn EntropySource,
        agent: Address,
        bet: U256,
        choice: CoinSide,
        now: DateTime<Utc>,
    ) -> Result<u64, EntropyError> {
        let id = source.request_randomness().await?;
        use dashmap::mapref::entry::Entry;
        match self.rounds.entry(id) {
            Entry::Occupied(_) => Err(EntropyError::RoundExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(EntropyRound {
                    id,
                    agent,
                    bet,
                    choice,
                    fee: source.fee(),
                    requested_at: now,
                    random: None,
                    phase: RoundPhase::Requested,
                });
                info!(target: LOG_TARGET, id, %agent, bet = %bet, "randomness requested");
                Ok(id)
            }
        }
    }

    /// Provider callback. Only the configured provider may fulfill, and only
    /// once per round.
    pub fn fulfill(&self, caller: Address, id: u64, random: U256) -> Result<(), EntropyError> {
        if caller != self.provider {
            warn!(target: LOG_TARGET, id, %caller, "fulfillment from wrong origin");
            return Err(EntropyError::UnauthorizedProvider { caller });
        }
        let mut round = self.rounds.get_mut(&id).ok_or(EntropyError::RoundNotFound(id))?;
        if round.phase != RoundPhase::Requested {
            return Err(EntropyError::InvalidTransition {
                id,
                found: round.phase,
                expected: RoundPhase::Requested,
            });
        }
        round.random = Some(random);
        round.phase = RoundPhase::Fulfilled;
        info!(target: LOG_TARGET, id, "randomness fulfilled");
        Ok(())
    }

    /// Marks a fulfilled round processed and returns the deterministic
    /// outcome (`random mod 2`).
    pub fn settle(&self, id: u64) -> Result<EntropySettlement, EntropyError> {
        let mut round = self.rounds.get_mut(&id).ok_or(EntropyError::RoundNotFound(id))?;
        if round.phase != RoundPhase::Fulfilled {
            return Err(EntropyError::InvalidTransition {
                id,
                found: round.phase,
                expected: RoundPhase::Fulfilled,
            });
        }
        let random = round.random.unwrap_or_default();
        let outcome = if random % U256::from(2u64) == U256::ZERO {
            CoinSide::Heads
        } else {
            CoinSide::Tails
        };
        round.phase = RoundPhase::Settled;
        info!(target: LOG_TARGET, id, %outcome, "round settled");
        Ok(EntropySettlement { id, outcome, won: outcome == round.choice, bet: round.bet })
    }

    /// Any observer may expire a requested round once the TTL has elapsed,
    /// unblocking downstream funds.
    pub fn expire(&self, id: u64, now: DateTime<Utc>) -> Result<(), EntropyError> {
        let mut round = self.rounds.get_mut(&id).ok_or(EntropyError::RoundNotFound(id))?;
        if round.phase != RoundPhase::Requested {
            return Err(EntropyError::InvalidTransition {
                id,
                found: round.phase,
                expected: RoundPhase::Requested,
            });
        }
        let deadline = round.requested_at + self.ttl;
        if now < deadline {
            return Err(EntropyError::NotYetExpired { id, deadline });
        }
        round.phase = RoundPhase::Expired;
        warn!(target: LOG_TARGET, id, "round expired");
        Ok(())
    }

    /// Terminal sink for unrecoverable errors.
    pub fn fail(&self, id: u64) -> Result<(), EntropyError> {
        let mut round = self.rounds.get_mut(&id).ok_or(EntropyError::RoundNotFound(id))?;
        if matches!(round.phase, RoundPhase::Settled | RoundPhase::Failed) {
            return Err(EntropyError::InvalidTransition {
                id,
                found: round.phase,
                expected: RoundPhase::Requested,
            });
        }
        round.phase = RoundPhase::Failed;
        warn!(target: LOG_TARGET, id, "round failed");
        Ok(())
    }

    pub fn round(&self, id: u64) -> Option<EntropyRound> {
        self.rounds.get(&id).map(|entry| entry.value().clone())
    }
}
