use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::EngineError;
use super::events::RoundRecord;
use crate::signing::ChannelState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Open,
    Disputed,
    Closed,
}

/// Off-chain mirror of one agent's escrow channel.
///
/// Deposits are fixed at open and house funding; balances move only through
/// [`Channel::apply_round`], which keeps conservation by construction.
#[derive(Clone, Debug)]
pub struct Channel {
    pub agent: Address,
    pub agent_deposit: U256,
    pub casino_deposit: U256,
    pub agent_balance: U256,
    pub casino_balance: U256,
    pub nonce: u64,
    pub status: ChannelStatus,
    pub opened_at: DateTime<Utc>,
    /// Resolved-round history. Informational; the signed state is
    /// authoritative.
    pub games: Vec<RoundRecord>,
}

impl Channel {
    pub fn open(
        agent: Address,
        agent_deposit: U256,
        casino_deposit: U256,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            agent,
            agent_deposit,
            casino_deposit,
            agent_balance: agent_deposit,
            casino_balance: casino_deposit,
            nonce: 0,
            status: ChannelStatus::Open,
            opened_at,
            games: Vec::new(),
        }
    }

    /// `agent_balance + casino_balance == agent_deposit + casino_deposit`,
    /// integer-exact.
    pub fn invariant_ok(&self) -> bool {
        let balances = self.agent_balance.checked_add(self.casino_balance);
        let deposits = self.agent_deposit.checked_add(self.casino_deposit);
        matches!((balances, deposits), (Some(b), Some(d)) if b == d)
    }

    pub fn check_conservation(&self) -> Result<(), EngineError> {
        if self.invariant_ok() {
            Ok(())
        } else {
            Err(EngineError::InvariantViolation(
                "agent_balance + casino_balance != agent_deposit + casino_deposit",
            ))
        }
    }

    /// Applies one resolved round: `bet` moves agent→casino, `payout` moves
    /// casino→agent, and the nonce advances by exactly one.
    pub fn apply_round(&mut self, bet: U256, payout: U256) -> Result<(), EngineError> {
        let agent = self
            .agent_balance
            .checked_add(payout)
            .and_then(|v| v.checked_sub(bet))
            .ok_or(EngineError::InvariantViolation("agent balance underflow"))?;
        let casino = self
            .casino_balance
            .checked_add(bet)
            .and_then(|v| v.checked_sub(payout))
            .ok_or(EngineError::InvariantViolation("casino balance underflow"))?;
        self.agent_balance = agent;
        self.casino_balance = casino;
        self.nonce += 1;
        self.check_conservation()
    }

    /// The EIP-712 struct covering this channel's current state.
    pub fn signed_state(&self) -> ChannelState {
        ChannelState {
            agent: self.agent,
            agentBalance: self.agent_balance,
            casinoBalance: self.casino_balance,
            nonce: U256::from(self.nonce),
        }
    }

    pub fn games_played(&self) -> usize {
        self.games.len()
    }
}
