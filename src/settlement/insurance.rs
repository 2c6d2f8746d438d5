//! Segregated insurance treasury.
//!
//! Receives the skim of house profit at every settlement; only the channel
//! manager may deposit, and the owner withdraws behind a 3-day timelock.

use alloy::primitives::{Address, U256};
use tracing::info;

use super::env::{Env, ValueTransfer};
use super::errors::SettlementError;

const LOG_TARGET: &str = "agent_casino::settlement::insurance";

#[derive(Clone, Copy, Debug)]
pub struct PendingWithdrawal {
    pub amount: U256,
    pub eta: u64,
}

pub struct InsuranceFund {
    owner: Address,
    channel_manager: Option<Address>,
    balance: U256,
    pending: Option<PendingWithdrawal>,
    timelock_secs: u64,
}

impl InsuranceFund {
    pub fn new(owner: Address, timelock_secs: u64) -> Self {
        Self { owner, channel_manager: None, balance: U256::ZERO, pending: None, timelock_secs }
    }

    pub fn set_channel_manager(
        &mut self,
        env: Env,
        manager: Address,
    ) -> Result<(), SettlementError> {
        if env.caller != self.owner {
            return Err(SettlementError::Unauthorized);
        }
        self.channel_manager = Some(manager);
        Ok(())
    }

    pub fn balance(&self) -> U256 {
        self.balance
    }

    pub fn pending(&self) -> Option<PendingWithdrawal> {
        self.pending
    }

    /// Payable; only the channel manager routes value here.
    pub fn deposit(&mut self, env: Env) -> Result<(), SettlementError> {
        if Some(env.caller) != self.channel_manager {
            return Err(SettlementError::Unauthorized);
        }
        self.balance += env.value;
        info!(target: LOG_TARGET, amount = %env.value, balance = %self.balance, "insurance deposit");
        Ok(())
    }

    pub fn request_withdrawal(&mut self, env: Env, amount: U256) -> Result<u64, SettlementError> {
        if env.caller != self.owner {
            return Err(SettlementError::Unauthorized);
        }
        if amount.is_zero() {
            return Err(SettlementError::ZeroValue);
        }
        if amount > self.balance {
            return Err(SettlementError::InsufficientFund { balance: self.balance });
        }
        let eta = env.now + self.timelock_secs;
        self.pending = Some(PendingWithdrawal { amount, eta });
        info!(target: LOG_TARGET, amount = %amount, eta, "withdrawal requested");
        Ok(eta)
    }

    pub fn execute_withdrawal(
        &mut self,
        env: Env,
        transfers: &dyn ValueTransfer,
    ) -> Result<U256, SettlementError> {
        if env.caller != self.owner {
            return Err(SettlementError::Unauthorized);
        }
        let pending = self.pending.ok_or(SettlementError::NoPendingRequest)?;
        if env.now < pending.eta {
            return Err(SettlementError::TimelockNotElapsed { eta: pending.eta });
        }
        // Bounded by whatever is actually in the fund by now.
        let amount = pending.amount.min(self.balance);
        self.pending = None;
        self.balance -= amount;
        if !transfers.transfer(self.owner, amount) {
            self.balance += amount;
            self.pending = Some(pending);
            return Err(SettlementError::TransferFailed { to: self.owner });
        }
        info!(target: LOG_TARGET, amount = %amount, "withdrawal executed");
        Ok(amount)
    }

    pub fn cancel_withdrawal(&mut self, env: Env) -> Result<(), SettlementError> {
        if env.caller != self.owner {
            return Err(SettlementError::Unauthorized);
        }
        if self.pending.take().is_none() {
            return Err(SettlementError::NoPendingRequest);
        }
        Ok(())
    }
}
