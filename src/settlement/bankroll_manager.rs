//! On-chain face of the bankroll exposure guard.
//!
//! Wraps the same [`BankrollGuard`] the off-chain engine uses, so both sides
//! of the system enforce the identical cap and agree at equilibrium. Only the
//! wired channel manager may move collateral.

use alloy::primitives::{Address, U256};

use super::env::Env;
use super::errors::SettlementError;
use crate::bankroll::BankrollGuard;

pub struct BankrollManager {
    owner: Address,
    channel_manager: Option<Address>,
    guard: BankrollGuard,
}

impl BankrollManager {
    pub fn new(owner: Address, max_exposure: U256) -> Self {
        Self { owner, channel_manager: None, guard: BankrollGuard::new(max_exposure) }
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

    pub fn lock_collateral(&mut self, env: Env, amount: U256) -> Result<(), SettlementError> {
        if Some(env.caller) != self.channel_manager {
            return Err(SettlementError::Unauthorized);
        }
        self.guard.lock(amount)?;
        Ok(())
    }

    pub fn release_collateral(&mut self, env: Env, amount: U256) -> Result<(), SettlementError> {
        if Some(env.caller) != self.channel_manager {
            return Err(SettlementError::Unauthorized);
        }
        self.guard.unlock(amount)?;
        Ok(())
    }

    pub fn can_lock(&self, amount: U256) -> bool {
        self.guard.can_lock(amount)
    }

    pub fn total_locked(&self) -> U256 {
        self.guard.total_locked()
    }

    pub fn max_exposure(&self) -> U256 {
        self.guard.max_exposure()
    }
}
