//! On-chain settlement: escrow, signed-state verification, disputes,
//! insurance skim, and pull-payment fallback.
//!
//! Modeled as a deterministic state machine over an explicit [`Env`] the way
//! the underlying chain would drive it. Settlement follows
//! effects-before-interactions: the channel record is cleared and collateral
//! released before any value moves, and a failed payout lands in
//! `pending_withdrawals` instead of reverting.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, PrimitiveSignature, U256};
use alloy::sol_types::Eip712Domain;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::bankroll_manager::BankrollManager;
use super::env::{Env, ValueTransfer};
use super::errors::SettlementError;
use super::insurance::InsuranceFund;
use crate::config::ContractParams;
use crate::signing::{casino_domain, recover_signer, ChannelState};

const LOG_TARGET: &str = "agent_casino::settlement";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscrowStage {
    Open,
    Disputed,
}

/// On-chain channel record. Settled channels are deleted.
#[derive(Clone, Debug)]
pub struct EscrowChannel {
    pub agent: Address,
    pub agent_deposit: U256,
    pub casino_deposit: U256,
    pub agent_balance: U256,
    pub casino_balance: U256,
    pub nonce: u64,
    pub stage: EscrowStage,
    pub opened_at: u64,
    pub dispute_deadline: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct PendingOwner {
    pub to: Address,
    pub eta: u64,
}

pub struct ChannelSettlement {
    address: Address,
    owner: Address,
    params: ContractParams,
    domain: Eip712Domain,
    channels: HashMap<Address, EscrowChannel>,
    pending_withdrawals: HashMap<Address, U256>,
    pending_owner: Option<PendingOwner>,
    insurance: Option<Arc<Mutex<InsuranceFund>>>,
    bankroll: Option<Arc<Mutex<BankrollManager>>>,
}

impl ChannelSettlement {
    pub fn new(address: Address, owner: Address, chain_id: u64, params: ContractParams) -> Self {
        Self {
            address,
            owner,
            domain: casino_domain(chain_id, address),
            params,
            channels: HashMap::new(),
            pending_withdrawals: HashMap::new(),
            pending_owner: None,
            insurance: None,
            bankroll: None,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn params(&self) -> &ContractParams {
        &self.params
    }

    pub fn channel_of(&self, agent: Address) -> Option<EscrowChannel> {
        self.channels.get(&agent).cloned()
    }

    pub fn pending_withdrawal_of(&self, addr: Address) -> U256 {
        self.pending_withdrawals.get(&addr).copied().unwrap_or_default()
    }

    pub fn pending_owner(&self) -> Option<PendingOwner> {
        self.pending_owner
    }

    // ---- module wiring -------------------------------------------------

    pub fn set_insurance_fund(
        &mut self,
        env: Env,
        fund: Arc<Mutex<InsuranceFund>>,
    ) -> Result<(), SettlementError> {
        if env.caller != self.owner {
            return Err(SettlementError::Unauthorized);
        }
        self.insurance = Some(fund);
        Ok(())
    }

    pub fn set_bankroll_manager(
        &mut self,
        env: Env,
        bankroll: Arc<Mutex<BankrollManager>>,
    ) -> Result<(), SettlementError> {
        if env.caller != self.owner {
            return Err(SettlementError::Unauthorized);
        }
        self.bankroll = Some(bankroll);
        Ok(())
    }

    // ---- channel lifecycle ---------------------------------------------

    /// Agent-payable. Creates the escrow with the attached value as the
    /// agent-side deposit.
    pub fn open_channel(&mut self, env: Env) -> Result<(), SettlementError> {
        if env.value < self.params.min_deposit || env.value > self.params.max_deposit {
            return Err(SettlementError::DepositOutOfRange {
                value: env.value,
                min: self.params.min_deposit,
                max: self.params.max_deposit,
            });
        }
        if self.channels.contains_key(&env.caller) {
            return Err(SettlementError::ChannelExists(env.caller));
        }
        self.channels.insert(
            env.caller,
            EscrowChannel {
                agent: env.caller,
                agent_deposit: env.value,
                casino_deposit: U256::ZERO,
                agent_balance: env.value,
                casino_balance: U256::ZERO,
                nonce: 0,
                stage: EscrowStage::Open,
                opened_at: env.now,
                dispute_deadline: 0,
            },
        );
        info!(target: LOG_TARGET, agent = %env.caller, deposit = %env.value, "channel opened");
        Ok(())
    }

    /// House-payable. Locks the value as bankroll collateral and adds it to
    /// the casino side of the escrow.
    pub fn fund_casino_side(&mut self, env: Env, agent: Address) -> Result<(), SettlementError> {
        if env.caller != self.owner {
            return Err(SettlementError::Unauthorized);
        }
        if env.value.is_zero() {
            return Err(SettlementError::ZeroValue);
        }
        let bankroll = self.bankroll.clone().ok_or(SettlementError::ModuleNotWired("bankroll_manager"))?;
        {
            let channel = self
                .channels
                .get(&agent)
                .ok_or(SettlementError::ChannelNotFound(agent))?;
            if channel.stage != EscrowStage::Open {
                return Err(SettlementError::WrongStage {
                    expected: EscrowStage::Open,
                    found: channel.stage,
                });
            }
        }
        bankroll
            .lock()
            .lock_collateral(Env::call(self.address, env.now), env.value)?;
        let channel = self.channels.get_mut(&agent).expect("checked above");
        channel.casino_deposit += env.value;
        channel.casino_balance += env.value;
        info!(target: LOG_TARGET, %agent, value = %env.value, "casino side funded");
        Ok(())
    }

    /// Agent presents the latest house-signed state; settles cooperatively.
    pub fn close_channel(
        &mut self,
        env: Env,
        agent_balance: U256,
        casino_balance: U256,
        nonce: u64,
        signature: &PrimitiveSignature,
        transfers: &dyn ValueTransfer,
    ) -> Result<(), SettlementError> {
        let channel = self
            .channels
            .get(&env.caller)
            .ok_or(SettlementError::ChannelNotFound(env.caller))?
            .clone();
        if channel.stage != EscrowStage::Open {
            return Err(SettlementError::WrongStage {
                expected: EscrowStage::Open,
                found: channel.stage,
            });
        }
        self.check_submission(&channel, agent_balance, casino_balance, nonce, signature)?;
        self.settle(env, channel, agent_balance, casino_balance, transfers)
    }

    /// Same checks as a cooperative close, but parks the state behind the
    /// challenge period instead of settling.
    pub fn start_challenge(
        &mut self,
        env: Env,
        agent_balance: U256,
        casino_balance: U256,
        nonce: u64,
        signature: &PrimitiveSignature,
    ) -> Result<u64, SettlementError> {
        let deadline = env.now + self.params.challenge_period_secs;
        let channel = self
            .channels
            .get(&env.caller)
            .ok_or(SettlementError::ChannelNotFound(env.caller))?
            .clone();
        if channel.stage != EscrowStage::Open {
            return Err(SettlementError::WrongStage {
                expected: EscrowStage::Open,
                found: channel.stage,
            });
        }
        self.check_submission(&channel, agent_balance, casino_balance, nonce, signature)?;

        let channel = self.channels.get_mut(&env.caller).expect("checked above");
        channel.agent_balance = agent_balance;
        channel.casino_balance = casino_balance;
        channel.nonce = nonce;
        channel.stage = EscrowStage::Disputed;
        channel.dispute_deadline = deadline;
        info!(target: LOG_TARGET, agent = %env.caller, nonce, deadline, "challenge started");
        Ok(deadline)
    }

    /// A strictly higher-nonce signed state overrides the disputed one and
    /// extends the deadline. Anyone holding such a state may submit it.
    pub fn counter_challenge(
        &mut self,
        env: Env,
        agent: Address,
        agent_balance: U256,
        casino_balance: U256,
        nonce: u64,
        signature: &PrimitiveSignature,
    ) -> Result<u64, SettlementError> {
        let deadline = env.now + self.params.challenge_period_secs;
        let channel = self
            .channels
            .get(&agent)
            .ok_or(SettlementError::ChannelNotFound(agent))?
            .clone();
        if channel.stage != EscrowStage::Disputed {
            return Err(SettlementError::WrongStage {
                expected: EscrowStage::Disputed,
                found: channel.stage,
            });
        }
        if env.now > channel.dispute_deadline {
            return Err(SettlementError::ChallengeWindowClosed {
                deadline: channel.dispute_deadline,
            });
        }
        if nonce <= channel.nonce {
            return Err(SettlementError::StaleNonce { submitted: nonce, current: channel.nonce });
        }
        self.check_conservation(&channel, agent_balance, casino_balance)?;
        self.check_signature(agent, agent_balance, casino_balance, nonce, signature)?;

        let channel = self.channels.get_mut(&agent).expect("checked above");
        channel.agent_balance = agent_balance;
        channel.casino_balance = casino_balance;
        channel.nonce = nonce;
        channel.dispute_deadline = deadline;
        info!(target: LOG_TARGET, %agent, nonce, deadline, "counter challenge accepted");
        Ok(deadline)
    }

    /// After the deadline, settles at whatever state won the dispute.
    pub fn resolve_challenge(
        &mut self,
        env: Env,
        agent: Address,
        transfers: &dyn ValueTransfer,
    ) -> Result<(), SettlementError> {
        let channel = self
            .channels
            .get(&agent)
            .ok_or(SettlementError::ChannelNotFound(agent))?
            .clone();
        if channel.stage != EscrowStage::Disputed {
            return Err(SettlementError::WrongStage {
                expected: EscrowStage::Disputed,
                found: channel.stage,
            });
        }
        if env.now <= channel.dispute_deadline {
            return Err(SettlementError::DeadlineNotReached {
                deadline: channel.dispute_deadline,
                now: env.now,
            });
        }
        let (agent_balance, casino_balance) = (channel.agent_balance, channel.casino_balance);
        info!(target: LOG_TARGET, %agent, nonce = channel.nonce, "challenge resolved");
        self.settle(env, channel, agent_balance, casino_balance, transfers)
    }

    /// Escape hatch for an untouched channel: no rounds played, minimum
    /// duration elapsed, original deposits returned.
    pub fn emergency_exit(
        &mut self,
        env: Env,
        transfers: &dyn ValueTransfer,
    ) -> Result<(), SettlementError> {
        let channel = self
            .channels
            .get(&env.caller)
            .ok_or(SettlementError::ChannelNotFound(env.caller))?
            .clone();
        if channel.stage != EscrowStage::Open {
            return Err(SettlementError::WrongStage {
                expected: EscrowStage::Open,
                found: channel.stage,
            });
        }
        if channel.nonce != 0 {
            return Err(SettlementError::EmergencyNonceNonZero);
        }
        let eligible_at = channel.opened_at + self.params.min_channel_duration_secs;
        if env.now < eligible_at {
            return Err(SettlementError::ChannelTooYoung { eligible_at });
        }
        let (agent_deposit, casino_deposit) = (channel.agent_deposit, channel.casino_deposit);
        info!(target: LOG_TARGET, agent = %env.caller, "emergency exit");
        self.settle(env, channel, agent_deposit, casino_deposit, transfers)
    }

    /// Pull-payment fallback for payouts whose direct transfer failed.
    pub fn withdraw_pending(
        &mut self,
        env: Env,
        transfers: &dyn ValueTransfer,
    ) -> Result<U256, SettlementError> {
        let amount = self
            .pending_withdrawals
            .remove(&env.caller)
            .filter(|amount| !amount.is_zero())
            .ok_or(SettlementError::NothingPending(env.caller))?;
        if !transfers.transfer(env.caller, amount) {
            self.pending_withdrawals.insert(env.caller, amount);
            return Err(SettlementError::TransferFailed { to: env.caller });
        }
        info!(target: LOG_TARGET, payee = %env.caller, amount = %amount, "pending withdrawal paid");
        Ok(amount)
    }

    // ---- ownership rotation --------------------------------------------

    /// Two-step, timelocked handover. Blocked while any collateral is locked.
    pub fn transfer_casino(&mut self, env: Env, to: Address) -> Result<u64, SettlementError> {
        if env.caller != self.owner {
            return Err(SettlementError::Unauthorized);
        }
        self.ensure_bankroll_idle()?;
        let eta = env.now + self.params.owner_transfer_timelock_secs;
        self.pending_owner = Some(PendingOwner { to, eta });
        info!(target: LOG_TARGET, %to, eta, "owner transfer requested");
        Ok(eta)
    }

    pub fn accept_casino(&mut self, env: Env) -> Result<(), SettlementError> {
        let pending = self.pending_owner.ok_or(SettlementError::NoPendingRequest)?;
        if env.caller != pending.to {
            return Err(SettlementError::Unauthorized);
        }
        if env.now < pending.eta {
            return Err(SettlementError::TimelockNotElapsed { eta: pending.eta });
        }
        self.ensure_bankroll_idle()?;
        self.owner = pending.to;
        self.pending_owner = None;
        info!(target: LOG_TARGET, owner = %self.owner, "owner transfer accepted");
        Ok(())
    }

    pub fn cancel_transfer_casino(&mut self, env: Env) -> Result<(), SettlementError> {
        if env.caller != self.owner {
            return Err(SettlementError::Unauthorized);
        }
        if self.pending_owner.take().is_none() {
            return Err(SettlementError::NoPendingRequest);
        }
        Ok(())
    }

    // ---- internals ------------------------------------------------------

    fn ensure_bankroll_idle(&self) -> Result<(), SettlementError> {
        let locked = self
            .bankroll
            .as_ref()
            .map(|bankroll| bankroll.lock().total_locked())
            .unwrap_or_default();
        if !locked.is_zero() {
            return Err(SettlementError::BankrollStillLocked { locked });
        }
        Ok(())
    }

    fn check_conservation(
        &self,
        channel: &EscrowChannel,
        agent_balance: U256,
        casino_balance: U256,
    ) -> Result<(), SettlementError> {
        let balances = agent_balance.checked_add(casino_balance);
        let deposits = channel.agent_deposit.checked_add(channel.casino_deposit);
        match (balances, deposits) {
            (Some(b), Some(d)) if b == d => Ok(()),
            _ => Err(SettlementError::ConservationViolated),
        }
    }

    fn check_signature(
        &self,
        agent: Address,
        agent_balance: U256,
        casino_balance: U256,
        nonce: u64,
        signature: &PrimitiveSignature,
    ) -> Result<(), SettlementError> {
        let state = ChannelState {
            agent,
            agentBalance: agent_balance,
            casinoBalance: casino_balance,
            nonce: U256::from(nonce),
        };
        let recovered = recover_signer(&self.domain, &state, signature)
            .map_err(|_| SettlementError::BadSignature)?;
        if recovered != self.owner {
            warn!(target: LOG_TARGET, %agent, %recovered, "signature does not recover to house");
            return Err(SettlementError::BadSignature);
        }
        Ok(())
    }

    /// Freshly opened channels settle at nonce 0, so the submitted nonce may
    /// equal the stored one here; only counter-challenges demand strictly
    /// higher.
    fn check_submission(
        &self,
        channel: &EscrowChannel,
        agent_balance: U256,
        casino_balance: U256,
        nonce: u64,
        signature: &PrimitiveSignature,
    ) -> Result<(), SettlementError> {
        if nonce < channel.nonce {
            return Err(SettlementError::StaleNonce { submitted: nonce, current: channel.nonce });
        }
        self.check_conservation(channel, agent_balance, casino_balance)?;
        self.check_signature(channel.agent, agent_balance, casino_balance, nonce, signature)
    }

    fn settle(
        &mut self,
        env: Env,
        channel: EscrowChannel,
        agent_balance: U256,
        casino_balance: U256,
        transfers: &dyn ValueTransfer,
    ) -> Result<(), SettlementError> {
        // Effects before interactions.
        self.channels.remove(&channel.agent);
        if !channel.casino_deposit.is_zero() {
            let bankroll = self
                .bankroll
                .clone()
                .ok_or(SettlementError::ModuleNotWired("bankroll_manager"))?;
            bankroll
                .lock()
                .release_collateral(Env::call(self.address, env.now), channel.casino_deposit)?;
        }

        let profit = casino_balance.saturating_sub(channel.casino_deposit);
        let insurance = profit * U256::from(self.params.insurance_bps) / U256::from(10_000u64);
        let casino_payout = casino_balance - insurance;

        self.pay(transfers, channel.agent, agent_balance);
        self.pay(transfers, self.owner, casino_payout);
        if !insurance.is_zero() {
            let fund = self
                .insurance
                .clone()
                .ok_or(SettlementError::ModuleNotWired("insurance_fund"))?;
            fund.lock().deposit(Env::payable(self.address, insurance, env.now))?;
        }
        info!(
            target: LOG_TARGET,
            agent = %channel.agent,
            agent_payout = %agent_balance,
            casino_payout = %casino_payout,
            insurance = %insurance,
            "channel settled"
        );
        Ok(())
    }

    fn pay(&mut self, transfers: &dyn ValueTransfer, to: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        if !transfers.transfer(to, amount) {
            warn!(target: LOG_TARGET, %to, amount = %amount, "transfer failed, rerouting to pull payment");
            *self.pending_withdrawals.entry(to).or_default() += amount;
        }
    }
}
