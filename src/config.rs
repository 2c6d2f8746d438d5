use alloy::primitives::{Address, U256};
use chrono::Duration;

use crate::wei::WEI_PER_ETH;

/// Off-chain engine knobs.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// EIP-712 domain chain id.
    pub chain_id: u64,
    /// EIP-712 verifying contract: the deployed settlement address.
    pub verifying_contract: Address,
    pub max_channels: usize,
    /// Pending commits older than this are dead on reveal.
    pub commit_timeout: Duration,
    pub draw_interval: Duration,
    pub max_tickets_per_draw: usize,
    pub ticket_price: U256,
    /// TTL for externally-fulfilled randomness rounds.
    pub entropy_ttl: Duration,
    /// Ring-buffer capacity of the event bus.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            verifying_contract: Address::ZERO,
            max_channels: 100,
            commit_timeout: Duration::minutes(5),
            draw_interval: Duration::hours(6),
            max_tickets_per_draw: 10,
            ticket_price: *WEI_PER_ETH / U256::from(1000u64),
            entropy_ttl: Duration::minutes(5),
            event_capacity: 512,
        }
    }
}

/// On-chain constants. Defaults are the deployed values.
#[derive(Clone, Debug)]
pub struct ContractParams {
    pub challenge_period_secs: u64,
    pub min_channel_duration_secs: u64,
    pub min_deposit: U256,
    pub max_deposit: U256,
    /// Share of house profit skimmed to insurance at settlement.
    pub insurance_bps: u64,
    pub owner_transfer_timelock_secs: u64,
    pub insurance_timelock_secs: u64,
}

impl Default for ContractParams {
    fn default() -> Self {
        Self {
            challenge_period_secs: 86_400,
            min_channel_duration_secs: 3_600,
            min_deposit: *WEI_PER_ETH / U256::from(1000u64),
            max_deposit: *WEI_PER_ETH * U256::from(10u64),
            insurance_bps: 1000,
            owner_transfer_timelock_secs: 2 * 86_400,
            insurance_timelock_secs: 3 * 86_400,
        }
    }
}
