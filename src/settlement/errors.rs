use alloy::primitives::{Address, U256};
use thiserror::Error;

use crate::bankroll::BankrollError;

use super::contract::EscrowStage;

/// Typed revert reasons of the settlement layer.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("deposit out of range: {value} not in [{min}, {max}]")]
    DepositOutOfRange { value: U256, min: U256, max: U256 },
    #[error("channel already exists for {0}")]
    ChannelExists(Address),
    #[error("no channel for {0}")]
    ChannelNotFound(Address),
    #[error("channel is {found:?}, expected {expected:?}")]
    WrongStage { expected: EscrowStage, found: EscrowStage },
    #[error("caller is not authorized")]
    Unauthorized,
    #[error("value must be positive")]
    ZeroValue,

    #[error("stale nonce: submitted {submitted}, current {current}")]
    StaleNonce { submitted: u64, current: u64 },
    #[error("submitted balances break conservation")]
    ConservationViolated,
    #[error("house signature invalid")]
    BadSignature,

    #[error("challenge deadline {deadline} not reached at {now}")]
    DeadlineNotReached { deadline: u64, now: u64 },
    #[error("challenge window closed at {deadline}")]
    ChallengeWindowClosed { deadline: u64 },

    #[error("emergency exit requires an untouched channel")]
    EmergencyNonceNonZero,
    #[error("channel younger than minimum duration, eligible at {eligible_at}")]
    ChannelTooYoung { eligible_at: u64 },

    #[error("nothing pending for {0}")]
    NothingPending(Address),
    #[error("transfer to {to} failed")]
    TransferFailed { to: Address },

    #[error(transparent)]
    Bankroll(#[from] BankrollError),
    #[error("bankroll still locked: {locked}")]
    BankrollStillLocked { locked: U256 },

    #[error("timelock not elapsed, ready at {eta}")]
    TimelockNotElapsed { eta: u64 },
    #[error("no pending request")]
    NoPendingRequest,
    #[error("amount exceeds fund balance {balance}")]
    InsufficientFund { balance: U256 },
    #[error("module not wired: {0}")]
    ModuleNotWired(&'static str),
}
