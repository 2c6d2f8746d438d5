use alloy::primitives::U256;
use serde::Serialize;
use thiserror::Error;

use crate::bankroll::BankrollError;
use crate::signing::SignerError;
use crate::wei::AmountError;

/// Failure classes surfaced alongside every engine error on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request; nothing changed.
    Validation,
    /// Well-formed but not allowed right now; nothing changed.
    Policy,
    /// A deadline passed; pending resources were cleaned up.
    Liveness,
    /// An internal invariant broke. The operation refuses to proceed.
    Integrity,
    /// Signature or commitment did not check out.
    Cryptographic,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    BadAmount(#[from] AmountError),
    #[error("missing or malformed parameter: {0}")]
    MissingParam(&'static str),
    #[error("bet must be positive")]
    BetNotPositive,
    #[error("bad choice: {0:?} (want \"heads\" or \"tails\")")]
    BadChoice(String),
    #[error("bad pick: number must be 1..=100, got {0}")]
    BadPick(u64),
    #[error("ticket count must be 1..={max}, got {count}")]
    BadTicketCount { count: u64, max: usize },
    #[error("agent already has an open channel")]
    ChannelExists,
    #[error("no open channel for agent")]
    ChannelNotFound,
    #[error("unknown route: {0:?}")]
    UnknownRoute(String),
    #[error("no pending commit for {game}")]
    NoPendingCommit { game: &'static str },

    #[error("maximum open channels reached ({0})")]
    MaxChannels(usize),
    #[error("insufficient balance: need {need} wei, have {have} wei")]
    InsufficientBalance { need: U256, have: U256 },
    #[error(transparent)]
    Bankroll(#[from] BankrollError),
    #[error("pending commit already exists for {game}")]
    PendingCommitExists { game: &'static str },
    #[error("at most {max} tickets per draw")]
    TicketLimit { max: usize },
    #[error("house cannot cover the worst-case payout")]
    CannotCoverPayout,
    #[error("nothing to claim")]
    NothingToClaim,

    #[error("commit expired after {timeout_secs}s")]
    CommitExpired { timeout_secs: i64 },

    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),

    #[error(transparent)]
    Signer(#[from] SignerError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        use EngineError::*;
        match self {
            BadAmount(_) | MissingParam(_) | BetNotPositive | BadChoice(_) | BadPick(_)
            | BadTicketCount { .. } | ChannelExists | ChannelNotFound | UnknownRoute(_)
            | NoPendingCommit { .. } => ErrorKind::Validation,
            MaxChannels(_) | InsufficientBalance { .. } | Bankroll(_)
            | PendingCommitExists { .. } | TicketLimit { .. } | CannotCoverPayout
            | NothingToClaim => ErrorKind::Policy,
            CommitExpired { .. } => ErrorKind::Liveness,
            InvariantViolation(_) => ErrorKind::Integrity,
            Signer(_) => ErrorKind::Cryptographic,
        }
    }

    /// Structured error payload for the wire.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string(), "kind": self.kind() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(EngineError::BetNotPositive.kind(), ErrorKind::Validation);
        assert_eq!(
            EngineError::PendingCommitExists { game: "slots" }.kind(),
            ErrorKind::Policy
        );
        assert_eq!(EngineError::CommitExpired { timeout_secs: 300 }.kind(), ErrorKind::Liveness);
        assert_eq!(EngineError::InvariantViolation("x").kind(), ErrorKind::Integrity);
    }

    #[test]
    fn payload_carries_kind() {
        let payload = EngineError::NothingToClaim.to_payload();
        assert_eq!(payload["kind"], "policy");
        assert!(payload["error"].is_string());
    }
}
