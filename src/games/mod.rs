pub mod coinflip;
pub mod lotto;
pub mod slots;

pub use coinflip::{CoinSide, Coinflip};
pub use lotto::{Lotto, LottoBook};
pub use slots::Slots;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::clock::Clock;
use crate::engine::channel::Channel;
use crate::engine::errors::EngineError;
use crate::engine::events::RoundRecord;
use crate::engine::pending::PendingCommits;
use crate::signing::{signature_to_hex, StateSigning};
use crate::wei;

/// Bets are guarded at twice the worst-case payout so one round can never
/// drain the house side past the next round's obligations.
pub const DEFAULT_SAFETY_FACTOR: u64 = 2;

/// Capability every game registers with the engine.
#[async_trait]
pub trait Game: Send + Sync {
    fn name(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    /// Long-run return-to-player. Display only; balance math never sees it.
    fn rtp(&self) -> f64;
    /// Worst-case payout multiplier, used for bankroll guarding.
    fn max_multiplier(&self) -> u64;
    /// Closed action set; the engine routes `"<name>_<action>"`.
    fn actions(&self) -> &'static [&'static str];
    /// Whether an action needs an open channel. Info reads do not.
    fn channel_required(&self, action: &str) -> bool {
        !matches!(action, "info" | "status")
    }
    async fn handle_action(
        &self,
        action: &str,
        channel: Option<&mut Channel>,
        params: &Value,
        ctx: &GameContext<'_>,
    ) -> Result<GameReply, EngineError>;
}

/// Engine-provided capabilities games act through.
pub struct GameContext<'a> {
    pub agent: Address,
    pub commits: &'a PendingCommits,
    pub lotto: &'a LottoBook,
    pub clock: &'a dyn Clock,
    pub signing: &'a StateSigning,
}

impl GameContext<'_> {
    /// Signs the channel's current state. Call only after every balance and
    /// nonce update of the mutation has been applied.
    pub async fn sign_channel(&self, channel: &Channel) -> Result<String, EngineError> {
        let signature = self.signing.sign(&channel.signed_state()).await?;
        Ok(signature_to_hex(&signature))
    }
}

/// What a game hands back to the engine after an action.
pub struct GameReply {
    pub mutated: bool,
    pub record: Option<RoundRecord>,
    pub body: Value,
    pub events: Vec<crate::engine::events::CasinoEvent>,
}

impl GameReply {
    pub fn info(body: Value) -> Self {
        Self { mutated: false, record: None, body, events: Vec::new() }
    }

    pub fn mutation(record: RoundRecord, body: Value) -> Self {
        Self { mutated: true, record: Some(record), body, events: Vec::new() }
    }

    pub fn with_event(mut self, event: crate::engine::events::CasinoEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// Per-game running totals. Games hold stats and nothing else.
#[derive(Debug, Default)]
pub struct GameStats {
    inner: Mutex<StatsInner>,
}

#[derive(Clone, Debug, Default)]
struct StatsInner {
    rounds: u64,
    wagered: U256,
    paid_out: U256,
}

impl GameStats {
    pub fn record_round(&self, bet: U256, payout: U256) {
        let mut inner = self.inner.lock();
        inner.rounds += 1;
        inner.wagered += bet;
        inner.paid_out += payout;
    }

    /// `(rounds, wagered, paid_out)`.
    pub fn snapshot(&self) -> (u64, U256, U256) {
        let inner = self.inner.lock();
        (inner.rounds, inner.wagered, inner.paid_out)
    }
}

/// Pre-bet policy gate. Rejects non-positive bets, bets beyond the agent's
/// balance, and bets whose guarded worst case exceeds the house balance.
pub fn validate_bet(
    channel: &Channel,
    bet: U256,
    max_multiplier: u64,
    safety_factor: u64,
) -> Result<(), EngineError> {
    if bet.is_zero() {
        return Err(EngineError::BetNotPositive);
    }
    if channel.agent_balance < bet {
        return Err(EngineError::InsufficientBalance { need: bet, have: channel.agent_balance });
    }
    let worst_case = bet
        .checked_mul(U256::from(max_multiplier))
        .and_then(|v| v.checked_mul(U256::from(safety_factor)))
        .ok_or(EngineError::CannotCoverPayout)?;
    if worst_case > channel.casino_balance {
        return Err(EngineError::CannotCoverPayout);
    }
    Ok(())
}

pub(crate) fn amount_param(params: &Value, key: &'static str) -> Result<U256, EngineError> {
    let raw = params.get(key).ok_or(EngineError::MissingParam(key))?;
    let text = match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(EngineError::MissingParam(key)),
    };
    Ok(wei::to_wei(&text)?)
}

pub(crate) fn bet_param(params: &Value) -> Result<U256, EngineError> {
    amount_param(params, "amount")
}

pub(crate) fn str_param<'a>(params: &'a Value, key: &'static str) -> Result<&'a str, EngineError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or(EngineError::MissingParam(key))
}

pub(crate) fn u64_param(params: &Value, key: &'static str) -> Result<u64, EngineError> {
    match params.get(key) {
        Some(Value::Number(n)) => n.as_u64().ok_or(EngineError::MissingParam(key)),
        Some(Value::String(s)) => s.parse().map_err(|_| EngineError::MissingParam(key)),
        _ => Err(EngineError::MissingParam(key)),
    }
}

pub(crate) fn u64_param_or(
    params: &Value,
    key: &'static str,
    default: u64,
) -> Result<u64, EngineError> {
    if params.get(key).is_none() {
        return Ok(default);
    }
    u64_param(params, key)
}

/// Base fields every mutating reply carries.
pub(crate) fn channel_reply(channel: &Channel, signature: &str) -> Value {
    json!({
        "agent_balance": wei::to_decimal(channel.agent_balance),
        "casino_balance": wei::to_decimal(channel.casino_balance),
        "nonce": channel.nonce,
        "signature": signature,
    })
}

pub(crate) fn merge(base: Value, extra: Value) -> Value {
    let mut merged = match base {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("body".into(), other);
            map
        }
    };
    if let Value::Object(extra) = extra {
        merged.extend(extra);
    }
    Value::Object(merged)
}
