//! Heads-or-tails over commit–reveal randomness.
//!
//! Wins pay `bet * 19 / 10`, integer-truncated. At 1 wei the truncated payout
//! equals the stake, so micro-bets carry a full house edge.

use alloy::primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{
    bet_param, channel_reply, merge, str_param, validate_bet, Game, GameContext, GameReply,
    GameStats, DEFAULT_SAFETY_FACTOR,
};
use crate::commit_reveal::{self, u32_at};
use crate::engine::channel::Channel;
use crate::engine::errors::EngineError;
use crate::engine::events::{CasinoEvent, RoundRecord};
use crate::engine::pending::PendingCommit;
use crate::wei;

const LOG_TARGET: &str = "agent_casino::games::coinflip";

pub const PAYOUT_NUMERATOR: u64 = 19;
pub const PAYOUT_DENOMINATOR: u64 = 10;
/// Bankroll guard uses the next integer above the 1.9x payout.
pub const MAX_MULTIPLIER: u64 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinSide {
    Heads,
    Tails,
}

impl CoinSide {
    pub fn parse(input: &str) -> Result<Self, EngineError> {
        match input {
            "heads" => Ok(Self::Heads),
            "tails" => Ok(Self::Tails),
            other => Err(EngineError::BadChoice(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heads => "heads",
            Self::Tails => "tails",
        }
    }
}

impl std::fmt::Display for CoinSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heads iff the big-endian u32 at offset 0 of the round hash is even.
pub fn side_from_hash(hash: &[u8; 32]) -> CoinSide {
    if u32_at(hash, 0) % 2 == 0 {
        CoinSide::Heads
    } else {
        CoinSide::Tails
    }
}

/// `bet * 19 / 10`, truncated.
pub fn win_payout(bet: U256) -> U256 {
    bet * U256::from(PAYOUT_NUMERATOR) / U256::from(PAYOUT_DENOMINATOR)
}

pub struct Coinflip {
    stats: GameStats,
}

impl Coinflip {
    pub fn new() -> Self {
        Self { stats: GameStats::default() }
    }

    pub fn stats(&self) -> &GameStats {
        &self.stats
    }
}

impl Default for Coinflip {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Game for Coinflip {
    fn name(&self) -> &'static str {
        "coinflip"
    }

    fn display_name(&self) -> &'static str {
        "Coin Flip"
    }

    fn rtp(&self) -> f64 {
        0.95
    }

    fn max_multiplier(&self) -> u64 {
        MAX_MULTIPLIER
    }

    fn actions(&self) -> &'static [&'static str] {
        &["commit", "reveal", "info"]
    }

    async fn handle_action(
        &self,
        action: &str,
        channel: Option<&mut Channel>,
        params: &Value,
        ctx: &GameContext<'_>,
    ) -> Result<GameReply, EngineError> {
        match action {
            "commit" => self.commit(channel.ok_or(EngineError::ChannelNotFound)?, params, ctx),
            "reveal" => {
                self.reveal(channel.ok_or(EngineError::ChannelNotFound)?, params, ctx).await
            }
            "info" => Ok(GameReply::info(self.info())),
            other => Err(EngineError::UnknownRoute(format!("coinflip_{other}"))),
        }
    }
}

impl Coinflip {
    fn commit(
        &self,
        channel: &mut Channel,
        params: &Value,
        ctx: &GameContext<'_>,
    ) -> Result<GameReply, EngineError> {
        let bet = bet_param(params)?;
        let choice = CoinSide::parse(str_param(params, "choice")?)?;
        validate_bet(channel, bet, self.max_multiplier(), DEFAULT_SAFETY_FACTOR)?;
        let now = ctx.clock.now();
        let commit = commit_reveal::commit();
        let commitment = commit.commitment.clone();
        ctx.commits.put(
            channel.agent,
            self.name(),
            PendingCommit {
                casino_seed: commit.seed,
                commitment: commitment.clone(),
                bet,
                choice: Some(choice.as_str().to_string()),
                created_at: now,
            },
            now,
        )?;
        let expires_at = now + ctx.commits.timeout();
        info!(target: LOG_TARGET, agent = %channel.agent, bet = %bet, %choice, "commit stored");
        Ok(GameReply::info(json!({
            "commitment": commitment,
            "bet": wei::to_decimal(bet),
            "choice": choice,
            "expires_at": expires_at,
        }))
        .with_event(CasinoEvent::CommitStored {
            ts: now,
            agent: channel.agent,
            game: self.name().to_string(),
            commitment,
            expires_at,
        }))
    }

    async fn reveal(
        &self,
        channel: &mut Channel,
        params: &Value,
        ctx: &GameContext<'_>,
    ) -> Result<GameReply, EngineError> {
        let agent_seed = str_param(params, "agent_seed")?;
        let now = ctx.clock.now();
        let pending = ctx.commits.take_fresh(channel.agent, self.name(), now)?;
        let bet = pending.bet;
        if channel.agent_balance < bet {
            return Err(EngineError::InsufficientBalance { need: bet, have: channel.agent_balance });
        }
        let choice = pending
            .choice
            .as_deref()
            .map(CoinSide::parse)
            .transpose()?
            .ok_or(EngineError::MissingParam("choice"))?;

        let result =
            commit_reveal::compute_result(pending.casino_seed.reveal(), agent_seed, channel.nonce);
        let outcome = side_from_hash(&result.hash);
        let won = outcome == choice;
        let mut payout = if won { win_payout(bet) } else { U256::ZERO };
        // The house can pay out at most its collateral plus the incoming bet.
        let cap = channel.casino_balance + bet;
        if payout > cap {
            payout = cap;
        }

        channel.apply_round(bet, payout)?;
        let mut record =
            RoundRecord::new(channel.agent, self.name(), bet, payout, won, channel.nonce, now);
        record.choice = Some(choice.as_str().to_string());
        record.result = Some(outcome.as_str().to_string());
        channel.games.push(record.clone());

        let signature = ctx.sign_channel(channel).await?;
        self.stats.record_round(bet, payout);
        info!(
            target: LOG_TARGET,
            agent = %channel.agent,
            %choice,
            %outcome,
            won,
            payout = %payout,
            nonce = channel.nonce,
            "round resolved"
        );

        let body = merge(
            channel_reply(channel, &signature),
            json!({
                "choice": choice,
                "result": outcome,
                "won": won,
                "payout": wei::to_decimal(payout),
                "proof": result.proof,
            }),
        );
        Ok(GameReply::mutation(record, body))
    }

    fn info(&self) -> Value {
        let (rounds, wagered, paid_out) = self.stats.snapshot();
        json!({
            "name": self.name(),
            "display_name": self.display_name(),
            "rtp": self.rtp(),
            "max_multiplier": self.max_multiplier(),
            "payout": format!("{PAYOUT_NUMERATOR}/{PAYOUT_DENOMINATOR}"),
            "rounds": rounds,
            "wagered": wei::to_decimal(wagered),
            "paid_out": wei::to_decimal(paid_out),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payout_truncates_to_integer_wei() {
        assert_eq!(win_payout(U256::from(10u64)), U256::from(19u64));
        // The documented micro-bet edge: a 1-wei win pays exactly 1 wei.
        assert_eq!(win_payout(U256::from(1u64)), U256::from(1u64));
        assert_eq!(win_payout(U256::from(15u64)), U256::from(28u64));
    }

    #[test]
    fn side_follows_parity_of_leading_word() {
        let mut hash = [0u8; 32];
        assert_eq!(side_from_hash(&hash), CoinSide::Heads);
        hash[3] = 1;
        assert_eq!(side_from_hash(&hash), CoinSide::Tails);
    }

    #[test]
    fn parse_rejects_anything_but_heads_or_tails() {
        assert_eq!(CoinSide::parse("heads").unwrap(), CoinSide::Heads);
        assert_eq!(CoinSide::parse("tails").unwrap(), CoinSide::Tails);
        assert!(matches!(CoinSide::parse("edge"), Err(EngineError::BadChoice(_))));
    }
}
