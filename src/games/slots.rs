//! Three-reel slot machine over commit–reveal randomness.

use alloy::primitives::U256;
use async_trait::async_trait;
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

const LOG_TARGET: &str = "agent_casino::games::slots";

pub const SYMBOLS: [&str; 5] = ["cherry", "lemon", "orange", "bell", "seven"];
/// Per-symbol draw weights out of 100.
pub const WEIGHTS: [u32; 5] = [30, 25, 20, 15, 10];
/// Payout multiplier for a triple of the matching symbol.
pub const PAYOUTS: [u64; 5] = [5, 10, 25, 50, 290];

pub struct Slots {
    stats: GameStats,
}

impl Slots {
    pub fn new() -> Self {
        Self { stats: GameStats::default() }
    }

    pub fn stats(&self) -> &GameStats {
        &self.stats
    }
}

impl Default for Slots {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a uniform roll in `0..100` through the weight table.
pub fn reel_index(roll: u32) -> usize {
    let mut acc = 0u32;
    for (idx, weight) in WEIGHTS.iter().enumerate() {
        acc += weight;
        if roll < acc {
            return idx;
        }
    }
    WEIGHTS.len() - 1
}

/// Reels are the big-endian u32s at byte offsets 0, 4, 8 of the round hash,
/// each reduced mod 100 and mapped through the weights.
pub fn reels_from_hash(hash: &[u8; 32]) -> [usize; 3] {
    [
        reel_index(u32_at(hash, 0) % 100),
        reel_index(u32_at(hash, 4) % 100),
        reel_index(u32_at(hash, 8) % 100),
    ]
}

#[async_trait]
impl Game for Slots {
    fn name(&self) -> &'static str {
        "slots"
    }

    fn display_name(&self) -> &'static str {
        "Slot Machine"
    }

    fn rtp(&self) -> f64 {
        0.95
    }

    fn max_multiplier(&self) -> u64 {
        PAYOUTS[PAYOUTS.len() - 1]
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
            other => Err(EngineError::UnknownRoute(format!("slots_{other}"))),
        }
    }
}

impl Slots {
    fn commit(
        &self,
        channel: &mut Channel,
        params: &Value,
        ctx: &GameContext<'_>,
    ) -> Result<GameReply, EngineError> {
        let bet = bet_param(params)?;
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
                choice: None,
                created_at: now,
            },
            now,
        )?;
        let expires_at = now + ctx.commits.timeout();
        info!(target: LOG_TARGET, agent = %channel.agent, bet = %bet, "commit stored");
        Ok(GameReply::info(json!({
            "commitment": commitment,
            "bet": wei::to_decimal(bet),
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
        // Balance may have moved since the commit (parallel games).
        if channel.agent_balance < bet {
            return Err(EngineError::InsufficientBalance { need: bet, have: channel.agent_balance });
        }

        let result =
            commit_reveal::compute_result(pending.casino_seed.reveal(), agent_seed, channel.nonce);
        let reels = reels_from_hash(&result.hash);
        let won = reels[0] == reels[1] && reels[1] == reels[2];
        let mut payout =
            if won { bet * U256::from(PAYOUTS[reels[0]]) } else { U256::ZERO };
        if payout > channel.casino_balance {
            payout = channel.casino_balance;
        }

        channel.apply_round(bet, payout)?;
        let mut record =
            RoundRecord::new(channel.agent, self.name(), bet, payout, won, channel.nonce, now);
        record.reels = Some(reels);
        record.multiplier = won.then(|| PAYOUTS[reels[0]]);
        channel.games.push(record.clone());

        let signature = ctx.sign_channel(channel).await?;
        self.stats.record_round(bet, payout);
        info!(
            target: LOG_TARGET,
            agent = %channel.agent,
            ?reels,
            won,
            payout = %payout,
            nonce = channel.nonce,
            "round resolved"
        );

        let body = merge(
            channel_reply(channel, &signature),
            json!({
                "reels": reels,
                "symbols": [SYMBOLS[reels[0]], SYMBOLS[reels[1]], SYMBOLS[reels[2]]],
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
            "symbols": SYMBOLS,
            "weights": WEIGHTS,
            "payouts": PAYOUTS,
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
    fn weights_and_payouts_line_up() {
        assert_eq!(WEIGHTS.iter().sum::<u32>(), 100);
        assert_eq!(WEIGHTS.len(), PAYOUTS.len());
        assert_eq!(WEIGHTS.len(), SYMBOLS.len());
    }

    #[test]
    fn reel_index_maps_the_weight_buckets() {
        assert_eq!(reel_index(0), 0);
        assert_eq!(reel_index(29), 0);
        assert_eq!(reel_index(30), 1);
        assert_eq!(reel_index(54), 1);
        assert_eq!(reel_index(55), 2);
        assert_eq!(reel_index(74), 2);
        assert_eq!(reel_index(75), 3);
        assert_eq!(reel_index(89), 3);
        assert_eq!(reel_index(90), 4);
        assert_eq!(reel_index(99), 4);
    }

    #[test]
    fn reels_derive_from_fixed_offsets() {
        let result = commit_reveal::compute_result("casino", "agent", 0);
        let reels = reels_from_hash(&result.hash);
        assert_eq!(reels[0], reel_index(u32_at(&result.hash, 0) % 100));
        assert_eq!(reels[1], reel_index(u32_at(&result.hash, 4) % 100));
        assert_eq!(reels[2], reel_index(u32_at(&result.hash, 8) % 100));
    }
}
