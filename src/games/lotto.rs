//! Number lottery with committed draws.
//!
//! The casino commits to the draw seed when the draw is scheduled; execution
//! mixes in public pool facts (holder count, pool size) so the winning number
//! is fixed before any ticket is sold yet unpredictable to both sides.
//! Prizes accrue to unclaimed winnings, which outlive channels and are paid
//! into whichever channel the winner has open at claim time.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use super::{
    channel_reply, merge, u64_param, u64_param_or, Game, GameContext, GameReply, GameStats,
};
use crate::commit_reveal::{self, u32_at, CasinoSeed};
use crate::engine::channel::Channel;
use crate::engine::errors::EngineError;
use crate::engine::events::RoundRecord;
use crate::wei;

const LOG_TARGET: &str = "agent_casino::games::lotto";

pub const NUMBER_MIN: u64 = 1;
pub const NUMBER_MAX: u64 = 100;
pub const PAYOUT_MULTIPLIER: u64 = 85;

/// One scheduled draw. Immutable once executed.
#[derive(Clone, Debug)]
pub struct Draw {
    pub id: u64,
    casino_seed: CasinoSeed,
    pub commitment: String,
    pub draw_time: DateTime<Utc>,
    pub tickets: HashMap<Address, Vec<u8>>,
    pub total_pool: U256,
}

impl Draw {
    fn scheduled(id: u64, draw_time: DateTime<Utc>) -> Self {
        let commit = commit_reveal::commit();
        Self {
            id,
            casino_seed: commit.seed,
            commitment: commit.commitment,
            draw_time,
            tickets: HashMap::new(),
            total_pool: U256::ZERO,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DrawWinner {
    pub agent: Address,
    pub matches: u64,
    pub payout: String,
}

/// Result of an executed draw, including the revealed seed so anyone can
/// check it against the commitment published at scheduling time.
#[derive(Clone, Debug, Serialize)]
pub struct DrawOutcome {
    pub draw_id: u64,
    pub commitment: String,
    pub casino_seed: String,
    pub entropy: String,
    pub winning_number: u8,
    pub total_pool: String,
    pub winners: Vec<DrawWinner>,
    pub drawn_at: DateTime<Utc>,
}

struct BookState {
    current: Draw,
    last_outcome: Option<DrawOutcome>,
    unclaimed: HashMap<Address, U256>,
    next_id: u64,
}

/// Draw schedule, tickets, and unclaimed winnings. Owned by the engine and
/// shared with the lotto game by handle.
pub struct LottoBook {
    state: Mutex<BookState>,
    ticket_price: U256,
    max_tickets: usize,
    interval: Duration,
}

impl LottoBook {
    pub fn new(
        ticket_price: U256,
        max_tickets: usize,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state: Mutex::new(BookState {
                current: Draw::scheduled(1, now + interval),
                last_outcome: None,
                unclaimed: HashMap::new(),
                next_id: 2,
            }),
            ticket_price,
            max_tickets,
            interval,
        }
    }

    pub fn ticket_price(&self) -> U256 {
        self.ticket_price
    }

    pub fn max_tickets(&self) -> usize {
        self.max_tickets
    }

    /// `(draw_id, commitment, draw_time)` of the draw currently selling.
    pub fn current_info(&self) -> (u64, String, DateTime<Utc>) {
        let state = self.state.lock();
        (state.current.id, state.current.commitment.clone(), state.current.draw_time)
    }

    pub fn tickets_of(&self, agent: Address) -> Vec<u8> {
        self.state.lock().current.tickets.get(&agent).cloned().unwrap_or_default()
    }

    /// Ticket-cap check for a prospective purchase.
    pub fn can_buy(&self, agent: Address, count: u64) -> Result<(), EngineError> {
        let state = self.state.lock();
        let held = state.current.tickets.get(&agent).map_or(0, Vec::len);
        if held as u64 + count > self.max_tickets as u64 {
            return Err(EngineError::TicketLimit { max: self.max_tickets });
        }
        Ok(())
    }

    /// Registers a paid-for purchase. Call only after the wager has been
    /// applied to the channel. The ticket cap is re-checked here.
    pub fn record_purchase(
        &self,
        agent: Address,
        pick: u8,
        count: u64,
        cost: U256,
    ) -> Result<u64, EngineError> {
        let mut state = self.state.lock();
        let held = state.current.tickets.get(&agent).map_or(0, Vec::len);
        if held as u64 + count > self.max_tickets as u64 {
            return Err(EngineError::TicketLimit { max: self.max_tickets });
        }
        let draw_id = state.current.id;
        state
            .current
            .tickets
            .entry(agent)
            .or_default()
            .extend(std::iter::repeat(pick).take(count as usize));
        state.current.total_pool += cost;
        Ok(draw_id)
    }

    pub fn unclaimed_of(&self, agent: Address) -> U256 {
        self.state.lock().unclaimed.get(&agent).copied().unwrap_or_default()
    }

    pub fn deduct_unclaimed(&self, agent: Address, amount: U256) {
        let mut state = self.state.lock();
        if let Some(balance) = state.unclaimed.get_mut(&agent) {
            *balance = balance.saturating_sub(amount);
            if balance.is_zero() {
                state.unclaimed.remove(&agent);
            }
        }
    }

    /// Executes the current draw if due and schedules the next one. Winnings
    /// accrue to unclaimed balances; nothing touches any channel here.
    pub fn execute_due(&self, now: DateTime<Utc>) -> Option<DrawOutcome> {
        let mut state = self.state.lock();
        if state.current.draw_time > now {
            return None;
        }
        let next_id = state.next_id;
        state.next_id += 1;
        let draw = std::mem::replace(&mut state.current, Draw::scheduled(next_id, now + self.interval));

        let entropy = format!("{}:{}", draw.tickets.len(), draw.total_pool);
        let result = commit_reveal::compute_result(draw.casino_seed.reveal(), &entropy, draw.id);
        let winning_number = (u32_at(&result.hash, 0) % 100 + 1) as u8;

        let mut winners = Vec::new();
        for (agent, picks) in &draw.tickets {
            let matches = picks.iter().filter(|pick| **pick == winning_number).count() as u64;
            if matches == 0 {
                continue;
            }
            let payout = self.ticket_price * U256::from(PAYOUT_MULTIPLIER) * U256::from(matches);
            *state.unclaimed.entry(*agent).or_default() += payout;
            winners.push(DrawWinner {
                agent: *agent,
                matches,
                payout: wei::to_decimal(payout),
            });
        }

        let outcome = DrawOutcome {
            draw_id: draw.id,
            commitment: draw.commitment.clone(),
            casino_seed: draw.casino_seed.reveal().to_string(),
            entropy,
            winning_number,
            total_pool: wei::to_decimal(draw.total_pool),
            winners,
            drawn_at: now,
        };
        info!(
            target: LOG_TARGET,
            draw_id = outcome.draw_id,
            winning_number,
            winners = outcome.winners.len(),
            "draw executed"
        );
        state.last_outcome = Some(outcome.clone());
        Some(outcome)
    }

    pub fn last_outcome(&self) -> Option<DrawOutcome> {
        self.state.lock().last_outcome.clone()
    }

    #[cfg(test)]
    pub(crate) fn current_seed(&self) -> String {
        self.state.lock().current.casino_seed.reveal().to_string()
    }
}

pub struct Lotto {
    book: Arc<LottoBook>,
    stats: GameStats,
}

impl Lotto {
    pub fn new(book: Arc<LottoBook>) -> Self {
        Self { book, stats: GameStats::default() }
    }

    pub fn stats(&self) -> &GameStats {
        &self.stats
    }
}

#[async_trait]
impl Game for Lotto {
    fn name(&self) -> &'static str {
        "lotto"
    }

    fn display_name(&self) -> &'static str {
        "Number Lotto"
    }

    fn rtp(&self) -> f64 {
        0.85
    }

    fn max_multiplier(&self) -> u64 {
        PAYOUT_MULTIPLIER
    }

    fn actions(&self) -> &'static [&'static str] {
        &["buy", "claim", "status"]
    }

    async fn handle_action(
        &self,
        action: &str,
        channel: Option<&mut Channel>,
        params: &Value,
        ctx: &GameContext<'_>,
    ) -> Result<GameReply, EngineError> {
        match action {
            "buy" => self.buy(channel.ok_or(EngineError::ChannelNotFound)?, params, ctx).await,
            "claim" => self.claim(channel.ok_or(EngineError::ChannelNotFound)?, ctx).await,
            "status" => Ok(GameReply::info(self.status(ctx))),
            other => Err(EngineError::UnknownRoute(format!("lotto_{other}"))),
        }
    }
}

impl Lotto {
    async fn buy(
        &self,
        channel: &mut Channel,
        params: &Value,
        ctx: &GameContext<'_>,
    ) -> Result<GameReply, EngineError> {
        let pick = u64_param(params, "number")?;
        if !(NUMBER_MIN..=NUMBER_MAX).contains(&pick) {
            return Err(EngineError::BadPick(pick));
        }
        let count = u64_param_or(params, "tickets", 1)?;
        if count == 0 || count > self.book.max_tickets() as u64 {
            return Err(EngineError::BadTicketCount { count, max: self.book.max_tickets() });
        }
        self.book.can_buy(channel.agent, count)?;

        let price = self.book.ticket_price();
        let cost = price * U256::from(count);
        if channel.agent_balance < cost {
            return Err(EngineError::InsufficientBalance {
                need: cost,
                have: channel.agent_balance,
            });
        }
        // An unpayable jackpot must be impossible to sell.
        let jackpot = price * U256::from(PAYOUT_MULTIPLIER) * U256::from(count);
        if jackpot > channel.casino_balance {
            return Err(EngineError::CannotCoverPayout);
        }

        let now = ctx.clock.now();
        channel.apply_round(cost, U256::ZERO)?;
        let mut record = RoundRecord::new(
            channel.agent,
            self.name(),
            cost,
            U256::ZERO,
            false,
            channel.nonce,
            now,
        );
        record.picked_number = Some(pick as u8);
        record.ticket_count = Some(count);
        let (draw_id, commitment, draw_time) = self.book.current_info();
        record.draw_id = Some(draw_id);
        channel.games.push(record.clone());

        let signature = ctx.sign_channel(channel).await?;
        self.book.record_purchase(channel.agent, pick as u8, count, cost)?;
        self.stats.record_round(cost, U256::ZERO);
        info!(
            target: LOG_TARGET,
            agent = %channel.agent,
            pick,
            count,
            cost = %cost,
            draw_id,
            "tickets bought"
        );

        let body = merge(
            channel_reply(channel, &signature),
            json!({
                "picked_number": pick,
                "tickets": count,
                "cost": wei::to_decimal(cost),
                "draw_id": draw_id,
                "draw_time": draw_time,
                "commitment": commitment,
            }),
        );
        Ok(GameReply::mutation(record, body))
    }

    async fn claim(
        &self,
        channel: &mut Channel,
        ctx: &GameContext<'_>,
    ) -> Result<GameReply, EngineError> {
        let unclaimed = self.book.unclaimed_of(channel.agent);
        let amount = unclaimed.min(channel.casino_balance);
        if amount.is_zero() {
            return Err(EngineError::NothingToClaim);
        }
        let now = ctx.clock.now();
        channel.apply_round(U256::ZERO, amount)?;
        let record = RoundRecord::new(
            channel.agent,
            self.name(),
            U256::ZERO,
            amount,
            true,
            channel.nonce,
            now,
        );
        channel.games.push(record.clone());

        let signature = ctx.sign_channel(channel).await?;
        self.book.deduct_unclaimed(channel.agent, amount);
        info!(
            target: LOG_TARGET,
            agent = %channel.agent,
            claimed = %amount,
            remaining = %self.book.unclaimed_of(channel.agent),
            "winnings claimed"
        );

        let body = merge(
            channel_reply(channel, &signature),
            json!({
                "claimed": wei::to_decimal(amount),
                "remaining_unclaimed": wei::to_decimal(self.book.unclaimed_of(channel.agent)),
            }),
        );
        Ok(GameReply::mutation(record, body))
    }

    fn status(&self, ctx: &GameContext<'_>) -> Value {
        let (draw_id, commitment, draw_time) = self.book.current_info();
        let tickets = self.book.tickets_of(ctx.agent);
        json!({
            "name": self.name(),
            "display_name": self.display_name(),
            "rtp": self.rtp(),
            "ticket_price": wei::to_decimal(self.book.ticket_price()),
            "payout_multiplier": PAYOUT_MULTIPLIER,
            "max_tickets_per_draw": self.book.max_tickets(),
            "draw_id": draw_id,
            "commitment": commitment,
            "draw_time": draw_time,
            "your_tickets": tickets,
            "unclaimed": wei::to_decimal(self.book.unclaimed_of(ctx.agent)),
            "last_draw": self.book.last_outcome(),
        })
    }
}
