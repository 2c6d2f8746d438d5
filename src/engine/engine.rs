//! The off-chain channel engine: channel table, game routing, and signed
//! state production.
//!
//! One logical mutator per channel: each channel lives behind its own async
//! mutex, held across the signing await so operations on the same channel are
//! totally ordered. Mutations are staged on a copy and committed only after
//! the house signature lands, so a signing failure rolls back cleanly.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use super::channel::{Channel, ChannelStatus};
use super::errors::{EngineError, ErrorKind};
use super::events::{CasinoEvent, ChannelSnapshot, EventBus, RoundRecord};
use super::pending::PendingCommits;
use crate::bankroll::BankrollGuard;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::games::{Coinflip, Game, GameContext, Lotto, LottoBook, Slots};
use crate::signing::StateSigning;
use crate::wei;

const LOG_TARGET: &str = "agent_casino::engine";

pub struct ChannelEngine {
    channels: DashMap<Address, Arc<AsyncMutex<Channel>>>,
    games: Vec<Arc<dyn Game>>,
    routes: HashMap<String, (usize, &'static str)>,
    commits: PendingCommits,
    lotto: Arc<LottoBook>,
    bankroll: Arc<BankrollGuard>,
    signing: StateSigning,
    events: EventBus,
    clock: Arc<dyn Clock>,
    max_channels: usize,
}

impl ChannelEngine {
    pub fn new(
        config: EngineConfig,
        signing: StateSigning,
        bankroll: Arc<BankrollGuard>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let lotto = Arc::new(LottoBook::new(
            config.ticket_price,
            config.max_tickets_per_draw,
            config.draw_interval,
            now,
        ));
        let mut engine = Self {
            channels: DashMap::new(),
            games: Vec::new(),
            routes: HashMap::new(),
            commits: PendingCommits::new(config.commit_timeout),
            lotto: lotto.clone(),
            bankroll,
            signing,
            events: EventBus::new(config.event_capacity),
            clock,
            max_channels: config.max_channels,
        };
        engine.register(Arc::new(Slots::new()));
        engine.register(Arc::new(Coinflip::new()));
        engine.register(Arc::new(Lotto::new(lotto)));

        let (draw_id, commitment, draw_time) = engine.lotto.current_info();
        engine.events.publish(CasinoEvent::DrawScheduled { ts: now, draw_id, commitment, draw_time });
        engine
    }

    /// Adding a game means registering one capability instance; the route
    /// table picks up a `"<name>_<action>"` entry per action.
    pub fn register(&mut self, game: Arc<dyn Game>) {
        let idx = self.games.len();
        for action in game.actions() {
            self.routes.insert(format!("{}_{}", game.name(), action), (idx, action));
        }
        self.games.push(game);
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn bankroll(&self) -> &BankrollGuard {
        &self.bankroll
    }

    pub fn lotto(&self) -> &LottoBook {
        &self.lotto
    }

    pub fn house(&self) -> Address {
        self.signing.house()
    }

    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }

    /// Mirrors an on-chain open plus house funding. Balances start at the
    /// deposits, nonce at zero.
    pub fn open_channel(
        &self,
        agent: Address,
        agent_deposit: U256,
        casino_deposit: U256,
    ) -> Result<Value, EngineError> {
        if self.channels.len() >= self.max_channels {
            return Err(EngineError::MaxChannels(self.max_channels));
        }
        let now = self.clock.now();
        match self.channels.entry(agent) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::ChannelExists),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                self.bankroll.lock(casino_deposit)?;
                let channel = Channel::open(agent, agent_deposit, casino_deposit, now);
                let snapshot = ChannelSnapshot::from(&channel);
                slot.insert(Arc::new(AsyncMutex::new(channel)));
                info!(
                    target: LOG_TARGET,
                    %agent,
                    agent_deposit = %agent_deposit,
                    casino_deposit = %casino_deposit,
                    "channel opened"
                );
                self.events.publish(CasinoEvent::ChannelOpened { ts: now, snapshot });
                Ok(json!({
                    "status": "open",
                    "agent_balance": wei::to_decimal(agent_deposit),
                    "casino_balance": wei::to_decimal(casino_deposit),
                }))
            }
        }
    }

    pub async fn channel_status(&self, agent: Address) -> Result<Value, EngineError> {
        let arc = self.channel_arc(&agent)?;
        let channel = arc.lock().await;
        Ok(json!({
            "status": channel.status,
            "agent_balance": wei::to_decimal(channel.agent_balance),
            "casino_balance": wei::to_decimal(channel.casino_balance),
            "nonce": channel.nonce,
            "games_played": channel.games_played(),
            "invariant_ok": channel.invariant_ok(),
        }))
    }

    /// Routes `"<game>_<action>"` to the owning game. Mutating actions run
    /// against a staged copy that is committed only on success.
    pub async fn handle_action(
        &self,
        route: &str,
        agent: Address,
        params: &Value,
    ) -> Result<Value, EngineError> {
        let (game_idx, action) = self
            .routes
            .get(route)
            .copied()
            .ok_or_else(|| EngineError::UnknownRoute(route.to_string()))?;
        let game = self.games[game_idx].clone();
        let ctx = GameContext {
            agent,
            commits: &self.commits,
            lotto: self.lotto.as_ref(),
            clock: self.clock.as_ref(),
            signing: &self.signing,
        };

        if !game.channel_required(action) {
            let reply = game.handle_action(action, None, params, &ctx).await?;
            for event in reply.events {
                self.events.publish(event);
            }
            return Ok(reply.body);
        }

        let arc = self.channel_arc(&agent)?;
        let mut guard = arc.lock().await;
        if guard.status != ChannelStatus::Open {
            return Err(EngineError::ChannelNotFound);
        }
        let mut staged = guard.clone();
        let reply = match game.handle_action(action, Some(&mut staged), params, &ctx).await {
            Ok(reply) => reply,
            Err(err) => {
                if err.kind() != ErrorKind::Validation {
                    warn!(target: LOG_TARGET, %agent, route, %err, "action rejected");
                }
                return Err(err);
            }
        };

        if reply.mutated {
            debug_assert_eq!(staged.nonce, guard.nonce + 1);
            *guard = staged;
            let snapshot = ChannelSnapshot::from(&*guard);
            if let Some(record) = reply.record {
                self.events.publish(CasinoEvent::RoundResolved {
                    ts: self.clock.now(),
                    record,
                    snapshot,
                });
            }
        }
        for event in reply.events {
            self.events.publish(event);
        }
        Ok(reply.body)
    }

    /// Recomputes conservation, signs the final state, and drops the channel.
    /// A broken invariant means a code bug; the close is refused.
    pub async fn close_channel(&self, agent: Address) -> Result<Value, EngineError> {
        let arc = self.channel_arc(&agent)?;
        let mut guard = arc.lock().await;
        if guard.status != ChannelStatus::Open {
            return Err(EngineError::ChannelNotFound);
        }
        if let Err(err) = guard.check_conservation() {
            error!(target: LOG_TARGET, %agent, %err, "refusing to close channel");
            return Err(err);
        }

        let signature = crate::signing::signature_to_hex(&self.signing.sign(&guard.signed_state()).await?);
        guard.status = ChannelStatus::Closed;
        self.bankroll.unlock(guard.casino_deposit).map_err(|err| {
            guard.status = ChannelStatus::Open;
            EngineError::from(err)
        })?;

        let snapshot = ChannelSnapshot::from(&*guard);
        let reply = json!({
            "agent_balance": wei::to_decimal(guard.agent_balance),
            "casino_balance": wei::to_decimal(guard.casino_balance),
            "nonce": guard.nonce,
            "signature": signature,
            "total_games": guard.games_played(),
        });
        self.channels.remove(&agent);
        drop(guard);

        info!(target: LOG_TARGET, %agent, "channel closed");
        self.events.publish(CasinoEvent::ChannelClosed { ts: self.clock.now(), snapshot });
        Ok(reply)
    }

    /// Executes due lotto draws and folds winnings into still-open winner
    /// channels. Safe to fire at any time; effects look like any other
    /// channel mutation.
    pub async fn run_scheduled(&self) -> Result<Value, EngineError> {
        let now = self.clock.now();
        let mut draws_executed = 0usize;
        let mut applied = Vec::new();

        while let Some(outcome) = self.lotto.execute_due(now) {
            draws_executed += 1;
            self.events.publish(CasinoEvent::DrawExecuted {
                ts: now,
                draw_id: outcome.draw_id,
                winning_number: outcome.winning_number,
                casino_seed: outcome.casino_seed.clone(),
                winners: outcome.winners.len(),
            });
            let (draw_id, commitment, draw_time) = self.lotto.current_info();
            self.events.publish(CasinoEvent::DrawScheduled { ts: now, draw_id, commitment, draw_time });

            for winner in &outcome.winners {
                self.events.publish(CasinoEvent::WinningsAccrued {
                    ts: now,
                    agent: winner.agent,
                    draw_id: outcome.draw_id,
                    amount: winner.payout.clone(),
                });
                match self.apply_winnings(winner.agent).await {
                    Ok(Some((amount, signature))) => applied.push(json!({
                        "agent": winner.agent,
                        "applied": wei::to_decimal(amount),
                        "signature": signature,
                    })),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(target: LOG_TARGET, agent = %winner.agent, %err, "failed to apply winnings")
                    }
                }
            }
        }

        Ok(json!({ "draws_executed": draws_executed, "winnings_applied": applied }))
    }

    pub async fn list_channels(&self) -> Vec<ChannelSnapshot> {
        let arcs: Vec<_> = self.channels.iter().map(|entry| entry.value().clone()).collect();
        let mut snapshots = Vec::with_capacity(arcs.len());
        for arc in arcs {
            let channel = arc.lock().await;
            snapshots.push(ChannelSnapshot::from(&*channel));
        }
        snapshots
    }

    /// Moves `min(unclaimed, casino_balance)` into the agent's open channel
    /// and returns the applied amount with the fresh signature. With no open
    /// channel the balance simply stays unclaimed.
    async fn apply_winnings(&self, agent: Address) -> Result<Option<(U256, String)>, EngineError> {
        let unclaimed = self.lotto.unclaimed_of(agent);
        if unclaimed.is_zero() {
            return Ok(None);
        }
        let arc = match self.channel_arc(&agent) {
            Ok(arc) => arc,
            Err(_) => return Ok(None),
        };
        let mut guard = arc.lock().await;
        if guard.status != ChannelStatus::Open {
            return Ok(None);
        }
        let amount = unclaimed.min(guard.casino_balance);
        if amount.is_zero() {
            return Ok(None);
        }

        let now = self.clock.now();
        let mut staged = guard.clone();
        staged.apply_round(U256::ZERO, amount)?;
        let record =
            RoundRecord::new(agent, "lotto", U256::ZERO, amount, true, staged.nonce, now);
        staged.games.push(record.clone());

        let signature =
            crate::signing::signature_to_hex(&self.signing.sign(&staged.signed_state()).await?);
        *guard = staged;
        self.lotto.deduct_unclaimed(agent, amount);

        let snapshot = ChannelSnapshot::from(&*guard);
        info!(target: LOG_TARGET, %agent, amount = %amount, "winnings applied to channel");
        self.events.publish(CasinoEvent::RoundResolved { ts: now, record, snapshot });
        Ok(Some((amount, signature)))
    }

    fn channel_arc(&self, agent: &Address) -> Result<Arc<AsyncMutex<Channel>>, EngineError> {
        self.channels
            .get(agent)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::ChannelNotFound)
    }

    #[cfg(test)]
    pub(crate) fn pending_commits(&self) -> &PendingCommits {
        &self.commits
    }

    #[cfg(test)]
    pub(crate) async fn tamper_channel<F>(&self, agent: Address, mutate: F)
    where
        F: FnOnce(&mut Channel),
    {
        let arc = self.channel_arc(&agent).expect("channel must exist");
        let mut guard = arc.lock().await;
        mutate(&mut guard);
    }
}
