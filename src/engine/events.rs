//! Round, snapshot, and event records the engine publishes for consumers.
//!
//! Subscribers sit behind a bounded broadcast ring: slow or late readers lag
//! and miss events, they never back-pressure the engine.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use super::channel::{Channel, ChannelStatus};
use crate::wei;

const LOG_TARGET: &str = "agent_casino::engine::events";

/// Per-round record, wire format. Amounts are decimal-ether strings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundRecord {
    pub agent: Address,
    pub game: String,
    pub bet: String,
    pub payout: String,
    pub won: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reels: Option<[usize; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picked_number: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draw_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_count: Option<u64>,
    pub nonce: u64,
    pub timestamp: DateTime<Utc>,
}

impl RoundRecord {
    pub fn new(
        agent: Address,
        game: &str,
        bet: U256,
        payout: U256,
        won: bool,
        nonce: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            agent,
            game: game.to_string(),
            bet: wei::to_decimal(bet),
            payout: wei::to_decimal(payout),
            won,
            multiplier: None,
            reels: None,
            choice: None,
            result: None,
            picked_number: None,
            draw_id: None,
            ticket_count: None,
            nonce,
            timestamp,
        }
    }
}

/// Per-channel snapshot, wire format.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub agent: Address,
    pub status: ChannelStatus,
    pub agent_deposit: String,
    pub casino_deposit: String,
    pub agent_balance: String,
    pub casino_balance: String,
    pub nonce: u64,
    pub games_played: usize,
    pub opened_at: DateTime<Utc>,
}

impl From<&Channel> for ChannelSnapshot {
    fn from(channel: &Channel) -> Self {
        Self {
            agent: channel.agent,
            status: channel.status,
            agent_deposit: wei::to_decimal(channel.agent_deposit),
            casino_deposit: wei::to_decimal(channel.casino_deposit),
            agent_balance: wei::to_decimal(channel.agent_balance),
            casino_balance: wei::to_decimal(channel.casino_balance),
            nonce: channel.nonce,
            games_played: channel.games_played(),
            opened_at: channel.opened_at,
        }
    }
}

/// Everything the engine announces.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CasinoEvent {
    ChannelOpened {
        ts: DateTime<Utc>,
        snapshot: ChannelSnapshot,
    },
    ChannelClosed {
        ts: DateTime<Utc>,
        snapshot: ChannelSnapshot,
    },
    RoundResolved {
        ts: DateTime<Utc>,
        record: RoundRecord,
        snapshot: ChannelSnapshot,
    },
    CommitStored {
        ts: DateTime<Utc>,
        agent: Address,
        game: String,
        commitment: String,
        expires_at: DateTime<Utc>,
    },
    DrawScheduled {
        ts: DateTime<Utc>,
        draw_id: u64,
        commitment: String,
        draw_time: DateTime<Utc>,
    },
    DrawExecuted {
        ts: DateTime<Utc>,
        draw_id: u64,
        winning_number: u8,
        casino_seed: String,
        winners: usize,
    },
    WinningsAccrued {
        ts: DateTime<Utc>,
        agent: Address,
        draw_id: u64,
        amount: String,
    },
}

pub struct EventBus {
    tx: broadcast::Sender<CasinoEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: CasinoEvent) {
        if self.tx.send(event).is_err() {
            trace!(target: LOG_TARGET, "event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CasinoEvent> {
        self.tx.subscribe()
    }

    pub fn stream(&self) -> BroadcastStream<CasinoEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }
}
