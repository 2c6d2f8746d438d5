//! Stealth-address funding relay.
//!
//! Fire-and-forget: takes an address and a value, forwards the value, keeps
//! no record linking the destination back to any channel or agent.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tracing::{info, warn};

use crate::settlement::env::ValueTransfer;

const LOG_TARGET: &str = "agent_casino::relay";

pub struct RelaySink {
    transfers: Arc<dyn ValueTransfer>,
}

impl RelaySink {
    pub fn new(transfers: Arc<dyn ValueTransfer>) -> Self {
        Self { transfers }
    }

    pub fn forward(&self, stealth: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        if self.transfers.transfer(stealth, amount) {
            info!(target: LOG_TARGET, amount = %amount, "value forwarded");
        } else {
            warn!(target: LOG_TARGET, amount = %amount, "forward failed");
        }
    }
}
