use std::collections::{HashMap, HashSet};

use alloy::primitives::{Address, U256};
use parking_lot::Mutex;

/// Call context the settlement layer receives from the chain: who is calling,
/// how much value rides along, and the block time in unix seconds.
#[derive(Clone, Copy, Debug)]
pub struct Env {
    pub caller: Address,
    pub value: U256,
    pub now: u64,
}

impl Env {
    pub fn call(caller: Address, now: u64) -> Self {
        Self { caller, value: U256::ZERO, now }
    }

    pub fn payable(caller: Address, value: U256, now: u64) -> Self {
        Self { caller, value, now }
    }
}

/// `call`-style value transfer: best effort, reports success. A `false`
/// return reroutes the amount to pull payment, it never reverts settlement.
pub trait ValueTransfer: Send + Sync {
    fn transfer(&self, to: Address, amount: U256) -> bool;
}

/// Account ledger standing in for the chain's native balance book.
#[derive(Default)]
pub struct InMemoryLedger {
    credits: Mutex<HashMap<Address, U256>>,
    rejecting: Mutex<HashSet<Address>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes transfers to `addr` fail, like a payee whose fallback reverts.
    pub fn reject(&self, addr: Address) {
        self.rejecting.lock().insert(addr);
    }

    pub fn allow(&self, addr: Address) {
        self.rejecting.lock().remove(&addr);
    }

    pub fn balance_of(&self, addr: Address) -> U256 {
        self.credits.lock().get(&addr).copied().unwrap_or_default()
    }
}

impl ValueTransfer for InMemoryLedger {
    fn transfer(&self, to: Address, amount: U256) -> bool {
        if self.rejecting.lock().contains(&to) {
            return false;
        }
        *self.credits.lock().entry(to).or_default() += amount;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_credits_and_rejects() {
        let ledger = InMemoryLedger::new();
        let payee = Address::repeat_byte(7);
        assert!(ledger.transfer(payee, U256::from(10u64)));
        assert_eq!(ledger.balance_of(payee), U256::from(10u64));

        ledger.reject(payee);
        assert!(!ledger.transfer(payee, U256::from(5u64)));
        assert_eq!(ledger.balance_of(payee), U256::from(10u64));

        ledger.allow(payee);
        assert!(ledger.transfer(payee, U256::from(5u64)));
        assert_eq!(ledger.balance_of(payee), U256::from(15u64));
    }
}
