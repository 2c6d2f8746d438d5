//! Process-wide bankroll exposure counter.
//!
//! The off-chain engine consults it before funding the house side of a
//! channel, and the on-chain bankroll manager wraps the same type, so the two
//! sides agree at equilibrium.

use alloy::primitives::U256;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

const LOG_TARGET: &str = "agent_casino::bankroll";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BankrollError {
    #[error("bankroll cap exceeded: locked {locked} + {requested} > max {max}")]
    ExposureExceeded { locked: U256, requested: U256, max: U256 },
    #[error("unlock of {requested} exceeds locked {locked}")]
    UnlockExceedsLocked { locked: U256, requested: U256 },
}

pub struct BankrollGuard {
    max_exposure: U256,
    total_locked: Mutex<U256>,
}

impl BankrollGuard {
    pub fn new(max_exposure: U256) -> Self {
        Self { max_exposure, total_locked: Mutex::new(U256::ZERO) }
    }

    pub fn lock(&self, amount: U256) -> Result<(), BankrollError> {
        let mut locked = self.total_locked.lock();
        let next = locked.checked_add(amount).ok_or(BankrollError::ExposureExceeded {
            locked: *locked,
            requested: amount,
            max: self.max_exposure,
        })?;
        if next > self.max_exposure {
            return Err(BankrollError::ExposureExceeded {
                locked: *locked,
                requested: amount,
                max: self.max_exposure,
            });
        }
        *locked = next;
        debug!(target: LOG_TARGET, locked = %next, "collateral locked");
        Ok(())
    }

    pub fn unlock(&self, amount: U256) -> Result<(), BankrollError> {
        let mut locked = self.total_locked.lock();
        if amount > *locked {
            return Err(BankrollError::UnlockExceedsLocked { locked: *locked, requested: amount });
        }
        *locked -= amount;
        debug!(target: LOG_TARGET, locked = %*locked, "collateral released");
        Ok(())
    }

    pub fn can_lock(&self, amount: U256) -> bool {
        self.total_locked
            .lock()
            .checked_add(amount)
            .map(|next| next <= self.max_exposure)
            .unwrap_or(false)
    }

    pub fn total_locked(&self) -> U256 {
        *self.total_locked.lock()
    }

    pub fn max_exposure(&self) -> U256 {
        self.max_exposure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_up_to_the_cap_exactly() {
        let guard = BankrollGuard::new(U256::from(100u64));
        guard.lock(U256::from(60u64)).unwrap();
        guard.lock(U256::from(40u64)).unwrap();
        assert_eq!(guard.total_locked(), U256::from(100u64));
        assert!(matches!(
            guard.lock(U256::from(1u64)),
            Err(BankrollError::ExposureExceeded { .. })
        ));
    }

    #[test]
    fn unlock_cannot_go_below_zero() {
        let guard = BankrollGuard::new(U256::from(100u64));
        guard.lock(U256::from(30u64)).unwrap();
        guard.unlock(U256::from(30u64)).unwrap();
        assert!(matches!(
            guard.unlock(U256::from(1u64)),
            Err(BankrollError::UnlockExceedsLocked { .. })
        ));
    }

    #[test]
    fn can_lock_previews_the_cap() {
        let guard = BankrollGuard::new(U256::from(10u64));
        assert!(guard.can_lock(U256::from(10u64)));
        guard.lock(U256::from(6u64)).unwrap();
        assert!(guard.can_lock(U256::from(4u64)));
        assert!(!guard.can_lock(U256::from(5u64)));
    }
}
