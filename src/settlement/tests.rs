#![cfg(test)]

use std::sync::Arc;

use alloy::primitives::{Address, PrimitiveSignature, U256};
use parking_lot::Mutex;

use super::bankroll_manager::BankrollManager;
use super::contract::{ChannelSettlement, EscrowStage};
use super::env::{Env, InMemoryLedger};
use super::errors::SettlementError;
use super::insurance::InsuranceFund;
use crate::config::ContractParams;
use crate::signing::{ChannelState, LocalStateSigner, StateSigning};
use crate::wei;

const CHAIN_ID: u64 = 31337;
const T0: u64 = 1_700_000_000;

struct Chain {
    contract: ChannelSettlement,
    ledger: InMemoryLedger,
    signing: StateSigning,
    insurance: Arc<Mutex<InsuranceFund>>,
    bankroll: Arc<Mutex<BankrollManager>>,
    owner: Address,
}

fn eth(amount: &str) -> U256 {
    wei::to_wei(amount).unwrap()
}

fn agent(tag: u8) -> Address {
    Address::repeat_byte(tag)
}

fn chain() -> Chain {
    let contract_addr = Address::repeat_byte(0xCC);
    let signing =
        StateSigning::new(CHAIN_ID, contract_addr, Arc::new(LocalStateSigner::random()));
    let owner = signing.house();
    let params = ContractParams::default();

    let mut contract = ChannelSettlement::new(contract_addr, owner, CHAIN_ID, params.clone());
    let insurance =
        Arc::new(Mutex::new(InsuranceFund::new(owner, params.insurance_timelock_secs)));
    let bankroll = Arc::new(Mutex::new(BankrollManager::new(owner, eth("100"))));
    insurance.lock().set_channel_manager(Env::call(owner, T0), contract_addr).unwrap();
    bankroll.lock().set_channel_manager(Env::call(owner, T0), contract_addr).unwrap();
    contract.set_insurance_fund(Env::call(owner, T0), insurance.clone()).unwrap();
    contract.set_bankroll_manager(Env::call(owner, T0), bankroll.clone()).unwrap();

    Chain { contract, ledger: InMemoryLedger::new(), signing, insurance, bankroll, owner }
}

async fn house_signed(
    chain: &Chain,
    who: Address,
    agent_balance: U256,
    casino_balance: U256,
    nonce: u64,
) -> PrimitiveSignature {
    chain
        .signing
        .sign(&ChannelState {
            agent: who,
            agentBalance: agent_balance,
            casinoBalance: casino_balance,
            nonce: U256::from(nonce),
        })
        .await
        .unwrap()
}

fn open_and_fund(chain: &mut Chain, who: Address, agent_deposit: U256, casino_deposit: U256) {
    chain.contract.open_channel(Env::payable(who, agent_deposit, T0)).unwrap();
    chain
        .contract
        .fund_casino_side(Env::payable(chain.owner, casino_deposit, T0), who)
        .unwrap();
}

#[tokio::test]
async fn s1_cooperative_close_with_no_games() {
    let mut chain = chain();
    let a = agent(0x11);
    open_and_fund(&mut chain, a, eth("0.01"), eth("0.01"));
    assert_eq!(chain.bankroll.lock().total_locked(), eth("0.01"));

    let sig = house_signed(&chain, a, eth("0.01"), eth("0.01"), 0).await;
    chain
        .contract
        .close_channel(Env::call(a, T0 + 10), eth("0.01"), eth("0.01"), 0, &sig, &chain.ledger)
        .unwrap();

    assert_eq!(chain.ledger.balance_of(a), eth("0.01"));
    assert_eq!(chain.ledger.balance_of(chain.owner), eth("0.01"));
    assert_eq!(chain.insurance.lock().balance(), U256::ZERO);
    assert_eq!(chain.bankroll.lock().total_locked(), U256::ZERO);
    assert!(chain.contract.channel_of(a).is_none());
}

#[tokio::test]
async fn s5_dispute_counter_and_resolution_with_insurance_skim() {
    let mut chain = chain();
    let a = agent(0x22);
    open_and_fund(&mut chain, a, eth("0.1"), eth("0.1"));

    // Agent challenges with the stale nonce-7 state.
    let stale = house_signed(&chain, a, eth("0.12"), eth("0.08"), 7).await;
    let deadline = chain
        .contract
        .start_challenge(Env::call(a, T0 + 100), eth("0.12"), eth("0.08"), 7, &stale)
        .unwrap();
    assert_eq!(deadline, T0 + 100 + 86_400);
    assert_eq!(chain.contract.channel_of(a).unwrap().stage, EscrowStage::Disputed);

    // House counters inside the window with the later nonce-9 state.
    let fresh = house_signed(&chain, a, eth("0.08"), eth("0.12"), 9).await;
    let counter_at = T0 + 1_000;
    let new_deadline = chain
        .contract
        .counter_challenge(
            Env::call(chain.owner, counter_at),
            a,
            eth("0.08"),
            eth("0.12"),
            9,
            &fresh,
        )
        .unwrap();
    assert_eq!(new_deadline, counter_at + 86_400);

    // Too early to resolve.
    assert!(matches!(
        chain.contract.resolve_challenge(Env::call(a, new_deadline), a, &chain.ledger),
        Err(SettlementError::DeadlineNotReached { .. })
    ));

    chain
        .contract
        .resolve_challenge(Env::call(a, new_deadline + 1), a, &chain.ledger)
        .unwrap();

    // Insurance skims 10% of the 0.02 house profit.
    assert_eq!(chain.ledger.balance_of(a), eth("0.08"));
    assert_eq!(chain.ledger.balance_of(chain.owner), eth("0.118"));
    assert_eq!(chain.insurance.lock().balance(), eth("0.002"));
    assert_eq!(chain.bankroll.lock().total_locked(), U256::ZERO);
    assert!(chain.contract.channel_of(a).is_none());
}

#[tokio::test]
async fn counter_challenge_requires_strictly_higher_nonce_inside_the_window() {
    let mut chain = chain();
    let a = agent(0x23);
    open_and_fund(&mut chain, a, eth("0.1"), eth("0.1"));

    let sig7 = house_signed(&chain, a, eth("0.12"), eth("0.08"), 7).await;
    chain
        .contract
        .start_challenge(Env::call(a, T0), eth("0.12"), eth("0.08"), 7, &sig7)
        .unwrap();

    // Equal nonce loses.
    let sig7_again = house_signed(&chain, a, eth("0.1"), eth("0.1"), 7).await;
    assert!(matches!(
        chain.contract.counter_challenge(
            Env::call(chain.owner, T0 + 10),
            a,
            eth("0.1"),
            eth("0.1"),
            7,
            &sig7_again,
        ),
        Err(SettlementError::StaleNonce { submitted: 7, current: 7 })
    ));

    // Past the deadline the window is closed even for a higher nonce.
    let sig9 = house_signed(&chain, a, eth("0.08"), eth("0.12"), 9).await;
    assert!(matches!(
        chain.contract.counter_challenge(
            Env::call(chain.owner, T0 + 86_401),
            a,
            eth("0.08"),
            eth("0.12"),
            9,
            &sig9,
        ),
        Err(SettlementError::ChallengeWindowClosed { .. })
    ));
}

#[tokio::test]
async fn p7_close_rejects_foreign_signatures_and_broken_conservation() {
    let mut chain = chain();
    let a = agent(0x33);
    open_and_fund(&mut chain, a, eth("0.1"), eth("0.1"));

    // A signature from some other key over the same struct.
    let impostor = StateSigning::new(
        CHAIN_ID,
        chain.contract.address(),
        Arc::new(LocalStateSigner::random()),
    );
    let forged = impostor
        .sign(&ChannelState {
            agent: a,
            agentBalance: eth("0.2"),
            casinoBalance: U256::ZERO,
            nonce: U256::from(1u64),
        })
        .await
        .unwrap();
    assert!(matches!(
        chain.contract.close_channel(
            Env::call(a, T0),
            eth("0.2"),
            U256::ZERO,
            1,
            &forged,
            &chain.ledger,
        ),
        Err(SettlementError::BadSignature)
    ));

    // A genuine house signature over balances that mint value.
    let inflated = house_signed(&chain, a, eth("0.2"), eth("0.1"), 1).await;
    assert!(matches!(
        chain.contract.close_channel(
            Env::call(a, T0),
            eth("0.2"),
            eth("0.1"),
            1,
            &inflated,
            &chain.ledger,
        ),
        Err(SettlementError::ConservationViolated)
    ));

    // Channel untouched by both rejections.
    assert_eq!(chain.contract.channel_of(a).unwrap().stage, EscrowStage::Open);
}

#[test]
fn open_channel_enforces_deposit_bounds_and_uniqueness() {
    let mut chain = chain();
    let a = agent(0x44);

    assert!(matches!(
        chain.contract.open_channel(Env::payable(a, eth("0.0009"), T0)),
        Err(SettlementError::DepositOutOfRange { .. })
    ));
    assert!(matches!(
        chain.contract.open_channel(Env::payable(a, eth("10.1"), T0)),
        Err(SettlementError::DepositOutOfRange { .. })
    ));

    chain.contract.open_channel(Env::payable(a, eth("1"), T0)).unwrap();
    assert!(matches!(
        chain.contract.open_channel(Env::payable(a, eth("1"), T0)),
        Err(SettlementError::ChannelExists(_))
    ));
}

#[test]
fn fund_casino_side_is_owner_only_and_needs_an_open_channel() {
    let mut chain = chain();
    let a = agent(0x45);
    chain.contract.open_channel(Env::payable(a, eth("1"), T0)).unwrap();

    assert!(matches!(
        chain.contract.fund_casino_side(Env::payable(a, eth("1"), T0), a),
        Err(SettlementError::Unauthorized)
    ));
    assert!(matches!(
        chain.contract.fund_casino_side(Env::payable(chain.owner, eth("1"), T0), agent(0x46)),
        Err(SettlementError::ChannelNotFound(_))
    ));
    assert!(matches!(
        chain.contract.fund_casino_side(Env::call(chain.owner, T0), a),
        Err(SettlementError::ZeroValue)
    ));

    chain.contract.fund_casino_side(Env::payable(chain.owner, eth("2"), T0), a).unwrap();
    let channel = chain.contract.channel_of(a).unwrap();
    assert_eq!(channel.casino_deposit, eth("2"));
    assert_eq!(channel.casino_balance, eth("2"));
}

#[test]
fn p4_bankroll_cap_blocks_over_exposure_on_chain() {
    let contract_addr = Address::repeat_byte(0xCC);
    let signing =
        StateSigning::new(CHAIN_ID, contract_addr, Arc::new(LocalStateSigner::random()));
    let owner = signing.house();
    let mut contract =
        ChannelSettlement::new(contract_addr, owner, CHAIN_ID, ContractParams::default());
    let bankroll = Arc::new(Mutex::new(BankrollManager::new(owner, eth("1"))));
    bankroll.lock().set_channel_manager(Env::call(owner, T0), contract_addr).unwrap();
    contract.set_bankroll_manager(Env::call(owner, T0), bankroll.clone()).unwrap();

    let a = agent(0x47);
    let b = agent(0x48);
    contract.open_channel(Env::payable(a, eth("1"), T0)).unwrap();
    contract.open_channel(Env::payable(b, eth("1"), T0)).unwrap();

    contract.fund_casino_side(Env::payable(owner, eth("0.7"), T0), a).unwrap();
    assert!(matches!(
        contract.fund_casino_side(Env::payable(owner, eth("0.4"), T0), b),
        Err(SettlementError::Bankroll(_))
    ));
    assert_eq!(bankroll.lock().total_locked(), eth("0.7"));
}

#[tokio::test]
async fn emergency_exit_returns_original_deposits_after_min_duration() {
    let mut chain = chain();
    let a = agent(0x55);
    open_and_fund(&mut chain, a, eth("1"), eth("2"));

    assert!(matches!(
        chain.contract.emergency_exit(Env::call(a, T0 + 3_599), &chain.ledger),
        Err(SettlementError::ChannelTooYoung { .. })
    ));

    chain.contract.emergency_exit(Env::call(a, T0 + 3_600), &chain.ledger).unwrap();
    assert_eq!(chain.ledger.balance_of(a), eth("1"));
    assert_eq!(chain.ledger.balance_of(chain.owner), eth("2"));
    assert_eq!(chain.insurance.lock().balance(), U256::ZERO);
    assert!(chain.contract.channel_of(a).is_none());
}

#[tokio::test]
async fn failed_payout_reroutes_to_pull_payment() {
    let mut chain = chain();
    let a = agent(0x66);
    open_and_fund(&mut chain, a, eth("0.05"), eth("0.05"));

    chain.ledger.reject(a);
    let sig = house_signed(&chain, a, eth("0.06"), eth("0.04"), 3).await;
    chain
        .contract
        .close_channel(Env::call(a, T0), eth("0.06"), eth("0.04"), 3, &sig, &chain.ledger)
        .unwrap();

    // The close settled, the agent's share sits in pull payment.
    assert_eq!(chain.ledger.balance_of(a), U256::ZERO);
    assert_eq!(chain.contract.pending_withdrawal_of(a), eth("0.06"));

    // Withdrawal keeps failing while the payee rejects, then drains.
    assert!(matches!(
        chain.contract.withdraw_pending(Env::call(a, T0), &chain.ledger),
        Err(SettlementError::TransferFailed { .. })
    ));
    assert_eq!(chain.contract.pending_withdrawal_of(a), eth("0.06"));

    chain.ledger.allow(a);
    let paid = chain.contract.withdraw_pending(Env::call(a, T0), &chain.ledger).unwrap();
    assert_eq!(paid, eth("0.06"));
    assert_eq!(chain.ledger.balance_of(a), eth("0.06"));
    assert!(matches!(
        chain.contract.withdraw_pending(Env::call(a, T0), &chain.ledger),
        Err(SettlementError::NothingPending(_))
    ));
}

#[tokio::test]
async fn owner_rotation_is_two_step_timelocked_and_blocked_while_locked() {
    let mut chain = chain();
    let a = agent(0x77);
    let successor = agent(0x78);
    open_and_fund(&mut chain, a, eth("0.01"), eth("0.01"));

    // Collateral is locked, rotation refused.
    assert!(matches!(
        chain.contract.transfer_casino(Env::call(chain.owner, T0), successor),
        Err(SettlementError::BankrollStillLocked { .. })
    ));

    // Settle the channel, then rotate.
    let sig = house_signed(&chain, a, eth("0.01"), eth("0.01"), 0).await;
    chain
        .contract
        .close_channel(Env::call(a, T0), eth("0.01"), eth("0.01"), 0, &sig, &chain.ledger)
        .unwrap();

    let eta = chain.contract.transfer_casino(Env::call(chain.owner, T0), successor).unwrap();
    assert_eq!(eta, T0 + 2 * 86_400);

    assert!(matches!(
        chain.contract.accept_casino(Env::call(chain.owner, eta)),
        Err(SettlementError::Unauthorized)
    ));
    assert!(matches!(
        chain.contract.accept_casino(Env::call(successor, eta - 1)),
        Err(SettlementError::TimelockNotElapsed { .. })
    ));

    chain.contract.accept_casino(Env::call(successor, eta)).unwrap();
    assert_eq!(chain.contract.owner(), successor);
}

#[test]
fn owner_rotation_can_be_cancelled() {
    let mut chain = chain();
    let successor = agent(0x79);
    chain.contract.transfer_casino(Env::call(chain.owner, T0), successor).unwrap();
    chain.contract.cancel_transfer_casino(Env::call(chain.owner, T0)).unwrap();
    assert!(matches!(
        chain.contract.accept_casino(Env::call(successor, T0 + 3 * 86_400)),
        Err(SettlementError::NoPendingRequest)
    ));
}

#[test]
fn insurance_withdrawal_is_timelocked_and_bounded() {
    let chain = chain();
    let contract_addr = chain.contract.address();
    let mut fund = chain.insurance.lock();

    fund.deposit(Env::payable(contract_addr, eth("0.5"), T0)).unwrap();
    assert!(matches!(
        fund.request_withdrawal(Env::call(chain.owner, T0), eth("0.6")),
        Err(SettlementError::InsufficientFund { .. })
    ));

    let eta = fund.request_withdrawal(Env::call(chain.owner, T0), eth("0.4")).unwrap();
    assert_eq!(eta, T0 + 3 * 86_400);
    assert!(matches!(
        fund.execute_withdrawal(Env::call(chain.owner, eta - 1), &chain.ledger),
        Err(SettlementError::TimelockNotElapsed { .. })
    ));

    let paid = fund.execute_withdrawal(Env::call(chain.owner, eta), &chain.ledger).unwrap();
    assert_eq!(paid, eth("0.4"));
    assert_eq!(fund.balance(), eth("0.1"));
    assert_eq!(chain.ledger.balance_of(chain.owner), eth("0.4"));
}

#[test]
fn insurance_deposit_is_channel_manager_only() {
    let chain = chain();
    let mut fund = chain.insurance.lock();
    assert!(matches!(
        fund.deposit(Env::payable(agent(0x80), eth("1"), T0)),
        Err(SettlementError::Unauthorized)
    ));
    fund.request_withdrawal(Env::call(chain.owner, T0), eth("1")).unwrap_err();

    fund.deposit(Env::payable(chain.contract.address(), eth("1"), T0)).unwrap();
    fund.request_withdrawal(Env::call(chain.owner, T0), eth("1")).unwrap();
    fund.cancel_withdrawal(Env::call(chain.owner, T0)).unwrap();
    assert!(fund.pending().is_none());
}

#[test]
fn module_wiring_is_owner_only() {
    let mut chain = chain();
    let outsider = agent(0x81);
    let fund = Arc::new(Mutex::new(InsuranceFund::new(outsider, 1)));
    assert!(matches!(
        chain.contract.set_insurance_fund(Env::call(outsider, T0), fund),
        Err(SettlementError::Unauthorized)
    ));
}

#[tokio::test]
async fn settlement_is_all_effects_before_interactions() {
    // Even with every payout failing, the channel is gone and the collateral
    // released; value sits in pull payments rather than limbo.
    let mut chain = chain();
    let a = agent(0x82);
    open_and_fund(&mut chain, a, eth("0.1"), eth("0.1"));
    chain.ledger.reject(a);
    chain.ledger.reject(chain.owner);

    let sig = house_signed(&chain, a, eth("0.05"), eth("0.15"), 4).await;
    chain
        .contract
        .close_channel(Env::call(a, T0), eth("0.05"), eth("0.15"), 4, &sig, &chain.ledger)
        .unwrap();

    assert!(chain.contract.channel_of(a).is_none());
    assert_eq!(chain.bankroll.lock().total_locked(), U256::ZERO);
    assert_eq!(chain.contract.pending_withdrawal_of(a), eth("0.05"));
    // House payout net of the 10% skim on 0.05 profit.
    assert_eq!(chain.contract.pending_withdrawal_of(chain.owner), eth("0.145"));
    assert_eq!(chain.insurance.lock().balance(), eth("0.005"));
}
