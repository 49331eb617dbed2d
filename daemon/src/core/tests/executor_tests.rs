use super::MockVm;
use crate::core::{
    evm::{BlockHashResolver, ExecutionResult, NullVm, VirtualMachine},
    executor,
    state::StateManager,
};
use vela_common::{
    account::{AccountType, Balance},
    block::Block,
    config::EMISSION_VALUE,
    crypto::{hash, Address, Hash, Hashable, KeyPair},
    transaction::{
        ActionType, StatusCode, Transaction, TransactionBuilder, TransactionStatus,
    },
};

struct NoChain;

impl BlockHashResolver for NoChain {
    fn resolve_block_hash(&self, _depth: u64) -> Option<Hash> {
        None
    }
}

const MINER: &[u8] = b"miner";

fn miner() -> Address {
    Address::from_data(MINER)
}

fn block_with(txs: Vec<Transaction>) -> Block {
    Block::new(1, hash(b"genesis"), 1_700_000_000, miner(), txs)
}

fn funded_state(keypair: &KeyPair, balance: u64) -> StateManager {
    let mut state = StateManager::new();
    state
        .account_mut(&keypair.address())
        .add_balance(Balance::from(balance))
        .unwrap();
    state
}

fn signed_transfer(keypair: &KeyPair, to: Address, amount: u64, fee: u64) -> Transaction {
    let mut tx = TransactionBuilder::new()
        .from(keypair.address())
        .to(to)
        .amount(Balance::from(amount))
        .fee(fee)
        .timestamp(1_700_000_000)
        .build()
        .unwrap();
    tx.sign(keypair);
    tx
}

fn signed_creation(keypair: &KeyPair, init_code: Vec<u8>, amount: u64, fee: u64) -> Transaction {
    let mut tx = TransactionBuilder::new()
        .from(keypair.address())
        .contract_creation(init_code)
        .amount(Balance::from(amount))
        .fee(fee)
        .timestamp(1_700_000_000)
        .build()
        .unwrap();
    tx.sign(keypair);
    tx
}

fn apply(
    state: &mut StateManager,
    vm: &dyn VirtualMachine,
    block: &Block,
) -> Vec<(Hash, TransactionStatus)> {
    executor::apply_block(state, &NoChain, vm, block).unwrap()
}

#[test]
fn test_transfer_accounting() {
    let alice = KeyPair::generate();
    let bob = Address::from_data(b"bob");
    let mut state = funded_state(&alice, 10_000);

    let tx = signed_transfer(&alice, bob, 1_000, 10);
    let block = block_with(vec![tx.clone()]);
    let statuses = apply(&mut state, &NullVm, &block);

    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].0, tx.hash());
    assert_eq!(statuses[0].1.code, StatusCode::Success);
    assert_eq!(statuses[0].1.action, ActionType::Transfer);

    assert_eq!(state.get_balance(&bob), Balance::from(1_000u64));
    assert_eq!(
        state.get_balance(&alice.address()),
        Balance::from(10_000u64 - 1_010)
    );
    // coinbase earns the emission plus the fee
    assert_eq!(
        state.get_balance(&miner()),
        Balance::from(EMISSION_VALUE + 10)
    );
}

#[test]
fn test_transfer_insufficient_balance() {
    let alice = KeyPair::generate();
    let bob = Address::from_data(b"bob");
    let mut state = funded_state(&alice, 500);

    let tx = signed_transfer(&alice, bob, 1_000, 10);
    let block = block_with(vec![tx]);
    let statuses = apply(&mut state, &NullVm, &block);

    assert_eq!(statuses[0].1.code, StatusCode::NotEnoughBalance);
    assert_eq!(statuses[0].1.action, ActionType::Transfer);
    // nothing but the emission moved
    assert_eq!(state.get_balance(&bob), Balance::zero());
    assert_eq!(state.get_balance(&alice.address()), Balance::from(500u64));
    assert_eq!(state.get_balance(&miner()), Balance::from(EMISSION_VALUE));
}

#[test]
fn test_self_transfer_only_charges_fee() {
    let alice = KeyPair::generate();
    let mut state = funded_state(&alice, 1_000);

    let tx = signed_transfer(&alice, alice.address(), 400, 25);
    let block = block_with(vec![tx]);
    let statuses = apply(&mut state, &NullVm, &block);

    assert_eq!(statuses[0].1.code, StatusCode::Success);
    assert_eq!(
        state.get_balance(&alice.address()),
        Balance::from(1_000u64 - 25)
    );
}

#[test]
fn test_contract_creation_success() {
    let alice = KeyPair::generate();
    let mut state = funded_state(&alice, 2_000_000);
    let runtime = vec![0x60, 0x80, 0x60, 0x40];
    let vm = MockVm::deploying(runtime.clone(), 400_000);

    let tx = signed_creation(&alice, vec![0xFE, 0xED], 50, 1_000_000);
    let block = block_with(vec![tx]);
    let statuses = apply(&mut state, &vm, &block);

    let status = &statuses[0].1;
    assert_eq!(status.code, StatusCode::Success);
    assert_eq!(status.action, ActionType::ContractCreation);
    assert_eq!(status.gas_left, 400_000);

    // the status message is the base58 contract address
    let contract_address: Address = status.message.parse().unwrap();
    let account = state.get_account(&contract_address).unwrap();
    assert_eq!(account.account_type(), AccountType::Contract);
    assert_eq!(account.runtime_code(), &runtime[..]);
    assert_eq!(account.balance(), Balance::from(50u64));

    // gas actually burned goes to the coinbase, the rest returns
    assert_eq!(
        state.get_balance(&miner()),
        Balance::from(EMISSION_VALUE + (1_000_000 - 400_000))
    );
    assert_eq!(
        state.get_balance(&alice.address()),
        Balance::from(2_000_000u64 - 50 - (1_000_000 - 400_000))
    );
}

#[test]
fn test_contract_creation_revert_keeps_state() {
    let alice = KeyPair::generate();
    let mut state = funded_state(&alice, 2_000_000);
    let vm = MockVm::returning(ExecutionResult::revert(300_000));

    let tx = signed_creation(&alice, vec![0xFE], 0, 1_000_000);
    let block = block_with(vec![tx]);
    let statuses = apply(&mut state, &vm, &block);

    let status = &statuses[0].1;
    assert_eq!(status.code, StatusCode::Revert);
    assert_eq!(status.gas_left, 300_000);

    // no contract account survives the revert
    assert_eq!(
        state
            .accounts()
            .filter(|(_, account)| account.account_type() == AccountType::Contract)
            .count(),
        0
    );
    // fee accounting happens on the base state
    assert_eq!(
        state.get_balance(&alice.address()),
        Balance::from(2_000_000u64 - 300_000)
    );
    assert_eq!(
        state.get_balance(&miner()),
        Balance::from(EMISSION_VALUE + (1_000_000 - 300_000))
    );
}

#[test]
fn test_contract_call_success_and_revert() {
    let alice = KeyPair::generate();
    let runtime = vec![0x01, 0x02];

    // deploy first
    let mut state = funded_state(&alice, 3_000_000);
    let deploy_vm = MockVm::deploying(runtime.clone(), 0);
    let deploy = signed_creation(&alice, vec![0xAA], 0, 1_000_000);
    let statuses = apply(&mut state, &deploy_vm, &block_with(vec![deploy]));
    let contract_address: Address = statuses[0].1.message.parse().unwrap();

    // successful call returns base64 output and moves the call value
    let call_vm = MockVm::returning(ExecutionResult::success(100, vec![0xCA, 0xFE]));
    let mut call = TransactionBuilder::new()
        .from(alice.address())
        .call(contract_address, vec![0x11])
        .amount(Balance::from(7u64))
        .fee(500)
        .timestamp(1_700_000_001)
        .build()
        .unwrap();
    call.sign(&alice);
    let before_miner = state.get_balance(&miner());
    let statuses = apply(&mut state, &call_vm, &block_with(vec![call]));

    let status = &statuses[0].1;
    assert_eq!(status.code, StatusCode::Success);
    assert_eq!(status.action, ActionType::ContractCall);
    use base64::Engine as _;
    assert_eq!(
        status.message,
        base64::engine::general_purpose::STANDARD.encode([0xCA, 0xFE])
    );
    assert_eq!(
        state.get_balance(&contract_address),
        Balance::from(7u64)
    );
    assert_eq!(
        state.get_balance(&miner()),
        before_miner + Balance::from(EMISSION_VALUE + (500 - 100))
    );

    // reverting call: only fee accounting, the value stays home
    let revert_vm = MockVm::returning(ExecutionResult::revert(200));
    let mut revert_call = TransactionBuilder::new()
        .from(alice.address())
        .call(contract_address, vec![0x22])
        .amount(Balance::from(50u64))
        .fee(500)
        .timestamp(1_700_000_002)
        .build()
        .unwrap();
    revert_call.sign(&alice);
    let alice_before = state.get_balance(&alice.address());
    let contract_before = state.get_balance(&contract_address);
    let statuses = apply(&mut state, &revert_vm, &block_with(vec![revert_call]));

    assert_eq!(statuses[0].1.code, StatusCode::Revert);
    assert_eq!(state.get_balance(&contract_address), contract_before);
    assert_eq!(
        state.get_balance(&alice.address()),
        alice_before - Balance::from(200u64)
    );
}

#[test]
fn test_contract_call_without_input_is_rejected() {
    let alice = KeyPair::generate();
    let mut state = funded_state(&alice, 3_000_000);
    let deploy_vm = MockVm::deploying(vec![0x01], 0);
    let deploy = signed_creation(&alice, vec![0xAA], 0, 1_000_000);
    let statuses = apply(&mut state, &deploy_vm, &block_with(vec![deploy]));
    let contract_address: Address = statuses[0].1.message.parse().unwrap();

    // a plain transfer towards a contract account carries no input
    let tx = signed_transfer(&alice, contract_address, 10, 100);
    let balance_before = state.get_balance(&alice.address());
    let statuses = apply(&mut state, &NullVm, &block_with(vec![tx]));

    assert_eq!(statuses[0].1.code, StatusCode::BadQueryForm);
    assert_eq!(statuses[0].1.action, ActionType::ContractCall);
    // sandbox discarded: not even the fee moved
    assert_eq!(state.get_balance(&alice.address()), balance_before);
}

#[test]
fn test_interpreter_error_is_failed_without_state_change() {
    let alice = KeyPair::generate();
    let mut state = funded_state(&alice, 2_000_000);

    let tx = signed_creation(&alice, vec![0xAB], 10, 1_000);
    let balance_before = state.get_balance(&alice.address());
    let statuses = apply(&mut state, &NullVm, &block_with(vec![tx]));

    assert_eq!(statuses[0].1.code, StatusCode::Failed);
    assert_eq!(statuses[0].1.gas_left, 1_000);
    assert_eq!(state.get_balance(&alice.address()), balance_before);
}

#[test]
fn test_replay_is_deterministic() {
    let alice = KeyPair::generate();
    let bob = Address::from_data(b"bob");
    let tx = signed_transfer(&alice, bob, 123, 4);
    let block = block_with(vec![tx]);

    let run = || {
        let mut state = funded_state(&alice, 10_000);
        apply(&mut state, &NullVm, &block);
        (
            state.get_balance(&alice.address()),
            state.get_balance(&bob),
            state.get_balance(&miner()),
        )
    };
    assert_eq!(run(), run());
}

#[test]
fn test_sender_history_grows_even_on_failure() {
    let alice = KeyPair::generate();
    let bob = Address::from_data(b"bob");
    let mut state = funded_state(&alice, 1);

    let tx = signed_transfer(&alice, bob, 1_000, 0);
    apply(&mut state, &NullVm, &block_with(vec![tx.clone()]));

    let account = state.get_account(&alice.address()).unwrap();
    assert_eq!(account.transactions(), &[tx.hash()]);
}
