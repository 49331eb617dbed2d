use crate::core::{
    error::BlockchainError,
    evm::{
        BlockHashResolver, CallKind, EvmHost, ExecStatus, ExecutionMessage, VirtualMachine,
    },
    state::{StateChanges, StateManager, StateSnapshot},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, warn};
use vela_common::{
    account::{AccountType, Balance},
    block::Block,
    config::EMISSION_VALUE,
    crypto::{hash, Address, Hash, Hashable},
    transaction::{ActionType, StatusCode, Transaction, TransactionStatus},
};

// How one transaction resolves against the state
enum Outcome {
    // merge the sandbox into the base state
    Commit(StateChanges, TransactionStatus),
    // drop the sandbox, only the status is recorded
    Discard(TransactionStatus),
    // drop the sandbox but charge gas on the base state (revert paths)
    FeeOnly {
        status: TransactionStatus,
        from_debit: u64,
        coinbase_credit: u64,
    },
}

fn status(code: StatusCode, action: ActionType, gas_left: u64) -> TransactionStatus {
    TransactionStatus::new(code, action, gas_left, String::new())
}

/// Replays a whole block against the state: the coinbase receives the
/// emission once up front, then every transaction executes in block order.
/// Returns the recorded status of each transaction.
pub fn apply_block(
    state: &mut StateManager,
    chain: &dyn BlockHashResolver,
    vm: &dyn VirtualMachine,
    block: &Block,
) -> Result<Vec<(Hash, TransactionStatus)>, BlockchainError> {
    state
        .account_mut(block.get_coinbase())
        .add_balance(Balance::from(EMISSION_VALUE))?;

    let mut statuses = Vec::with_capacity(block.get_txs_count());
    for tx in block.get_transactions() {
        let status = execute_transaction(state, chain, vm, block, tx);
        statuses.push((tx.hash(), status));
    }
    Ok(statuses)
}

/// The state transition function for a single transaction. Never fails:
/// any unexpected condition degrades to a `Failed` status and the sandbox
/// is thrown away.
pub fn execute_transaction(
    state: &mut StateManager,
    chain: &dyn BlockHashResolver,
    vm: &dyn VirtualMachine,
    block: &Block,
    tx: &Transaction,
) -> TransactionStatus {
    let tx_hash = tx.hash();
    debug!("Performing transaction {}", tx_hash);

    // pre-charge bookkeeping: the attempt itself is part of the sender's
    // history and bumps its nonce
    state.account_mut(tx.get_from()).add_transaction(tx_hash);

    let outcome = if tx.get_to().is_null() {
        perform_contract_creation(state, chain, vm, block, tx)
    } else if state.get_account(tx.get_to()).map(|account| account.account_type())
        == Some(AccountType::Contract)
    {
        perform_contract_call(state, chain, vm, block, tx)
    } else {
        perform_transfer(state, block, tx)
    };

    match outcome {
        Outcome::Commit(changes, status) => {
            state.apply(changes);
            status
        }
        Outcome::Discard(status) => status,
        Outcome::FeeOnly {
            status: fee_status,
            from_debit,
            coinbase_credit,
        } => {
            let accounted = charge_on_base(state, tx.get_from(), block.get_coinbase(), from_debit, coinbase_credit);
            if accounted {
                fee_status
            } else {
                status(StatusCode::Failed, fee_status.action, tx.get_fee())
            }
        }
    }
}

// Gas accounting applied directly to the base state when the sandbox is
// discarded on REVERT or interpreter failure
fn charge_on_base(
    state: &mut StateManager,
    from: &Address,
    coinbase: &Address,
    from_debit: u64,
    coinbase_credit: u64,
) -> bool {
    if let Err(e) = state
        .account_mut(from)
        .sub_balance(Balance::from(from_debit))
    {
        warn!("revert accounting failed on sender: {}", e);
        return false;
    }
    if let Err(e) = state
        .account_mut(coinbase)
        .add_balance(Balance::from(coinbase_credit))
    {
        warn!("revert accounting failed on coinbase: {}", e);
        return false;
    }
    true
}

fn perform_contract_creation(
    state: &StateManager,
    chain: &dyn BlockHashResolver,
    vm: &dyn VirtualMachine,
    block: &Block,
    tx: &Transaction,
) -> Outcome {
    let action = ActionType::ContractCreation;
    let fee = tx.get_fee();
    let mut sandbox = state.snapshot();

    if sandbox
        .sub_balance(tx.get_from(), Balance::from(fee))
        .is_err()
    {
        return Outcome::Discard(status(StatusCode::NotEnoughBalance, action, 0));
    }

    let data_hash = hash(tx.get_data());
    let contract_address = sandbox.create_contract_account(tx.get_from(), &data_hash);

    match sandbox.try_transfer_money(tx.get_from(), &contract_address, tx.get_amount()) {
        Ok(true) => {}
        Ok(false) => return Outcome::Discard(status(StatusCode::NotEnoughBalance, action, fee)),
        Err(e) => {
            warn!("contract endowment failed: {}", e);
            return Outcome::Discard(status(StatusCode::Failed, action, fee));
        }
    }

    let msg = ExecutionMessage {
        kind: CallKind::Call,
        depth: 0,
        gas: fee,
        sender: *tx.get_from(),
        recipient: contract_address,
        value: tx.get_amount(),
        input: Vec::new(),
    };

    let result = {
        let mut host = EvmHost::new(&mut sandbox, chain, vm, block, tx);
        vm.execute(&mut host, &msg, tx.get_data())
    };

    match result {
        Ok(result) => {
            let gas_left = result.gas_left.min(fee);
            match result.status {
                ExecStatus::Success => {
                    sandbox
                        .account_mut(&contract_address)
                        .set_runtime_code(result.output);
                    if settle_gas(&mut sandbox, tx.get_from(), block.get_coinbase(), fee, gas_left)
                        .is_err()
                    {
                        return Outcome::Discard(status(StatusCode::Failed, action, fee));
                    }
                    debug!("Deployed contract to address {}", contract_address);
                    Outcome::Commit(
                        sandbox.into_changes(),
                        TransactionStatus::new(
                            StatusCode::Success,
                            action,
                            gas_left,
                            contract_address.to_base58(),
                        ),
                    )
                }
                ExecStatus::Revert => Outcome::FeeOnly {
                    status: status(StatusCode::Revert, action, gas_left),
                    from_debit: gas_left,
                    coinbase_credit: fee - gas_left,
                },
                ExecStatus::Failure => Outcome::FeeOnly {
                    status: status(StatusCode::BadQueryForm, action, gas_left),
                    from_debit: gas_left,
                    coinbase_credit: fee - gas_left,
                },
            }
        }
        Err(e) => {
            debug!("interpreter error on creation: {}", e);
            Outcome::Discard(status(StatusCode::Failed, action, fee))
        }
    }
}

fn perform_contract_call(
    state: &StateManager,
    chain: &dyn BlockHashResolver,
    vm: &dyn VirtualMachine,
    block: &Block,
    tx: &Transaction,
) -> Outcome {
    let action = ActionType::ContractCall;
    let fee = tx.get_fee();
    let mut sandbox = state.snapshot();

    if sandbox
        .sub_balance(tx.get_from(), Balance::from(fee))
        .is_err()
    {
        return Outcome::Discard(status(StatusCode::NotEnoughBalance, action, 0));
    }

    if tx.get_data().is_empty() {
        return Outcome::Discard(status(StatusCode::BadQueryForm, action, fee));
    }

    if tx.get_amount() > Balance::zero() {
        match sandbox.try_transfer_money(tx.get_from(), tx.get_to(), tx.get_amount()) {
            Ok(true) => {}
            Ok(false) => {
                return Outcome::Discard(status(StatusCode::NotEnoughBalance, action, fee))
            }
            Err(e) => {
                warn!("call value transfer failed: {}", e);
                return Outcome::Discard(status(StatusCode::Failed, action, fee));
            }
        }
    }

    let code = sandbox
        .get_account(tx.get_to())
        .map(|account| account.runtime_code().to_vec())
        .unwrap_or_default();

    let msg = ExecutionMessage {
        kind: CallKind::Call,
        depth: 0,
        gas: fee,
        sender: *tx.get_from(),
        recipient: *tx.get_to(),
        value: tx.get_amount(),
        input: tx.get_data().to_vec(),
    };

    let result = {
        let mut host = EvmHost::new(&mut sandbox, chain, vm, block, tx);
        vm.execute(&mut host, &msg, &code)
    };

    match result {
        Ok(result) => {
            let gas_left = result.gas_left.min(fee);
            match result.status {
                ExecStatus::Success => {
                    if settle_gas(&mut sandbox, tx.get_from(), block.get_coinbase(), fee, gas_left)
                        .is_err()
                    {
                        return Outcome::Discard(status(StatusCode::Failed, action, fee));
                    }
                    Outcome::Commit(
                        sandbox.into_changes(),
                        TransactionStatus::new(
                            StatusCode::Success,
                            action,
                            gas_left,
                            BASE64.encode(&result.output),
                        ),
                    )
                }
                ExecStatus::Revert => Outcome::FeeOnly {
                    status: status(StatusCode::Revert, action, gas_left),
                    from_debit: gas_left,
                    coinbase_credit: fee - gas_left,
                },
                ExecStatus::Failure => Outcome::FeeOnly {
                    status: status(StatusCode::BadQueryForm, action, gas_left),
                    from_debit: gas_left,
                    coinbase_credit: fee - gas_left,
                },
            }
        }
        Err(e) => {
            debug!("interpreter error on call: {}", e);
            Outcome::Discard(status(StatusCode::Failed, action, fee))
        }
    }
}

fn perform_transfer(state: &StateManager, block: &Block, tx: &Transaction) -> Outcome {
    let action = ActionType::Transfer;
    let fee = tx.get_fee();
    let mut sandbox = state.snapshot();

    if sandbox
        .sub_balance(tx.get_from(), Balance::from(fee))
        .is_err()
    {
        return Outcome::Discard(status(StatusCode::NotEnoughBalance, action, 0));
    }

    match sandbox.try_transfer_money(tx.get_from(), tx.get_to(), tx.get_amount()) {
        Ok(true) => {}
        Ok(false) => return Outcome::Discard(status(StatusCode::NotEnoughBalance, action, fee)),
        Err(e) => {
            warn!("transfer failed: {}", e);
            return Outcome::Discard(status(StatusCode::Failed, action, fee));
        }
    }

    if sandbox
        .add_balance(block.get_coinbase(), Balance::from(fee))
        .is_err()
    {
        return Outcome::Discard(status(StatusCode::Failed, action, fee));
    }

    Outcome::Commit(sandbox.into_changes(), status(StatusCode::Success, action, 0))
}

// On success the coinbase earns the consumed gas and the sender gets the
// remainder back
fn settle_gas(
    sandbox: &mut StateSnapshot<'_>,
    from: &Address,
    coinbase: &Address,
    fee: u64,
    gas_left: u64,
) -> Result<(), BlockchainError> {
    sandbox.add_balance(coinbase, Balance::from(fee - gas_left))?;
    sandbox.add_balance(from, Balance::from(gas_left))?;
    Ok(())
}
