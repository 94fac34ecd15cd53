//! Test Utilities Module
//!
//! In-process doubles for the chain and the wallet, so the whole launch flow
//! can run deterministically without a network.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use crate::chain::{ChainClient, RecentBlockhash, SignatureState};
use crate::errors::{LaunchError, LaunchResult};
use crate::metadata::METADATA_PROGRAM_ID;
use crate::wallet::{SignError, WalletSigner};
use async_trait::async_trait;
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    system_instruction::SystemInstruction,
    system_program,
    transaction::Transaction,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Lamports per byte-year times the two-year exemption threshold
const RENT_LAMPORTS_PER_BYTE: u64 = 6_960;
/// Account storage overhead counted by the rent calculation
const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;

/// Base fee charged per required signature of a landed transaction
pub const MOCK_LAMPORTS_PER_SIGNATURE: u64 = 5_000;

/// Blocks a blockhash stays usable for after it is handed out
pub const MOCK_BLOCKHASH_VALIDITY: u64 = 150;

const MOCK_GENESIS_HEIGHT: u64 = 1_000;

#[derive(Default)]
struct ChainState {
    balances: HashMap<Pubkey, u64>,
    debits: HashMap<Pubkey, u64>,
    existing: HashSet<Pubkey>,
    token_balances: HashMap<Pubkey, u64>,
    statuses: HashMap<Signature, SignatureState>,
    sent: Vec<Transaction>,

    fail_rent: bool,
    fail_balance: bool,
    /// 1-based broadcast number that lands as failed, with its reason
    fail_broadcast: Option<(usize, String)>,
    race_next_ata: bool,
    hold_confirmations: bool,
    drop_broadcasts: bool,
    block_height: u64,
}

/// Mock chain that executes the launch instructions it understands
///
/// Every address starts with `initial_balance` lamports. Landed
/// transactions debit the fee payer `MOCK_LAMPORTS_PER_SIGNATURE` per
/// required signature and apply system transfers, account creations,
/// associated-account and metadata rent, and `mint_to` amounts.
pub struct MockChain {
    initial_balance: u64,
    state: Mutex<ChainState>,
}

impl std::fmt::Debug for MockChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChain")
            .field("initial_balance", &self.initial_balance)
            .finish()
    }
}

impl MockChain {
    pub fn new(initial_balance: u64) -> Self {
        Self {
            initial_balance,
            state: Mutex::new(ChainState {
                block_height: MOCK_GENESIS_HEIGHT,
                ..ChainState::default()
            }),
        }
    }

    /// Base fee the mock charges for landing `tx`
    pub fn fee_for(tx: &Transaction) -> u64 {
        u64::from(tx.message.header.num_required_signatures) * MOCK_LAMPORTS_PER_SIGNATURE
    }

    /// Rent-exemption minimum using the mainnet rent parameters
    pub fn rent_for(data_len: usize) -> u64 {
        (data_len as u64 + ACCOUNT_STORAGE_OVERHEAD) * RENT_LAMPORTS_PER_BYTE
    }

    /// Make every rent query fail with a connectivity error
    pub fn fail_rent_queries(&self, fail: bool) {
        self.state.lock().unwrap().fail_rent = fail;
    }

    pub fn fail_balance_queries(&self, fail: bool) {
        self.state.lock().unwrap().fail_balance = fail;
    }

    /// The `n`th broadcast (1-based) lands with an execution error
    pub fn fail_broadcast(&self, n: usize, reason: &str) {
        self.state.lock().unwrap().fail_broadcast = Some((n, reason.to_string()));
    }

    /// The next transaction creating an associated token account loses a
    /// creation race: someone else creates the account first and ours fails.
    pub fn race_next_ata_creation(&self) {
        self.state.lock().unwrap().race_next_ata = true;
    }

    /// Land broadcasts but keep them below the confirmation commitment
    pub fn hold_confirmations(&self, hold: bool) {
        self.state.lock().unwrap().hold_confirmations = hold;
    }

    /// Accept every broadcast but never land it, as if the network dropped it
    pub fn drop_broadcasts(&self, drop: bool) {
        self.state.lock().unwrap().drop_broadcasts = drop;
    }

    /// Produce `blocks` more blocks, expiring older blockhashes
    pub fn advance_block_height(&self, blocks: u64) {
        self.state.lock().unwrap().block_height += blocks;
    }

    pub fn set_balance(&self, address: Pubkey, lamports: u64) {
        self.state.lock().unwrap().balances.insert(address, lamports);
    }

    /// Total lamports debited from `address`
    pub fn debited(&self, address: &Pubkey) -> u64 {
        self.state
            .lock()
            .unwrap()
            .debits
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    pub fn sent_transactions(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn exists(&self, address: &Pubkey) -> bool {
        self.state.lock().unwrap().existing.contains(address)
    }

    pub fn token_balance(&self, address: &Pubkey) -> Option<u64> {
        self.state.lock().unwrap().token_balances.get(address).copied()
    }

    /// Mark a signature confirmed (e.g. a transaction that landed late)
    pub fn confirm(&self, signature: &Signature) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(*signature, SignatureState::Confirmed);
    }
}

impl ChainState {
    fn balance(&self, initial: u64, address: &Pubkey) -> u64 {
        self.balances.get(address).copied().unwrap_or(initial)
    }

    fn debit(&mut self, initial: u64, address: Pubkey, lamports: u64) {
        let balance = self.balance(initial, &address);
        self.balances.insert(address, balance.saturating_sub(lamports));
        *self.debits.entry(address).or_insert(0) += lamports;
    }

    fn credit(&mut self, initial: u64, address: Pubkey, lamports: u64) {
        let balance = self.balance(initial, &address);
        self.balances.insert(address, balance + lamports);
    }

    /// Instruction index and address of the associated token account `tx` creates, if any
    fn created_ata(tx: &Transaction) -> Option<(usize, Pubkey)> {
        let keys = &tx.message.account_keys;
        tx.message
            .instructions
            .iter()
            .enumerate()
            .find(|(_, ix)| keys[ix.program_id_index as usize] == spl_associated_token_account::id())
            .and_then(|(index, ix)| ix.accounts.get(1).map(|i| (index, keys[*i as usize])))
    }

    /// Apply the effects of a landed transaction
    fn execute(&mut self, initial: u64, tx: &Transaction) {
        let keys = tx.message.account_keys.clone();
        let account = |ix_accounts: &[u8], i: usize| keys[ix_accounts[i] as usize];

        for ix in &tx.message.instructions {
            let program = keys[ix.program_id_index as usize];
            if program == system_program::id() {
                match bincode::deserialize::<SystemInstruction>(&ix.data) {
                    Ok(SystemInstruction::Transfer { lamports }) => {
                        self.debit(initial, account(&ix.accounts, 0), lamports);
                        self.credit(initial, account(&ix.accounts, 1), lamports);
                    }
                    Ok(SystemInstruction::CreateAccount { lamports, .. }) => {
                        self.debit(initial, account(&ix.accounts, 0), lamports);
                        self.existing.insert(account(&ix.accounts, 1));
                    }
                    _ => {}
                }
            } else if program == spl_associated_token_account::id() {
                let ata = account(&ix.accounts, 1);
                if self.existing.insert(ata) {
                    self.debit(
                        initial,
                        account(&ix.accounts, 0),
                        MockChain::rent_for(spl_token_account_len()),
                    );
                    self.token_balances.insert(ata, 0);
                }
            } else if program == METADATA_PROGRAM_ID {
                self.existing.insert(account(&ix.accounts, 0));
                self.debit(
                    initial,
                    account(&ix.accounts, 3),
                    MockChain::rent_for(crate::chain::METADATA_ACCOUNT_LEN),
                );
            } else if program == spl_token::id() && ix.data.first() == Some(&7) {
                let mut amount = [0u8; 8];
                amount.copy_from_slice(&ix.data[1..9]);
                *self
                    .token_balances
                    .entry(account(&ix.accounts, 1))
                    .or_insert(0) += u64::from_le_bytes(amount);
            }
        }
    }
}

fn spl_token_account_len() -> usize {
    use spl_token::solana_program::program_pack::Pack;
    spl_token::state::Account::LEN
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_balance(&self, address: &Pubkey) -> LaunchResult<u64> {
        let state = self.state.lock().unwrap();
        if state.fail_balance {
            return Err(LaunchError::Connectivity("mock: balance query refused".into()));
        }
        Ok(state.balance(self.initial_balance, address))
    }

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> LaunchResult<u64> {
        if self.state.lock().unwrap().fail_rent {
            return Err(LaunchError::Connectivity("mock: connection refused".into()));
        }
        Ok(Self::rent_for(data_len))
    }

    async fn get_latest_blockhash(&self) -> LaunchResult<RecentBlockhash> {
        let height = self.state.lock().unwrap().block_height;
        Ok(RecentBlockhash {
            hash: Hash::new_unique(),
            last_valid_block_height: height + MOCK_BLOCKHASH_VALIDITY,
        })
    }

    async fn get_block_height(&self) -> LaunchResult<u64> {
        Ok(self.state.lock().unwrap().block_height)
    }

    async fn send_transaction(&self, tx: &Transaction) -> LaunchResult<Signature> {
        if tx.verify().is_err() {
            return Err(LaunchError::transaction_failed(
                "send_transaction",
                None,
                "signature verification failure",
            ));
        }
        let signature = tx.signatures[0];
        let mut state = self.state.lock().unwrap();
        state.sent.push(tx.clone());
        if state.drop_broadcasts {
            return Ok(signature);
        }
        let count = state.sent.len();
        let payer = tx.message.account_keys[0];
        state.debit(self.initial_balance, payer, Self::fee_for(tx));

        let injected = match &state.fail_broadcast {
            Some((n, reason)) if *n == count => Some(reason.clone()),
            _ => None,
        };
        let status = if let Some(reason) = injected {
            SignatureState::Failed(reason)
        } else if let Some((index, target)) =
            ChainState::created_ata(tx).filter(|_| state.race_next_ata)
        {
            state.race_next_ata = false;
            state.existing.insert(target);
            state.token_balances.insert(target, 0);
            SignatureState::Failed(format!(
                "Error processing Instruction {}: Allocate: account Address {{ address: {}, base: None }} already in use",
                index, target
            ))
        } else {
            state.execute(self.initial_balance, tx);
            SignatureState::Confirmed
        };

        let status = match (state.hold_confirmations, status) {
            (true, SignatureState::Confirmed) => SignatureState::Processed,
            (_, status) => status,
        };
        state.statuses.insert(signature, status);
        Ok(signature)
    }

    async fn get_signature_state(&self, signature: &Signature) -> LaunchResult<SignatureState> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .statuses
            .get(signature)
            .cloned()
            .unwrap_or(SignatureState::Pending))
    }

    async fn account_exists(&self, address: &Pubkey) -> LaunchResult<bool> {
        Ok(self.exists(address))
    }

    async fn get_token_balance(&self, token_account: &Pubkey) -> LaunchResult<Option<u64>> {
        Ok(self.token_balance(token_account))
    }
}

/// Wallet whose user declines every signature request
#[derive(Debug)]
pub struct RejectingWallet {
    pubkey: Pubkey,
}

impl RejectingWallet {
    pub fn new(pubkey: Pubkey) -> Self {
        Self { pubkey }
    }
}

#[async_trait]
impl WalletSigner for RejectingWallet {
    fn pubkey(&self) -> Option<Pubkey> {
        Some(self.pubkey)
    }

    async fn sign_transaction(&self, _tx: Transaction) -> Result<Transaction, SignError> {
        Err(SignError::Rejected("user declined the request".into()))
    }
}

/// No wallet connected
#[derive(Debug, Default)]
pub struct DisconnectedWallet;

#[async_trait]
impl WalletSigner for DisconnectedWallet {
    fn pubkey(&self) -> Option<Pubkey> {
        None
    }

    async fn sign_transaction(&self, _tx: Transaction) -> Result<Transaction, SignError> {
        Err(SignError::Failed("no wallet connected".into()))
    }
}
