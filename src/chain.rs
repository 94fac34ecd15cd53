//! Chain RPC access
//!
//! The launcher never talks to `RpcClient` directly; it goes through the
//! [`ChainClient`] trait so the whole orchestration can run against an
//! in-process mock in tests. [`RpcChainClient`] is the production
//! implementation over the nonblocking Solana RPC client.

use crate::config::RpcConfig;
use crate::errors::{LaunchError, LaunchResult};
use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::{RpcError, RpcResponseErrorData};
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::Transaction,
};
use spl_token::solana_program::program_pack::Pack;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Account size classes whose rent-exemption minimum the launcher pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountClass {
    /// SPL mint account
    Mint,
    /// SPL token account (the associated token account)
    TokenAccount,
    /// Metadata program account
    Metadata,
}

/// Maximum serialized size of a metadata account
pub const METADATA_ACCOUNT_LEN: usize = 679;

impl AccountClass {
    pub fn data_len(&self) -> usize {
        match self {
            AccountClass::Mint => spl_token::state::Mint::LEN,
            AccountClass::TokenAccount => spl_token::state::Account::LEN,
            AccountClass::Metadata => METADATA_ACCOUNT_LEN,
        }
    }
}

impl fmt::Display for AccountClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountClass::Mint => write!(f, "mint"),
            AccountClass::TokenAccount => write!(f, "token account"),
            AccountClass::Metadata => write!(f, "metadata"),
        }
    }
}

/// Observed state of a broadcast signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureState {
    /// Not seen by the cluster yet
    Pending,
    /// Landed without error, below the requested commitment
    Processed,
    /// Landed and reached the requested commitment
    Confirmed,
    /// Landed with an execution error
    Failed(String),
}

/// A recent blockhash and the last block height at which a transaction
/// referencing it can still land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentBlockhash {
    pub hash: Hash,
    pub last_valid_block_height: u64,
}

/// RPC capabilities the launcher depends on
#[async_trait]
pub trait ChainClient: Send + Sync + fmt::Debug {
    async fn get_balance(&self, address: &Pubkey) -> LaunchResult<u64>;

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> LaunchResult<u64>;

    async fn get_latest_blockhash(&self) -> LaunchResult<RecentBlockhash>;

    async fn get_block_height(&self) -> LaunchResult<u64>;

    /// Broadcast a fully signed transaction
    async fn send_transaction(&self, tx: &Transaction) -> LaunchResult<Signature>;

    async fn get_signature_state(&self, signature: &Signature) -> LaunchResult<SignatureState>;

    async fn account_exists(&self, address: &Pubkey) -> LaunchResult<bool>;

    /// Raw token amount held by a token account, `None` if the account does not exist
    async fn get_token_balance(&self, token_account: &Pubkey) -> LaunchResult<Option<u64>>;
}

/// Production [`ChainClient`] over `solana_client`'s nonblocking `RpcClient`
pub struct RpcChainClient {
    rpc: Arc<RpcClient>,
    endpoint: String,
    commitment: CommitmentConfig,
}

impl fmt::Debug for RpcChainClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChainClient")
            .field("endpoint", &self.endpoint)
            .field("commitment", &self.commitment.commitment)
            .finish()
    }
}

impl RpcChainClient {
    pub fn new(config: &RpcConfig) -> Self {
        let endpoint = config.effective_endpoint().to_string();
        let commitment = config.commitment_config();
        let rpc = RpcClient::new_with_timeout_and_commitment(
            endpoint.clone(),
            Duration::from_secs(config.timeout_secs),
            commitment,
        );
        Self {
            rpc: Arc::new(rpc),
            endpoint,
            commitment,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_err(&self, operation: &str, err: ClientError) -> LaunchError {
        classify_client_error(operation, &self.endpoint, err)
    }
}

/// Split RPC failures into transport problems and chain-side rejections.
///
/// Preflight simulation failures come back as RPC response errors that carry
/// the program error; those are rejections, not connectivity problems.
pub fn classify_client_error(operation: &str, endpoint: &str, err: ClientError) -> LaunchError {
    match err.kind() {
        ClientErrorKind::TransactionError(tx_err) => {
            LaunchError::transaction_failed(operation, None, tx_err.to_string())
        }
        ClientErrorKind::RpcError(RpcError::RpcResponseError { message, data, .. }) => {
            match data {
                RpcResponseErrorData::SendTransactionPreflightFailure(_) => {
                    LaunchError::transaction_failed(operation, None, message.clone())
                }
                _ => LaunchError::Connectivity(format!(
                    "{} failed at {}: {}",
                    operation, endpoint, message
                )),
            }
        }
        _ => LaunchError::Connectivity(format!("{} failed at {}: {}", operation, endpoint, err)),
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_balance(&self, address: &Pubkey) -> LaunchResult<u64> {
        self.rpc
            .get_balance(address)
            .await
            .map_err(|e| self.map_err("get_balance", e))
    }

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> LaunchResult<u64> {
        self.rpc
            .get_minimum_balance_for_rent_exemption(data_len)
            .await
            .map_err(|e| self.map_err("get_minimum_balance_for_rent_exemption", e))
    }

    async fn get_latest_blockhash(&self) -> LaunchResult<RecentBlockhash> {
        let (hash, last_valid_block_height) = self
            .rpc
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| self.map_err("get_latest_blockhash", e))?;
        Ok(RecentBlockhash {
            hash,
            last_valid_block_height,
        })
    }

    async fn get_block_height(&self) -> LaunchResult<u64> {
        self.rpc
            .get_block_height_with_commitment(self.commitment)
            .await
            .map_err(|e| self.map_err("get_block_height", e))
    }

    async fn send_transaction(&self, tx: &Transaction) -> LaunchResult<Signature> {
        let signature = self
            .rpc
            .send_transaction(tx)
            .await
            .map_err(|e| self.map_err("send_transaction", e))?;
        debug!(endpoint = %self.endpoint, signature = %signature, "Transaction broadcast");
        Ok(signature)
    }

    async fn get_signature_state(&self, signature: &Signature) -> LaunchResult<SignatureState> {
        let response = self
            .rpc
            .get_signature_statuses(&[*signature])
            .await
            .map_err(|e| self.map_err("get_signature_statuses", e))?;

        let state = match response.value.into_iter().next().flatten() {
            None => SignatureState::Pending,
            Some(status) => match status.err {
                Some(err) => SignatureState::Failed(err.to_string()),
                None if status.satisfies_commitment(self.commitment) => SignatureState::Confirmed,
                None => SignatureState::Processed,
            },
        };
        Ok(state)
    }

    async fn account_exists(&self, address: &Pubkey) -> LaunchResult<bool> {
        let response = self
            .rpc
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(|e| self.map_err("get_account", e))?;
        Ok(response.value.is_some())
    }

    async fn get_token_balance(&self, token_account: &Pubkey) -> LaunchResult<Option<u64>> {
        if !self.account_exists(token_account).await? {
            return Ok(None);
        }
        let amount = self
            .rpc
            .get_token_account_balance(token_account)
            .await
            .map_err(|e| self.map_err("get_token_account_balance", e))?;
        amount
            .amount
            .parse::<u64>()
            .map(Some)
            .map_err(|e| LaunchError::internal(format!("unparseable token amount: {}", e)))
    }
}
