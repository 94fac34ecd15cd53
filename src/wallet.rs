//! Wallet signing
//!
//! The launcher holds a [`WalletSigner`], never a raw key. A browser or
//! hardware wallet implements the trait by forwarding the transaction for
//! approval; [`KeypairWallet`] signs locally from a keypair file and is what
//! the CLI uses.

use crate::errors::LaunchError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::Transaction,
};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroize;

/// Why a wallet did not produce a signature
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    /// The user declined
    #[error("signing rejected: {0}")]
    Rejected(String),

    #[error("signing failed: {0}")]
    Failed(String),
}

impl From<SignError> for LaunchError {
    fn from(err: SignError) -> Self {
        match err {
            SignError::Rejected(reason) => LaunchError::SigningRejected(reason),
            SignError::Failed(reason) => {
                LaunchError::internal(format!("wallet signing failed: {}", reason))
            }
        }
    }
}

/// Signing capability of the connected wallet
#[async_trait]
pub trait WalletSigner: Send + Sync + fmt::Debug {
    /// Connected account, `None` when no wallet is connected
    fn pubkey(&self) -> Option<Pubkey>;

    /// Add the wallet's signature to a transaction whose blockhash is set.
    ///
    /// Other required signatures (the mint keypair) may already be present
    /// and must be preserved. There is no timeout; a human may be approving.
    async fn sign_transaction(&self, tx: Transaction) -> Result<Transaction, SignError>;
}

/// Local keypair signer
#[derive(Clone)]
pub struct KeypairWallet {
    keypair: Arc<Keypair>,
}

impl fmt::Debug for KeypairWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairWallet")
            .field("pubkey", &self.keypair.pubkey())
            .finish()
    }
}

impl KeypairWallet {
    /// Load from a keypair file: either the JSON array written by
    /// `solana-keygen`, or 64 raw bytes.
    pub fn from_file(path: &str) -> Result<Self> {
        let mut raw = std::fs::read(path)
            .with_context(|| format!("Failed to read keypair file: {}", path))?;

        let parsed = if raw.len() == 64 {
            Self::from_secret_bytes(&raw)
        } else {
            serde_json::from_slice::<Vec<u8>>(&raw)
                .context("Failed to parse keypair JSON")
                .and_then(|mut bytes| {
                    let wallet = Self::from_secret_bytes(&bytes);
                    bytes.zeroize();
                    wallet
                })
        };
        raw.zeroize();
        parsed
    }

    fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 64 {
            anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", bytes.len());
        }
        if bytes.iter().all(|&b| b == 0) {
            anyhow::bail!("Invalid keypair: all-zero key rejected");
        }
        let keypair = Keypair::try_from(bytes).context("Invalid keypair bytes")?;
        Ok(Self::from_keypair(keypair))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn address(&self) -> Pubkey {
        self.keypair.pubkey()
    }
}

#[async_trait]
impl WalletSigner for KeypairWallet {
    fn pubkey(&self) -> Option<Pubkey> {
        Some(self.keypair.pubkey())
    }

    async fn sign_transaction(&self, mut tx: Transaction) -> Result<Transaction, SignError> {
        let blockhash = tx.message.recent_blockhash;
        tx.try_partial_sign(&[self.keypair.as_ref()], blockhash)
            .map_err(|e| SignError::Failed(format!("local signer: {}", e)))?;
        Ok(tx)
    }
}
