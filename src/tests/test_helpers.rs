#![allow(unused_imports)]
//! Test Helper Utilities
//!
//! Shared fixtures for the launch scenario tests:
//! - A launcher wired to [`MockChain`] and an in-memory checkpoint store
//! - Fast submission settings so retries and confirmation polling stay quick
//! - Request builders for the common option combinations

#[cfg(test)]
pub mod test_helpers {
    use crate::chain::ChainClient;
    use crate::checkpoint::{request_key, CheckpointStore, LaunchCheckpoint, MemoryCheckpointStore};
    use crate::config::{Config, StrategyPreference};
    use crate::launcher::TokenLauncher;
    use crate::test_utils::MockChain;
    use crate::types::{AuthorityRevocations, SocialLinks, TokenRequest};
    use crate::wallet::{KeypairWallet, WalletSigner};
    use solana_sdk::{
        pubkey::Pubkey,
        signature::{Keypair, Signer},
        system_instruction::SystemInstruction,
        system_program,
        transaction::Transaction,
    };
    use std::sync::Arc;

    /// 10 SOL, comfortably above any launch cost
    pub const RICH: u64 = 10_000_000_000;

    pub struct Harness {
        pub chain: Arc<MockChain>,
        pub wallet: Arc<KeypairWallet>,
        pub store: Arc<MemoryCheckpointStore>,
        pub collector: Pubkey,
        pub launcher: TokenLauncher,
    }

    impl Harness {
        pub fn payer(&self) -> Pubkey {
            self.wallet.address()
        }

        pub fn checkpoint_for(&self, request: &TokenRequest) -> Option<LaunchCheckpoint> {
            self.store.load(&request_key(request)).unwrap()
        }

        /// Lamports the fee collector received
        pub fn collected(&self) -> u64 {
            fee_transfers(&self.chain.sent_transactions(), &self.collector)
                .into_iter()
                .sum()
        }
    }

    /// Config with a collector set and sub-second retry/poll settings
    pub fn test_config(collector: &Pubkey) -> Config {
        let mut config = Config::default();
        config.fees.collector = Some(collector.to_string());
        config.submission.confirm_timeout_secs = 5;
        config.submission.poll_interval_ms = 10;
        config.submission.retry.base_backoff_ms = 1;
        config.submission.retry.max_backoff_ms = 2;
        config.submission.retry.jitter_factor = 0.0;
        config
    }

    pub fn harness(balance: u64) -> Harness {
        harness_with(balance, |_| {})
    }

    pub fn saga_harness(balance: u64) -> Harness {
        harness_with(balance, |c| c.submission.strategy = StrategyPreference::Saga)
    }

    pub fn harness_with(balance: u64, customize: impl FnOnce(&mut Config)) -> Harness {
        let wallet = Arc::new(KeypairWallet::from_keypair(Keypair::new()));
        harness_with_wallet(balance, wallet.clone(), wallet, customize)
    }

    /// Harness whose launcher signs with `signer` instead of the harness wallet
    pub fn harness_with_wallet(
        balance: u64,
        wallet: Arc<KeypairWallet>,
        signer: Arc<dyn WalletSigner>,
        customize: impl FnOnce(&mut Config),
    ) -> Harness {
        let chain = Arc::new(MockChain::new(balance));
        let store = Arc::new(MemoryCheckpointStore::new());
        let collector = Pubkey::new_unique();
        let mut config = test_config(&collector);
        customize(&mut config);

        let launcher = TokenLauncher::new(
            config,
            chain.clone() as Arc<dyn ChainClient>,
            signer,
            store.clone() as Arc<dyn CheckpointStore>,
        )
        .unwrap();

        Harness {
            chain,
            wallet,
            store,
            collector,
            launcher,
        }
    }

    /// 1000 tokens, 9 decimals, no options
    pub fn basic_request(wallet: &Pubkey) -> TokenRequest {
        TokenRequest::new("Test Token", "TEST", "1000", 9, *wallet)
    }

    /// Every fee option selected
    pub fn full_request(wallet: &Pubkey) -> TokenRequest {
        let mut request = basic_request(wallet);
        request.authorities = AuthorityRevocations {
            freeze: true,
            mint: true,
            update: true,
        };
        request.creator_name = Some("Test Labs".to_string());
        request.creator_website = Some("https://example.com".to_string());
        request.social_links = SocialLinks {
            website: Some("https://example.com".to_string()),
            twitter: Some("https://twitter.com/test".to_string()),
            telegram: None,
            discord: None,
        };
        request.description = Some("A token used in tests".to_string());
        request
    }

    /// Amounts of every system transfer to `collector` in `txs`
    pub fn fee_transfers(txs: &[Transaction], collector: &Pubkey) -> Vec<u64> {
        let mut amounts = Vec::new();
        for tx in txs {
            let keys = &tx.message.account_keys;
            for ix in &tx.message.instructions {
                if keys[ix.program_id_index as usize] != system_program::id() {
                    continue;
                }
                if let Ok(SystemInstruction::Transfer { lamports }) = bincode::deserialize(&ix.data) {
                    if keys[ix.accounts[1] as usize] == *collector {
                        amounts.push(lamports);
                    }
                }
            }
        }
        amounts
    }
}
