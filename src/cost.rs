//! Cost estimation
//!
//! Sums everything a launch will debit from the requester: the service fee,
//! the rent-exemption minimum of every account the remaining steps create,
//! and the network fees of the transactions still to be submitted (base fee
//! per required signature plus the priority fee). Rent minimums are always
//! queried live; there is no cached or hardcoded fallback.

use crate::chain::{AccountClass, ChainClient};
use crate::config::Config;
use crate::errors::{LaunchError, LaunchResult};
use crate::fees::ServiceFee;
use crate::plan::{PlanBatch, PlanStep, TransactionPlan};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Itemized cost of a launch, all amounts in lamports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub service_fee: u64,
    pub mint_rent: u64,
    pub token_account_rent: u64,
    pub metadata_rent: u64,
    pub network_fee: u64,
    /// Number of transactions the network fee was estimated for
    pub transaction_count: u64,
}

impl CostBreakdown {
    /// Labelled components in display order
    pub fn components(&self) -> [(&'static str, u64); 5] {
        [
            ("service fee", self.service_fee),
            ("mint account rent", self.mint_rent),
            ("token account rent", self.token_account_rent),
            ("metadata account rent", self.metadata_rent),
            ("network fees", self.network_fee),
        ]
    }

    pub fn total(&self) -> u64 {
        self.components()
            .iter()
            .fold(0u64, |acc, (_, lamports)| acc.saturating_add(*lamports))
    }
}

/// Live rent-exemption minimums, in lamports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RentTable {
    pub mint: u64,
    pub token_account: u64,
    pub metadata: u64,
}

/// Queries rent minimums and combines them into a [`CostBreakdown`]
pub struct CostEstimator {
    chain: Arc<dyn ChainClient>,
    lamports_per_signature: u64,
    priority_fee_per_tx: u64,
}

impl CostEstimator {
    pub fn new(chain: Arc<dyn ChainClient>, config: &Config) -> Self {
        Self {
            chain,
            lamports_per_signature: config.fees.lamports_per_signature,
            priority_fee_per_tx: config.submission.priority_fee_lamports(),
        }
    }

    /// Query the rent-exemption minimum of every class, concurrently.
    ///
    /// Classes not listed are left at zero.
    pub async fn fetch_rents(&self, classes: &[AccountClass]) -> LaunchResult<RentTable> {
        let rents = try_join_all(classes.iter().map(|class| {
            let chain = Arc::clone(&self.chain);
            let class = *class;
            async move {
                chain
                    .get_minimum_balance_for_rent_exemption(class.data_len())
                    .await
                    .map(|lamports| (class, lamports))
                    .map_err(|e| match e {
                        LaunchError::Connectivity(msg) => LaunchError::Connectivity(format!(
                            "rent query for {} account: {}",
                            class, msg
                        )),
                        other => other,
                    })
            }
        }))
        .await?;

        let mut table = RentTable::default();
        for (class, lamports) in rents {
            match class {
                AccountClass::Mint => table.mint = lamports,
                AccountClass::TokenAccount => table.token_account = lamports,
                AccountClass::Metadata => table.metadata = lamports,
            }
        }
        debug!(
            mint = table.mint,
            token_account = table.token_account,
            metadata = table.metadata,
            "Rent minimums fetched"
        );
        Ok(table)
    }

    /// Network fee of one batch: every required signature pays the base fee
    pub fn network_fee(&self, plan: &TransactionPlan, batch: &PlanBatch) -> u64 {
        batch
            .required_signatures(&plan.budget, &plan.payer)
            .saturating_mul(self.lamports_per_signature)
            .saturating_add(self.priority_fee_per_tx)
    }

    /// Cost of the given (remaining) batches of `plan`.
    ///
    /// Each component is charged only if a remaining batch carries the step
    /// that pays it, so a resumed launch is not charged twice.
    pub fn breakdown(
        &self,
        plan: &TransactionPlan,
        batches: &[&PlanBatch],
        rents: &RentTable,
        service_fee: ServiceFee,
    ) -> CostBreakdown {
        let steps: Vec<PlanStep> = batches.iter().flat_map(|b| b.steps()).collect();
        let charged = |step: PlanStep, lamports: u64| {
            if steps.contains(&step) {
                lamports
            } else {
                0
            }
        };

        let tx_count = batches.len() as u64;
        let breakdown = CostBreakdown {
            service_fee: charged(PlanStep::FeeTransfer, service_fee.lamports),
            mint_rent: charged(PlanStep::CreateMintAccount, rents.mint),
            token_account_rent: charged(PlanStep::CreateAssociatedAccount, rents.token_account),
            metadata_rent: charged(PlanStep::CreateMetadata, rents.metadata),
            network_fee: batches
                .iter()
                .fold(0u64, |acc, b| acc.saturating_add(self.network_fee(plan, b))),
            transaction_count: tx_count,
        };

        debug!(
            service_fee = breakdown.service_fee,
            mint_rent = breakdown.mint_rent,
            token_account_rent = breakdown.token_account_rent,
            metadata_rent = breakdown.metadata_rent,
            network_fee = breakdown.network_fee,
            total = breakdown.total(),
            "Cost estimated"
        );
        breakdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyPreference;
    use crate::plan::{build_plan, LaunchAccounts, PlanOptions};
    use crate::test_utils::{MockChain, MOCK_LAMPORTS_PER_SIGNATURE};
    use crate::types::TokenRequest;
    use solana_sdk::pubkey::Pubkey;

    fn plan(strategy: StrategyPreference, config: &Config) -> TransactionPlan {
        let payer = Pubkey::new_unique();
        let accounts = LaunchAccounts {
            payer,
            mint: Pubkey::new_unique(),
            fee_collector: Pubkey::new_unique(),
        };
        let mut options = PlanOptions::from_config(config);
        options.strategy = strategy;
        build_plan(
            &TokenRequest::new("Test", "TST", "1", 0, payer),
            1,
            &accounts,
            &RentTable::default(),
            ServiceFee { lamports: 1 },
            &options,
            "key",
        )
        .unwrap()
    }

    fn estimator(config: &Config) -> CostEstimator {
        CostEstimator::new(Arc::new(MockChain::new(0)), config)
    }

    #[test]
    fn test_network_fee_is_charged_per_signature() {
        let config = Config::default();
        assert_eq!(config.fees.lamports_per_signature, MOCK_LAMPORTS_PER_SIGNATURE);
        let estimator = estimator(&config);

        let atomic = plan(StrategyPreference::Atomic, &config);
        let all: Vec<&PlanBatch> = atomic.batches.iter().collect();
        // Payer and mint keypair
        assert_eq!(
            estimator.breakdown(&atomic, &all, &RentTable::default(), ServiceFee { lamports: 1 }).network_fee,
            10_000
        );

        let saga = plan(StrategyPreference::Saga, &config);
        let fees: Vec<u64> = saga.batches.iter().map(|b| estimator.network_fee(&saga, b)).collect();
        assert_eq!(fees, vec![5_000, 10_000, 5_000, 5_000, 5_000]);
        let all: Vec<&PlanBatch> = saga.batches.iter().collect();
        let breakdown = estimator.breakdown(&saga, &all, &RentTable::default(), ServiceFee { lamports: 1 });
        assert_eq!(breakdown.network_fee, 30_000);
        assert_eq!(breakdown.transaction_count, 5);
    }

    #[test]
    fn test_priority_fee_is_added_per_transaction() {
        let mut config = Config::default();
        config.submission.compute_unit_limit = 200_000;
        config.submission.priority_fee_micro_lamports = 10_000;
        let estimator = estimator(&config);
        let saga = plan(StrategyPreference::Saga, &config);
        assert_eq!(estimator.network_fee(&saga, &saga.batches[0]), 5_000 + 2_000);
        assert_eq!(estimator.network_fee(&saga, &saga.batches[1]), 10_000 + 2_000);
    }

    #[test]
    fn test_total_sums_every_component() {
        let b = CostBreakdown {
            service_fee: 50_000_000,
            mint_rent: 1_461_600,
            token_account_rent: 2_039_280,
            metadata_rent: 5_616_720,
            network_fee: 10_000,
            transaction_count: 1,
        };
        assert_eq!(b.total(), 50_000_000 + 1_461_600 + 2_039_280 + 5_616_720 + 10_000);
        assert_eq!(b.components().len(), 5);
    }

    #[test]
    fn test_total_saturates() {
        let b = CostBreakdown {
            service_fee: u64::MAX,
            network_fee: 1,
            ..Default::default()
        };
        assert_eq!(b.total(), u64::MAX);
    }
}
