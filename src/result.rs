//! Result aggregation
//!
//! Collects the addresses a plan produced, the confirmed signatures and the
//! service fee into the final [`TokenResult`]. There is no partial result:
//! either every batch is accounted for or the launch failed upstream.

use crate::errors::{LaunchError, LaunchResult};
use crate::fees::ServiceFee;
use crate::plan::TransactionPlan;
use crate::types::TokenResult;

#[derive(Debug)]
pub struct ResultAggregator {
    result: TokenResult,
}

impl ResultAggregator {
    pub fn new(plan: &TransactionPlan, fee: ServiceFee, request_key: &str) -> Self {
        Self {
            result: TokenResult {
                token_address: plan.mint,
                metadata_address: plan.metadata,
                token_account: plan.token_account,
                fee_lamports: fee.lamports,
                fee_amount: fee.as_sol(),
                signatures: Vec::with_capacity(plan.transaction_count()),
                strategy: plan.strategy,
                request_key: request_key.to_string(),
            },
        }
    }

    /// Add a confirmed signature; duplicates are ignored
    pub fn record_signature(&mut self, signature: impl Into<String>) {
        let signature = signature.into();
        if !self.result.signatures.contains(&signature) {
            self.result.signatures.push(signature);
        }
    }

    pub fn extend_signatures<I, S>(&mut self, signatures: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for signature in signatures {
            self.record_signature(signature);
        }
    }

    /// Final result; a launch without a single confirmed signature is an error
    pub fn finish(self) -> LaunchResult<TokenResult> {
        if self.result.signatures.is_empty() {
            return Err(LaunchError::internal("launch finished without a confirmed signature"));
        }
        Ok(self.result)
    }
}
