#![allow(unused_imports)]
//! Instruction Ordering Tests
//!
//! Every plan, whatever its options and strategy, must:
//! - Put compute budget instructions first in each transaction
//! - Initialize the mint before minting to it
//! - Create the token account before minting into it
//! - Revoke the mint authority only after supply and metadata exist

#[cfg(test)]
mod instruction_ordering_tests {
    use crate::config::StrategyPreference;
    use crate::cost::RentTable;
    use crate::fees::ServiceFee;
    use crate::plan::{
        build_plan, sanity_check_plan_order, ComputeBudget, LaunchAccounts, PlanOptions, PlanStep,
        PlanStrategy, TransactionPlan,
    };
    use crate::types::{AuthorityRevocations, TokenRequest};
    use solana_sdk::{
        compute_budget::ComputeBudgetInstruction, instruction::Instruction, pubkey::Pubkey,
    };

    fn rents() -> RentTable {
        RentTable {
            mint: 1_461_600,
            token_account: 2_039_280,
            metadata: 5_616_720,
        }
    }

    /// All 8 revocation combinations, with and without creator metadata
    fn requests(payer: Pubkey) -> Vec<TokenRequest> {
        let mut out = Vec::new();
        for bits in 0u8..16 {
            let mut request = TokenRequest::new("Ordering", "ORD", "42", 6, payer);
            request.authorities = AuthorityRevocations {
                freeze: bits & 1 != 0,
                mint: bits & 2 != 0,
                update: bits & 4 != 0,
            };
            if bits & 8 != 0 {
                request.creator_name = Some("Creator".to_string());
            }
            out.push(request);
        }
        out
    }

    fn plan_for(
        request: &TokenRequest,
        strategy: StrategyPreference,
        budget: ComputeBudget,
        include_metadata: bool,
    ) -> TransactionPlan {
        let accounts = LaunchAccounts {
            payer: request.wallet_address,
            mint: Pubkey::new_unique(),
            fee_collector: Pubkey::new_unique(),
        };
        let options = PlanOptions {
            strategy,
            max_instructions_per_tx: 12,
            budget,
            include_metadata,
        };
        build_plan(
            request,
            42_000_000,
            &accounts,
            &rents(),
            ServiceFee { lamports: 50_000_000 },
            &options,
            "ordering",
        )
        .unwrap()
    }

    fn all_plans() -> Vec<TransactionPlan> {
        let budgets = [
            ComputeBudget::default(),
            ComputeBudget {
                unit_limit: 400_000,
                unit_price_micro_lamports: 5_000,
            },
        ];
        let mut plans = Vec::new();
        for request in requests(Pubkey::new_unique()) {
            for strategy in [StrategyPreference::Auto, StrategyPreference::Saga] {
                for budget in budgets {
                    for include_metadata in [true, false] {
                        plans.push(plan_for(&request, strategy, budget, include_metadata));
                    }
                }
            }
        }
        plans
    }

    fn position(order: &[PlanStep], step: PlanStep) -> Option<usize> {
        order.iter().position(|s| *s == step)
    }

    #[test]
    fn test_steps_follow_dependencies_in_every_plan() {
        for plan in all_plans() {
            let order: Vec<PlanStep> = plan.flattened().iter().map(|(s, _)| *s).collect();
            let init = position(&order, PlanStep::InitializeMint).unwrap();
            let create = position(&order, PlanStep::CreateMintAccount).unwrap();
            let ata = position(&order, PlanStep::CreateAssociatedAccount).unwrap();
            let mint_to = position(&order, PlanStep::MintSupply).unwrap();

            assert!(create < init);
            assert!(init < mint_to);
            assert!(ata < mint_to);
            if let Some(metadata) = position(&order, PlanStep::CreateMetadata) {
                assert!(init < metadata);
            }
            if let Some(revoke) = position(&order, PlanStep::RevokeMintAuthority) {
                assert!(mint_to < revoke);
                if let Some(metadata) = position(&order, PlanStep::CreateMetadata) {
                    assert!(metadata < revoke);
                }
            }
            sanity_check_plan_order(&plan).unwrap();
        }
    }

    #[test]
    fn test_compute_budget_leads_every_transaction() {
        let budget = ComputeBudget {
            unit_limit: 300_000,
            unit_price_micro_lamports: 1_000,
        };
        let budget_program = ComputeBudgetInstruction::set_compute_unit_limit(1).program_id;
        let request = TokenRequest::new("Ordering", "ORD", "42", 6, Pubkey::new_unique());
        for strategy in [StrategyPreference::Atomic, StrategyPreference::Saga] {
            let plan = plan_for(&request, strategy, budget, true);
            for batch in &plan.batches {
                let ixs = batch.instructions(&plan.budget);
                assert_eq!(ixs[0].program_id, budget_program);
                assert_eq!(ixs[1].program_id, budget_program);
                assert!(ixs[2..].iter().all(|ix| ix.program_id != budget_program));
            }
        }
    }

    #[test]
    fn test_saga_keeps_mint_creation_and_initialization_together() {
        for request in requests(Pubkey::new_unique()) {
            let plan = plan_for(&request, StrategyPreference::Saga, ComputeBudget::default(), true);
            assert_eq!(plan.strategy, PlanStrategy::Saga);
            let mint_batch = plan
                .batches
                .iter()
                .find(|b| b.contains(PlanStep::CreateMintAccount))
                .unwrap();
            assert!(mint_batch.contains(PlanStep::InitializeMint));
            assert!(mint_batch.needs_mint_signature());
            assert_eq!(plan.batches.iter().filter(|b| b.needs_mint_signature()).count(), 1);
        }
    }

    #[test]
    fn test_idempotency_keys_are_unique_and_stable() {
        let request = TokenRequest::new("Ordering", "ORD", "42", 6, Pubkey::new_unique());
        let a = plan_for(&request, StrategyPreference::Saga, ComputeBudget::default(), true);
        let b = plan_for(&request, StrategyPreference::Saga, ComputeBudget::default(), true);

        let keys: Vec<&str> = a.batches.iter().map(|b| b.idempotency_key.as_str()).collect();
        let mut deduped = keys.clone();
        deduped.dedup();
        assert_eq!(keys, deduped);
        assert!(keys.iter().all(|k| k.starts_with("ordering:")));
        assert_eq!(
            keys,
            b.batches.iter().map(|b| b.idempotency_key.as_str()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_reordered_plan_is_rejected() {
        let request = TokenRequest::new("Ordering", "ORD", "42", 6, Pubkey::new_unique());
        let mut plan = plan_for(&request, StrategyPreference::Saga, ComputeBudget::default(), true);
        let supply = plan
            .batches
            .iter()
            .position(|b| b.contains(PlanStep::MintSupply))
            .unwrap();
        let mint = plan
            .batches
            .iter()
            .position(|b| b.contains(PlanStep::CreateMintAccount))
            .unwrap();
        plan.batches.swap(supply, mint);

        assert!(sanity_check_plan_order(&plan).is_err());
    }

    #[test]
    fn test_mint_to_before_initialization_is_rejected() {
        let request = TokenRequest::new("Ordering", "ORD", "42", 6, Pubkey::new_unique());
        let mut plan = plan_for(&request, StrategyPreference::Atomic, ComputeBudget::default(), true);

        // Steps stay in order; only the instructions underneath are swapped
        let groups = &mut plan.batches[0].groups;
        let init = groups
            .iter()
            .position(|g| g.step == PlanStep::InitializeMint)
            .unwrap();
        let mint_to = groups
            .iter()
            .position(|g| g.step == PlanStep::MintSupply)
            .unwrap();
        let init_ixs: Vec<Instruction> = groups[init].instructions.clone();
        groups[init].instructions = groups[mint_to].instructions.clone();
        groups[mint_to].instructions = init_ixs;

        assert!(sanity_check_plan_order(&plan).is_err());
    }

    #[test]
    fn test_empty_plan_is_rejected() {
        let request = TokenRequest::new("Ordering", "ORD", "42", 6, Pubkey::new_unique());
        let mut plan = plan_for(&request, StrategyPreference::Atomic, ComputeBudget::default(), true);
        plan.batches.clear();
        assert!(sanity_check_plan_order(&plan).is_err());
    }
}
