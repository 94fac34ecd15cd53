//! Transaction planning and ordering validation
//!
//! A launch is a fixed sequence of instruction groups:
//! 1. Service fee transfer to the collector
//! 2. Create + fund the mint account
//! 3. Initialize the mint
//! 4. Create the metadata account (optional)
//! 5. Create the requester's associated token account (idempotent)
//! 6. Mint the initial supply
//! 7. Revoke the mint authority (optional)
//!
//! The groups are packed into batches, one batch per transaction. When the
//! whole launch fits a single transaction the plan is `Atomic`; otherwise it
//! becomes a `Saga` of sequential batches that are confirmed one after the
//! other. Compute budget instructions, when configured, lead every batch.

use crate::config::{Config, StrategyPreference};
use crate::cost::RentTable;
use crate::errors::{LaunchError, LaunchResult};
use crate::fees::ServiceFee;
use crate::metadata;
use crate::types::TokenRequest;
use serde::{Deserialize, Serialize};
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    instruction::Instruction,
    message::Message,
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    system_instruction,
    transaction::Transaction,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use spl_token::instruction::AuthorityType;
use spl_token::solana_program::program_pack::Pack;
use std::fmt;

/// One logical step of a launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStep {
    FeeTransfer,
    CreateMintAccount,
    InitializeMint,
    CreateMetadata,
    CreateAssociatedAccount,
    MintSupply,
    RevokeMintAuthority,
}

impl PlanStep {
    /// Steps that must be on-chain before this one can execute
    pub fn predecessors(&self) -> &'static [PlanStep] {
        match self {
            PlanStep::FeeTransfer => &[],
            PlanStep::CreateMintAccount => &[PlanStep::FeeTransfer],
            PlanStep::InitializeMint => &[PlanStep::CreateMintAccount],
            PlanStep::CreateMetadata => &[PlanStep::InitializeMint],
            PlanStep::CreateAssociatedAccount => &[PlanStep::InitializeMint],
            PlanStep::MintSupply => &[PlanStep::InitializeMint, PlanStep::CreateAssociatedAccount],
            // Metadata creation needs the mint authority as a signer
            PlanStep::RevokeMintAuthority => &[PlanStep::MintSupply, PlanStep::CreateMetadata],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlanStep::FeeTransfer => "fee_transfer",
            PlanStep::CreateMintAccount => "create_mint_account",
            PlanStep::InitializeMint => "initialize_mint",
            PlanStep::CreateMetadata => "create_metadata",
            PlanStep::CreateAssociatedAccount => "create_associated_account",
            PlanStep::MintSupply => "mint_supply",
            PlanStep::RevokeMintAuthority => "revoke_mint_authority",
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How the plan is submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStrategy {
    /// One transaction; all or nothing
    Atomic,
    /// Sequential transactions, each confirmed before the next
    Saga,
}

/// Instructions of one step, tagged with the step it depends on
#[derive(Debug, Clone)]
pub struct InstructionGroup {
    pub step: PlanStep,
    pub instructions: Vec<Instruction>,
    /// Nearest predecessor present in this plan
    pub depends_on: Option<PlanStep>,
}

/// One future transaction
#[derive(Debug, Clone)]
pub struct PlanBatch {
    pub index: usize,
    pub groups: Vec<InstructionGroup>,
    /// `<request key>:<index>:<steps>`; stable across resumed attempts
    pub idempotency_key: String,
}

impl PlanBatch {
    pub fn steps(&self) -> Vec<PlanStep> {
        self.groups.iter().map(|g| g.step).collect()
    }

    pub fn contains(&self, step: PlanStep) -> bool {
        self.groups.iter().any(|g| g.step == step)
    }

    /// The freshly generated mint keypair must co-sign the account creation
    pub fn needs_mint_signature(&self) -> bool {
        self.contains(PlanStep::CreateMintAccount)
    }

    pub fn label(&self) -> String {
        self.steps()
            .iter()
            .map(|s| s.label())
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Compute budget instructions first, then the step instructions
    pub fn instructions(&self, budget: &ComputeBudget) -> Vec<Instruction> {
        let mut out = budget.instructions();
        out.extend(self.groups.iter().flat_map(|g| g.instructions.iter().cloned()));
        out
    }

    /// Position of the first instruction of `step` in the compiled transaction
    pub fn instruction_index(&self, step: PlanStep, budget: &ComputeBudget) -> Option<usize> {
        let mut index = budget.instructions().len();
        for group in &self.groups {
            if group.step == step {
                return Some(index);
            }
            index += group.instructions.len();
        }
        None
    }

    /// Signatures the compiled transaction requires; the network charges its
    /// base fee per signature
    pub fn required_signatures(&self, budget: &ComputeBudget, payer: &Pubkey) -> u64 {
        let message = Message::new(&self.instructions(budget), Some(payer));
        u64::from(message.header.num_required_signatures)
    }
}

/// Optional compute budget applied to every batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputeBudget {
    pub unit_limit: u32,
    pub unit_price_micro_lamports: u64,
}

impl ComputeBudget {
    pub fn instructions(&self) -> Vec<Instruction> {
        let mut out = Vec::with_capacity(2);
        if self.unit_limit > 0 {
            out.push(ComputeBudgetInstruction::set_compute_unit_limit(self.unit_limit));
        }
        if self.unit_price_micro_lamports > 0 {
            out.push(ComputeBudgetInstruction::set_compute_unit_price(
                self.unit_price_micro_lamports,
            ));
        }
        out
    }
}

/// Knobs that shape the plan
#[derive(Debug, Clone, Copy)]
pub struct PlanOptions {
    pub strategy: StrategyPreference,
    pub max_instructions_per_tx: usize,
    pub budget: ComputeBudget,
    pub include_metadata: bool,
}

impl PlanOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            strategy: config.submission.strategy,
            max_instructions_per_tx: config.submission.max_instructions_per_tx,
            budget: ComputeBudget {
                unit_limit: config.submission.compute_unit_limit,
                unit_price_micro_lamports: config.submission.priority_fee_micro_lamports,
            },
            include_metadata: true,
        }
    }
}

/// Addresses a plan is built around
#[derive(Debug, Clone, Copy)]
pub struct LaunchAccounts {
    /// Requester; pays, signs, and holds every retained authority
    pub payer: Pubkey,
    pub mint: Pubkey,
    pub fee_collector: Pubkey,
}

/// Everything needed to submit a launch
#[derive(Debug, Clone)]
pub struct TransactionPlan {
    pub strategy: PlanStrategy,
    pub batches: Vec<PlanBatch>,
    /// Fee payer of every batch
    pub payer: Pubkey,
    pub mint: Pubkey,
    pub metadata: Option<Pubkey>,
    pub token_account: Pubkey,
    pub supply: u64,
    pub budget: ComputeBudget,
}

impl TransactionPlan {
    pub fn transaction_count(&self) -> usize {
        self.batches.len()
    }

    /// All instructions in submission order (compute budget excluded)
    pub fn flattened(&self) -> Vec<(PlanStep, &Instruction)> {
        self.batches
            .iter()
            .flat_map(|b| b.groups.iter())
            .flat_map(|g| g.instructions.iter().map(move |ix| (g.step, ix)))
            .collect()
    }
}

/// Build the instruction groups for a request, in dependency order
pub fn build_groups(
    request: &TokenRequest,
    supply: u64,
    accounts: &LaunchAccounts,
    rents: &RentTable,
    fee: ServiceFee,
    include_metadata: bool,
) -> LaunchResult<(Vec<InstructionGroup>, Option<Pubkey>, Pubkey)> {
    let token_program = spl_token::id();
    let payer = accounts.payer;
    let mint = accounts.mint;
    let build_err = |step: PlanStep, e: &dyn fmt::Display| {
        LaunchError::internal(format!("failed to build {} instruction: {}", step, e))
    };

    let mut groups: Vec<(PlanStep, Vec<Instruction>)> = Vec::with_capacity(7);

    if fee.lamports > 0 {
        groups.push((
            PlanStep::FeeTransfer,
            vec![system_instruction::transfer(
                &payer,
                &accounts.fee_collector,
                fee.lamports,
            )],
        ));
    }

    groups.push((
        PlanStep::CreateMintAccount,
        vec![system_instruction::create_account(
            &payer,
            &mint,
            rents.mint,
            spl_token::state::Mint::LEN as u64,
            &token_program,
        )],
    ));

    let freeze_authority = (!request.authorities.freeze).then_some(payer);
    let init = spl_token::instruction::initialize_mint2(
        &token_program,
        &mint,
        &payer,
        freeze_authority.as_ref(),
        request.decimals,
    )
    .map_err(|e| build_err(PlanStep::InitializeMint, &e))?;
    groups.push((PlanStep::InitializeMint, vec![init]));

    let metadata_address = if include_metadata {
        let address = metadata::find_metadata_address(&mint);
        let args = metadata::metadata_args(request);
        groups.push((
            PlanStep::CreateMetadata,
            vec![metadata::create_metadata_instruction(&address, &mint, &payer, &args)
                .map_err(|e| build_err(PlanStep::CreateMetadata, &e))?],
        ));
        Some(address)
    } else {
        None
    };

    let token_account = get_associated_token_address(&payer, &mint);
    groups.push((
        PlanStep::CreateAssociatedAccount,
        vec![create_associated_token_account_idempotent(
            &payer,
            &payer,
            &mint,
            &token_program,
        )],
    ));

    let mint_to = spl_token::instruction::mint_to(
        &token_program,
        &mint,
        &token_account,
        &payer,
        &[],
        supply,
    )
    .map_err(|e| build_err(PlanStep::MintSupply, &e))?;
    groups.push((PlanStep::MintSupply, vec![mint_to]));

    if request.authorities.mint {
        let revoke = spl_token::instruction::set_authority(
            &token_program,
            &mint,
            None,
            AuthorityType::MintTokens,
            &payer,
            &[],
        )
        .map_err(|e| build_err(PlanStep::RevokeMintAuthority, &e))?;
        groups.push((PlanStep::RevokeMintAuthority, vec![revoke]));
    }

    let present: Vec<PlanStep> = groups.iter().map(|(s, _)| *s).collect();
    let groups = groups
        .into_iter()
        .map(|(step, instructions)| InstructionGroup {
            step,
            instructions,
            depends_on: step
                .predecessors()
                .iter()
                .copied()
                .find(|p| present.contains(p)),
        })
        .collect();

    Ok((groups, metadata_address, token_account))
}

/// Serialized size of a transaction carrying `instructions`, with placeholder signatures
pub fn transaction_size(instructions: &[Instruction], payer: &Pubkey) -> usize {
    let message = Message::new(instructions, Some(payer));
    let tx = Transaction::new_unsigned(message);
    bincode::serialized_size(&tx)
        .map(|n| n as usize)
        .unwrap_or(usize::MAX)
}

fn fits_one_transaction(
    instructions: &[Instruction],
    payer: &Pubkey,
    max_instructions: usize,
) -> bool {
    instructions.len() <= max_instructions
        && transaction_size(instructions, payer) <= PACKET_DATA_SIZE
}

/// Saga batch layout: which steps travel together
fn saga_partition(groups: Vec<InstructionGroup>) -> Vec<Vec<InstructionGroup>> {
    let mut batches: Vec<Vec<InstructionGroup>> = Vec::new();
    for group in groups {
        let joins_previous = matches!(
            group.step,
            PlanStep::InitializeMint | PlanStep::RevokeMintAuthority
        );
        match batches.last_mut() {
            Some(last) if joins_previous => last.push(group),
            _ => batches.push(vec![group]),
        }
    }
    batches
}

fn into_batches(partition: Vec<Vec<InstructionGroup>>, request_key: &str) -> Vec<PlanBatch> {
    partition
        .into_iter()
        .enumerate()
        .map(|(index, groups)| {
            let mut batch = PlanBatch {
                index,
                groups,
                idempotency_key: String::new(),
            };
            batch.idempotency_key = format!("{}:{}:{}", request_key, index, batch.label());
            batch
        })
        .collect()
}

/// Build the full plan for a request.
///
/// `supply` is in base units (already validated). `request_key` seeds the
/// per-batch idempotency keys.
pub fn build_plan(
    request: &TokenRequest,
    supply: u64,
    accounts: &LaunchAccounts,
    rents: &RentTable,
    fee: ServiceFee,
    options: &PlanOptions,
    request_key: &str,
) -> LaunchResult<TransactionPlan> {
    let (groups, metadata, token_account) = build_groups(
        request,
        supply,
        accounts,
        rents,
        fee,
        options.include_metadata,
    )?;

    let mut all_instructions = options.budget.instructions();
    all_instructions.extend(groups.iter().flat_map(|g| g.instructions.iter().cloned()));
    let fits = fits_one_transaction(
        &all_instructions,
        &accounts.payer,
        options.max_instructions_per_tx,
    );

    let strategy = match (options.strategy, fits) {
        (StrategyPreference::Saga, _) => PlanStrategy::Saga,
        (StrategyPreference::Auto, true) | (StrategyPreference::Atomic, true) => {
            PlanStrategy::Atomic
        }
        (StrategyPreference::Auto, false) => PlanStrategy::Saga,
        (StrategyPreference::Atomic, false) => {
            return Err(LaunchError::invalid(format!(
                "launch needs {} instructions / {} bytes and does not fit one transaction; \
                 use strategy 'auto' or 'saga'",
                all_instructions.len(),
                transaction_size(&all_instructions, &accounts.payer)
            )))
        }
    };

    let partition = match strategy {
        PlanStrategy::Atomic => vec![groups],
        PlanStrategy::Saga => saga_partition(groups),
    };
    let batches = into_batches(partition, request_key);

    for batch in &batches {
        let ixs = batch.instructions(&options.budget);
        if !fits_one_transaction(&ixs, &accounts.payer, usize::MAX) {
            return Err(LaunchError::invalid(format!(
                "batch {} is {} bytes, over the {} byte transaction limit",
                batch.label(),
                transaction_size(&ixs, &accounts.payer),
                PACKET_DATA_SIZE
            )));
        }
    }

    let plan = TransactionPlan {
        strategy,
        batches,
        payer: accounts.payer,
        mint: accounts.mint,
        metadata,
        token_account,
        supply,
        budget: options.budget,
    };
    sanity_check_plan_order(&plan)?;
    Ok(plan)
}

/// Validate that no step precedes its predecessors.
///
/// Two layers: step order across the flattened plan, and an instruction-level
/// check that every `MintTo` is preceded by the initialization of its mint.
///
/// # Errors
///
/// `Internal` naming the first violation found.
pub fn sanity_check_plan_order(plan: &TransactionPlan) -> LaunchResult<()> {
    let order: Vec<PlanStep> = plan
        .batches
        .iter()
        .flat_map(|b| b.groups.iter().map(|g| g.step))
        .collect();
    if order.is_empty() {
        return Err(LaunchError::internal("plan is empty"));
    }

    for (position, step) in order.iter().enumerate() {
        for predecessor in step.predecessors() {
            if let Some(p) = order.iter().position(|s| s == predecessor) {
                if p > position {
                    return Err(LaunchError::internal(format!(
                        "{} is ordered before its predecessor {}",
                        step, predecessor
                    )));
                }
            }
        }
    }

    let token_program = spl_token::id();
    let mut initialized: Vec<Pubkey> = Vec::new();
    for (_, ix) in plan.flattened() {
        if ix.program_id != token_program || ix.data.is_empty() || ix.accounts.is_empty() {
            continue;
        }
        let mint = ix.accounts[0].pubkey;
        match ix.data[0] {
            // InitializeMint, InitializeMint2
            0 | 20 => initialized.push(mint),
            // MintTo, MintToChecked
            7 | 14 if !initialized.contains(&mint) => {
                return Err(LaunchError::internal(format!(
                    "mint_to for {} precedes its initialization",
                    mint
                )));
            }
            _ => {}
        }
    }
    Ok(())
}
