//! Transaction submission and confirmation
//!
//! Each plan batch becomes one transaction: fresh blockhash, mint keypair
//! co-signature when the batch creates the mint, wallet signature, broadcast,
//! then status polling until the configured commitment or the timeout. A
//! batch whose associated token account creation loses a race is retried
//! with backoff; when the account turns out to exist already and the batch
//! does nothing else, it is skipped. Any other failure is final for the
//! attempt.

use crate::chain::{ChainClient, SignatureState};
use crate::errors::{LaunchError, LaunchResult};
use crate::plan::{ComputeBudget, PlanBatch, PlanStep, TransactionPlan};
use crate::wallet::WalletSigner;
use rand::Rng;
use solana_sdk::{
    hash::Hash,
    message::Message,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    transaction::Transaction,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Retry configuration with jitter
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including initial attempt)
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds
    pub base_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 250,
            max_backoff_ms: 2000,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// Backoff delay for a given attempt (0-indexed): `base * 2^attempt`, capped, with jitter
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exp_backoff = (self.base_backoff_ms as f64) * 2_f64.powi(attempt as i32);
        let capped_backoff = exp_backoff.min(self.max_backoff_ms as f64);

        let jitter_range = capped_backoff * self.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((capped_backoff + jitter).max(0.0) as u64)
    }
}

/// Retry an async operation while its error is retryable
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> LaunchResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LaunchResult<T>>,
{
    retry_with_backoff_if(operation_name, config, LaunchError::is_retryable, operation).await
}

/// Retry an async operation while `should_retry` accepts its error.
///
/// The last error is returned once attempts are exhausted; a rejected error
/// is returned immediately.
pub async fn retry_with_backoff_if<F, Fut, T, P>(
    operation_name: &str,
    config: &RetryConfig,
    should_retry: P,
    mut operation: F,
) -> LaunchResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LaunchResult<T>>,
    P: Fn(&LaunchError) -> bool,
{
    let start_time = Instant::now();
    let attempts = config.max_attempts.max(1);

    for attempt in 0..attempts {
        if attempt > 0 {
            debug!(
                operation = operation_name,
                attempt = attempt + 1,
                max_attempts = attempts,
                "Retrying operation"
            );
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        duration_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !should_retry(&err) => {
                debug!(operation = operation_name, error = %err, "Permanent error, not retrying");
                return Err(err);
            }
            Err(err) if attempt + 1 < attempts => {
                let backoff = config.calculate_backoff(attempt);
                debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient error, backing off before retry"
                );
                sleep(backoff).await;
            }
            Err(err) => {
                warn!(
                    operation = operation_name,
                    attempts = attempt + 1,
                    duration_ms = start_time.elapsed().as_millis() as u64,
                    error = %err,
                    "Operation failed after all retries"
                );
                return Err(err);
            }
        }
    }

    Err(LaunchError::internal(format!(
        "{} made no attempts",
        operation_name
    )))
}

/// Failure text that indicates the account was created by someone else first
const RACE_MARKERS: &[&str] = &[
    "already in use",
    "already exists",
    "AccountAlreadyInUse",
    "custom program error: 0x0",
];

/// Index of the failing instruction in an `Error processing Instruction N: ...` reason
pub fn failing_instruction(reason: &str) -> Option<usize> {
    let (_, rest) = reason.split_once("Error processing Instruction ")?;
    rest.split(':').next()?.trim().parse().ok()
}

/// Reclassify a failure as an account-creation race.
///
/// Only when the failing instruction is this batch's associated token
/// account creation and the failure says the account already exists. The
/// same markers from the mint account creation are a real failure.
pub fn classify_race(batch: &PlanBatch, budget: &ComputeBudget, err: LaunchError) -> LaunchError {
    let Some(ata_index) = batch.instruction_index(PlanStep::CreateAssociatedAccount, budget) else {
        return err;
    };
    match err {
        LaunchError::TransactionFailed { ref reason, .. }
            if failing_instruction(reason) == Some(ata_index)
                && RACE_MARKERS.iter().any(|m| reason.contains(m)) =>
        {
            LaunchError::AccountCreationRace(reason.clone())
        }
        other => other,
    }
}

/// A broadcast transaction and the window in which it can still land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Broadcast {
    pub signature: Signature,
    pub blockhash: Hash,
    /// Past this block height the transaction can never be processed
    pub last_valid_block_height: u64,
}

/// What happened to a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Confirmed(Signature),
    /// Nothing left to do; the batch's only effect already exists on chain
    Skipped,
}

/// Signs, sends and confirms plan batches
pub struct Submitter {
    chain: Arc<dyn ChainClient>,
    wallet: Arc<dyn WalletSigner>,
    confirm_timeout: Duration,
    poll_interval: Duration,
    retry: RetryConfig,
}

impl Submitter {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        wallet: Arc<dyn WalletSigner>,
        confirm_timeout: Duration,
        poll_interval: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            chain,
            wallet,
            confirm_timeout,
            poll_interval,
            retry,
        }
    }

    /// Build, sign and broadcast one batch
    pub async fn send_batch(
        &self,
        batch: &PlanBatch,
        plan: &TransactionPlan,
        payer: &Pubkey,
        mint_signer: Option<&Keypair>,
    ) -> LaunchResult<Broadcast> {
        let recent = retry_with_backoff("get_latest_blockhash", &self.retry, || {
            self.chain.get_latest_blockhash()
        })
        .await?;
        let blockhash = recent.hash;

        let instructions = batch.instructions(&plan.budget);
        let mut tx = Transaction::new_unsigned(Message::new(&instructions, Some(payer)));
        tx.message.recent_blockhash = blockhash;

        if batch.needs_mint_signature() {
            let mint = mint_signer.ok_or_else(|| {
                LaunchError::internal(format!("batch {} needs the mint keypair", batch.label()))
            })?;
            tx.try_partial_sign(&[mint], blockhash).map_err(|e| {
                LaunchError::internal(format!("mint co-signature failed: {}", e))
            })?;
        }

        let tx = self.wallet.sign_transaction(tx).await?;
        if !tx.is_signed() {
            return Err(LaunchError::internal(format!(
                "batch {} is missing required signatures",
                batch.label()
            )));
        }

        let signature = self
            .chain
            .send_transaction(&tx)
            .await
            .map_err(|e| attach_step(e, batch, None))?;
        info!(
            batch = batch.index,
            steps = %batch.label(),
            signature = %signature,
            last_valid_block_height = recent.last_valid_block_height,
            "Batch broadcast"
        );
        Ok(Broadcast {
            signature,
            blockhash,
            last_valid_block_height: recent.last_valid_block_height,
        })
    }

    /// Poll until the signature is confirmed, fails, or the timeout passes
    pub async fn await_confirmation(
        &self,
        batch: &PlanBatch,
        signature: &Signature,
    ) -> LaunchResult<()> {
        let started = Instant::now();
        let poll = async {
            loop {
                match self.chain.get_signature_state(signature).await {
                    Ok(SignatureState::Confirmed) => return Ok(()),
                    Ok(SignatureState::Failed(reason)) => {
                        return Err(LaunchError::transaction_failed(
                            batch.label(),
                            Some(signature.to_string()),
                            reason,
                        ))
                    }
                    Ok(SignatureState::Pending | SignatureState::Processed) => {}
                    // A flaky status query is not a verdict; keep polling until the deadline
                    Err(e) => debug!(signature = %signature, error = %e, "Status poll failed"),
                }
                sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.confirm_timeout, poll).await {
            Ok(result) => {
                if result.is_ok() {
                    debug!(
                        signature = %signature,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Batch confirmed"
                    );
                }
                result
            }
            Err(_) => Err(LaunchError::ConfirmationTimeout {
                signature: signature.to_string(),
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    /// Send and confirm a batch, retrying account-creation races.
    ///
    /// `on_broadcast` runs after every broadcast and before confirmation, so
    /// the caller can persist the pending signature and its blockhash window.
    pub async fn run_batch<F>(
        &self,
        batch: &PlanBatch,
        plan: &TransactionPlan,
        payer: &Pubkey,
        mint_signer: Option<&Keypair>,
        on_broadcast: F,
    ) -> LaunchResult<BatchOutcome>
    where
        F: Fn(&Broadcast) -> LaunchResult<()> + Send + Sync,
    {
        let is_race = |e: &LaunchError| matches!(e, LaunchError::AccountCreationRace(_));
        let mut attempt = 0u32;

        retry_with_backoff_if(
            &format!("batch {}", batch.label()),
            &self.retry,
            is_race,
            || {
                attempt += 1;
                let retrying = attempt > 1;
                let on_broadcast = &on_broadcast;
                async move {
                    if retrying && self.ata_only_and_present(batch, plan).await? {
                        info!(
                            token_account = %plan.token_account,
                            "Associated token account already exists, skipping batch"
                        );
                        return Ok(BatchOutcome::Skipped);
                    }
                    let broadcast = self
                        .send_batch(batch, plan, payer, mint_signer)
                        .await
                        .map_err(|e| classify_race(batch, &plan.budget, e))?;
                    on_broadcast(&broadcast)?;
                    self.await_confirmation(batch, &broadcast.signature)
                        .await
                        .map_err(|e| classify_race(batch, &plan.budget, e))?;
                    Ok(BatchOutcome::Confirmed(broadcast.signature))
                }
            },
        )
        .await
    }

    async fn ata_only_and_present(
        &self,
        batch: &PlanBatch,
        plan: &TransactionPlan,
    ) -> LaunchResult<bool> {
        if batch.steps() != [PlanStep::CreateAssociatedAccount] {
            return Ok(false);
        }
        self.chain.account_exists(&plan.token_account).await
    }
}

fn attach_step(err: LaunchError, batch: &PlanBatch, signature: Option<String>) -> LaunchError {
    match err {
        LaunchError::TransactionFailed { reason, .. } => {
            LaunchError::transaction_failed(batch.label(), signature, reason)
        }
        other => other,
    }
}
