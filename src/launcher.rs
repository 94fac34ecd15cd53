//! Launch orchestration
//!
//! [`TokenLauncher`] drives one request through the launch state machine:
//!
//! ```text
//! Idle -> Estimating -> BalanceChecked -> Submitting(i) -> Confirming(i)
//!      -> Submitting(i + 1) -> ... -> Succeeded
//! ```
//!
//! Any non-terminal state may move to `Failed`. Progress is checkpointed
//! after every broadcast and every confirmation, so retrying the same request
//! resumes where the previous attempt stopped.

use crate::balance::check_balance;
use crate::chain::{AccountClass, ChainClient, SignatureState};
use crate::checkpoint::{request_key, CheckpointStore, LaunchCheckpoint, PendingSignature};
use crate::config::{Config, StrategyPreference};
use crate::cost::{CostBreakdown, CostEstimator, RentTable};
use crate::errors::{LaunchError, LaunchResult};
use crate::fees::{calculate_service_fee, ServiceFee};
use crate::metrics::{Metrics, Timer};
use crate::observability::{launch_span, CorrelationId};
use crate::plan::{
    build_plan, LaunchAccounts, PlanBatch, PlanOptions, PlanStep, PlanStrategy, TransactionPlan,
};
use crate::result::ResultAggregator;
use crate::submit::{BatchOutcome, Broadcast, Submitter};
use crate::types::{LaunchResponse, TokenRequest, TokenResult};
use crate::wallet::WalletSigner;
use serde::{Deserialize, Serialize};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Per-request launch state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "batch", rename_all = "snake_case")]
pub enum LaunchState {
    Idle,
    Estimating,
    BalanceChecked,
    Submitting(usize),
    Confirming(usize),
    Succeeded,
    Failed,
}

impl LaunchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LaunchState::Succeeded | LaunchState::Failed)
    }

    pub fn can_transition_to(&self, next: &LaunchState) -> bool {
        use LaunchState::*;
        match (*self, *next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, Estimating) => true,
            (Estimating, BalanceChecked) => true,
            // Nothing left to submit on a fully checkpointed resume
            (BalanceChecked, Succeeded) => true,
            (BalanceChecked, Submitting(_)) => true,
            (Submitting(i), Confirming(j)) => i == j,
            // Skipped batch
            (Submitting(i), Submitting(j)) => j > i,
            (Submitting(_), Succeeded) => true,
            // Rebroadcast after an account-creation race
            (Confirming(i), Confirming(j)) => i == j,
            (Confirming(i), Submitting(j)) => j > i,
            (Confirming(_), Succeeded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchState::Idle => write!(f, "idle"),
            LaunchState::Estimating => write!(f, "estimating"),
            LaunchState::BalanceChecked => write!(f, "balance_checked"),
            LaunchState::Submitting(i) => write!(f, "submitting({})", i),
            LaunchState::Confirming(i) => write!(f, "confirming({})", i),
            LaunchState::Succeeded => write!(f, "succeeded"),
            LaunchState::Failed => write!(f, "failed"),
        }
    }
}

/// Validated state holder with transition history
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: LaunchState,
    history: Vec<LaunchState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: LaunchState::Idle,
            history: vec![LaunchState::Idle],
        }
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    pub fn history(&self) -> &[LaunchState] {
        &self.history
    }

    pub fn transition(&mut self, next: LaunchState) -> LaunchResult<()> {
        if !self.state.can_transition_to(&next) {
            return Err(LaunchError::internal(format!(
                "invalid launch transition {} -> {}",
                self.state, next
            )));
        }
        debug!(from = %self.state, to = %next, "Launch state transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

/// Cost preview for a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchEstimate {
    pub service_fee: ServiceFee,
    pub fee_amount: f64,
    pub breakdown: CostBreakdown,
    pub total_lamports: u64,
    pub strategy: PlanStrategy,
    pub transaction_count: usize,
    pub balance: u64,
    pub sufficient: bool,
}

struct SessionInner {
    machine: StateMachine,
    checkpoint: Option<LaunchCheckpoint>,
    /// Whether the checkpoint has been written to the store at least once
    persisted: bool,
    broadcast_at: Option<Instant>,
}

/// Mutable state of one launch, shared with the broadcast callback
struct LaunchSession {
    inner: Mutex<SessionInner>,
}

impl LaunchSession {
    fn new() -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                machine: StateMachine::new(),
                checkpoint: None,
                persisted: false,
                broadcast_at: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: LaunchState) -> LaunchResult<()> {
        let mut inner = self.lock();
        inner.machine.transition(next)?;
        if let Some(cp) = inner.checkpoint.as_mut() {
            cp.state = next;
        }
        Ok(())
    }

    fn state(&self) -> LaunchState {
        self.lock().machine.state()
    }

    fn install(&self, checkpoint: LaunchCheckpoint, persisted: bool) {
        let mut inner = self.lock();
        inner.checkpoint = Some(checkpoint);
        inner.persisted = persisted;
    }

    fn is_persisted(&self) -> bool {
        self.lock().persisted
    }

    /// Apply `update` to the checkpoint and persist it
    fn checkpoint<F>(&self, store: &dyn CheckpointStore, update: F) -> LaunchResult<()>
    where
        F: FnOnce(&mut LaunchCheckpoint),
    {
        let mut inner = self.lock();
        let saved = match inner.checkpoint.as_mut() {
            Some(cp) => {
                update(cp);
                store.save(cp)
            }
            None => Err(LaunchError::internal("launch has no checkpoint")),
        };
        if saved.is_ok() {
            inner.persisted = true;
        }
        saved
    }
}

/// Client-side token launch orchestrator
pub struct TokenLauncher {
    config: Config,
    chain: Arc<dyn ChainClient>,
    wallet: Arc<dyn WalletSigner>,
    checkpoints: Arc<dyn CheckpointStore>,
    metrics: Arc<Metrics>,
    fee_collector: Pubkey,
    include_metadata: bool,
}

impl fmt::Debug for TokenLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenLauncher")
            .field("chain", &self.chain)
            .field("wallet", &self.wallet)
            .field("fee_collector", &self.fee_collector)
            .finish()
    }
}

impl TokenLauncher {
    /// Build a launcher. The configuration is validated here, once.
    pub fn new(
        config: Config,
        chain: Arc<dyn ChainClient>,
        wallet: Arc<dyn WalletSigner>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> LaunchResult<Self> {
        config.validate()?;
        let fee_collector = config.fees.collector_pubkey()?;
        let metrics = Metrics::new()
            .map_err(|e| LaunchError::internal(format!("metrics registry: {}", e)))?;
        Ok(Self {
            config,
            chain,
            wallet,
            checkpoints,
            metrics: Arc::new(metrics),
            fee_collector,
            include_metadata: true,
        })
    }

    /// Skip the metadata account (and its rent)
    pub fn with_metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn submitter(&self) -> Submitter {
        Submitter::new(
            Arc::clone(&self.chain),
            Arc::clone(&self.wallet),
            self.config.submission.confirm_timeout(),
            self.config.submission.poll_interval(),
            self.config.submission.retry.to_retry_config(),
        )
    }

    fn rent_classes(&self) -> Vec<AccountClass> {
        let mut classes = vec![AccountClass::Mint, AccountClass::TokenAccount];
        if self.include_metadata {
            classes.push(AccountClass::Metadata);
        }
        classes
    }

    fn plan_options(&self, resumed: Option<PlanStrategy>) -> PlanOptions {
        let mut options = PlanOptions::from_config(&self.config);
        options.include_metadata = self.include_metadata;
        // A resumed launch keeps the batch layout it started with
        match resumed {
            Some(PlanStrategy::Atomic) => options.strategy = StrategyPreference::Atomic,
            Some(PlanStrategy::Saga) => options.strategy = StrategyPreference::Saga,
            None => {}
        }
        options
    }

    fn plan_for(
        &self,
        request: &TokenRequest,
        supply: u64,
        mint: Pubkey,
        rents: &RentTable,
        fee: ServiceFee,
        key: &str,
        resumed: Option<PlanStrategy>,
    ) -> LaunchResult<TransactionPlan> {
        let accounts = LaunchAccounts {
            payer: request.wallet_address,
            mint,
            fee_collector: self.fee_collector,
        };
        build_plan(
            request,
            supply,
            &accounts,
            rents,
            fee,
            &self.plan_options(resumed),
            key,
        )
    }

    /// Compute the full cost of a request and compare it with the wallet balance.
    ///
    /// Nothing is signed or submitted. Completed steps of an existing
    /// checkpoint are not charged.
    pub async fn estimate(&self, request: &TokenRequest) -> LaunchResult<LaunchEstimate> {
        let key = request_key(request);
        let span = launch_span("estimate", &CorrelationId::new(), &key);
        async {
            let supply = request.validate()?;
            let fee = calculate_service_fee(&request.fee_options(), &self.config.fees.schedule());
            let estimator = CostEstimator::new(Arc::clone(&self.chain), &self.config);
            let rents = estimator.fetch_rents(&self.rent_classes()).await?;

            let checkpoint = self.checkpoints.load(&key)?;
            let mint = match &checkpoint {
                Some(cp) => cp.mint,
                None => Keypair::new().pubkey(),
            };
            let plan = self.plan_for(
                request,
                supply,
                mint,
                &rents,
                fee,
                &key,
                checkpoint.as_ref().map(|cp| cp.strategy),
            )?;
            let remaining: Vec<&PlanBatch> = plan
                .batches
                .iter()
                .filter(|b| !checkpoint.as_ref().is_some_and(|cp| cp.is_completed(b)))
                .collect();
            let breakdown = estimator.breakdown(&plan, &remaining, &rents, fee);
            let balance = self.chain.get_balance(&request.wallet_address).await?;

            Ok(LaunchEstimate {
                service_fee: fee,
                fee_amount: fee.as_sol(),
                total_lamports: breakdown.total(),
                breakdown,
                strategy: plan.strategy,
                transaction_count: remaining.len(),
                balance,
                sufficient: check_balance(balance, &breakdown).is_ok(),
            })
        }
        .instrument(span)
        .await
    }

    /// Run a launch end to end. Errors are logged once, here.
    pub async fn launch(&self, request: &TokenRequest) -> LaunchResult<TokenResult> {
        let correlation_id = CorrelationId::new();
        let key = request_key(request);
        let span = launch_span("launch", &correlation_id, &key);
        let timer = Timer::new();
        self.metrics.launches_total.inc();

        let session = LaunchSession::new();
        let result = self
            .run_launch(request, &key, &session)
            .instrument(span.clone())
            .await;

        span.in_scope(|| match &result {
            Ok(token) => {
                self.metrics.launches_succeeded.inc();
                timer.observe_duration(&self.metrics.launch_latency);
                info!(
                    mint = %token.token_address,
                    signatures = token.signatures.len(),
                    fee_sol = token.fee_amount,
                    "Token launched"
                );
            }
            Err(err) => {
                self.metrics.record_failure(err.category());
                if let Err(e) = session.transition(LaunchState::Failed) {
                    debug!(error = %e, "Failed state not recorded");
                }
                // A launch that never broadcast leaves nothing to resume
                if session.is_persisted() {
                    if let Err(e) = session.checkpoint(self.checkpoints.as_ref(), |_| {}) {
                        warn!(error = %e, "Could not persist failed checkpoint");
                    }
                }
                error!(
                    category = err.category(),
                    retryable = err.is_retryable(),
                    state = %session.state(),
                    error = %err,
                    "Launch failed"
                );
            }
        });
        result
    }

    /// [`launch`](Self::launch) folded into the caller-facing response shape
    pub async fn launch_response(&self, request: &TokenRequest) -> LaunchResponse {
        LaunchResponse::from(self.launch(request).await)
    }

    async fn run_launch(
        &self,
        request: &TokenRequest,
        key: &str,
        session: &LaunchSession,
    ) -> LaunchResult<TokenResult> {
        let supply = request.validate()?;

        let connected = self.wallet.pubkey().ok_or(LaunchError::WalletNotConnected)?;
        if connected != request.wallet_address {
            return Err(LaunchError::WalletMismatch {
                requested: request.wallet_address.to_string(),
                connected: connected.to_string(),
            });
        }

        session.transition(LaunchState::Estimating)?;
        let fee = calculate_service_fee(&request.fee_options(), &self.config.fees.schedule());
        let estimator = CostEstimator::new(Arc::clone(&self.chain), &self.config);
        let rents = estimator.fetch_rents(&self.rent_classes()).await?;

        let existing = self.checkpoints.load(key)?;
        let (mint_pubkey, mut mint_signer) = match &existing {
            Some(cp) => {
                info!(
                    mint = %cp.mint,
                    completed = cp.completed.len(),
                    batches = cp.batch_count,
                    "Resuming launch from checkpoint"
                );
                self.metrics.launches_resumed.inc();
                (cp.mint, cp.mint_keypair()?)
            }
            None => {
                let mint = Keypair::new();
                (mint.pubkey(), Some(mint))
            }
        };

        let plan = self.plan_for(
            request,
            supply,
            mint_pubkey,
            &rents,
            fee,
            key,
            existing.as_ref().map(|cp| cp.strategy),
        )?;
        info!(
            strategy = ?plan.strategy,
            transactions = plan.transaction_count(),
            mint = %plan.mint,
            "Launch planned"
        );

        match existing {
            Some(cp) => {
                cp.verify_against(&plan.batches)?;
                session.install(cp, true);
            }
            None => match &mint_signer {
                Some(mint) => session.install(
                    LaunchCheckpoint::new(key.to_string(), mint, plan.strategy, plan.batches.len()),
                    false,
                ),
                None => return Err(LaunchError::internal("fresh launch without a mint keypair")),
            },
        }

        let submitter = self.submitter();
        self.reconcile_pending(&submitter, &plan, session).await?;

        let remaining: Vec<&PlanBatch> = {
            let inner = session.lock();
            plan.batches
                .iter()
                .filter(|b| !inner.checkpoint.as_ref().is_some_and(|cp| cp.is_completed(b)))
                .collect()
        };
        let breakdown = estimator.breakdown(&plan, &remaining, &rents, fee);
        let balance = self.chain.get_balance(&request.wallet_address).await?;
        check_balance(balance, &breakdown)?;
        session.transition(LaunchState::BalanceChecked)?;

        // Persist the mint secret before anything is broadcast
        session.checkpoint(self.checkpoints.as_ref(), |_| {})?;

        for batch in remaining {
            session.transition(LaunchState::Submitting(batch.index))?;
            let index = batch.index;
            let store = self.checkpoints.as_ref();
            let on_broadcast = |broadcast: &Broadcast| -> LaunchResult<()> {
                self.metrics.transactions_sent.inc();
                session.lock().broadcast_at = Some(Instant::now());
                session.checkpoint(store, |cp| cp.record_pending(index, broadcast))?;
                session.transition(LaunchState::Confirming(index))
            };

            let outcome = submitter
                .run_batch(batch, &plan, &request.wallet_address, mint_signer.as_ref(), on_broadcast)
                .await?;

            let signature = match outcome {
                BatchOutcome::Confirmed(signature) => {
                    self.metrics.transactions_confirmed.inc();
                    if let Some(at) = session.lock().broadcast_at.take() {
                        self.metrics
                            .confirmation_latency
                            .observe(at.elapsed().as_secs_f64());
                    }
                    Some(signature.to_string())
                }
                BatchOutcome::Skipped => {
                    self.metrics.batches_skipped.inc();
                    None
                }
            };

            let mint_created = batch.contains(PlanStep::CreateMintAccount);
            session.checkpoint(store, |cp| {
                cp.record_completed(batch, signature);
                if mint_created {
                    cp.forget_mint_secret();
                }
            })?;
            if mint_created {
                mint_signer = None;
            }
        }

        let signatures = {
            let inner = session.lock();
            match inner.checkpoint.as_ref() {
                Some(cp) if cp.all_completed() => cp.signatures(),
                Some(cp) => {
                    return Err(LaunchError::internal(format!(
                        "launch ended with {} of {} batches confirmed",
                        cp.completed.len(),
                        cp.batch_count
                    )))
                }
                None => return Err(LaunchError::internal("launch has no checkpoint")),
            }
        };
        session.transition(LaunchState::Succeeded)?;
        self.verify_supply(&plan).await;

        let mut aggregator = ResultAggregator::new(&plan, fee, key);
        aggregator.extend_signatures(signatures);
        let result = aggregator.finish()?;

        if let Err(e) = self.checkpoints.remove(key) {
            warn!(error = %e, "Could not remove completed checkpoint");
        }
        Ok(result)
    }

    /// Settle a signature left in flight by a previous attempt.
    ///
    /// Confirmed: the batch is marked complete. Failed, or never seen and past
    /// its blockhash window: it is cleared and resubmitted with a fresh
    /// blockhash. Otherwise wait for it like a fresh broadcast; a timeout is
    /// reported only while the transaction can still land.
    async fn reconcile_pending(
        &self,
        submitter: &Submitter,
        plan: &TransactionPlan,
        session: &LaunchSession,
    ) -> LaunchResult<()> {
        let pending = session
            .lock()
            .checkpoint
            .as_ref()
            .and_then(|cp| cp.pending.clone());
        let Some(pending) = pending else {
            return Ok(());
        };
        let batch = plan.batches.get(pending.batch).ok_or_else(|| {
            LaunchError::Checkpoint(format!("pending batch {} is not in the plan", pending.batch))
        })?;
        let signature = Signature::from_str(&pending.signature).map_err(|e| {
            LaunchError::Checkpoint(format!("pending signature is invalid: {}", e))
        })?;

        let confirmed = match self.pending_verdict(&pending, &signature).await? {
            Some(verdict) => verdict,
            None => match submitter.await_confirmation(batch, &signature).await {
                Ok(()) => true,
                Err(LaunchError::TransactionFailed { .. }) => false,
                Err(timeout @ LaunchError::ConfirmationTimeout { .. }) => {
                    match self.pending_verdict(&pending, &signature).await? {
                        Some(verdict) => verdict,
                        None => return Err(timeout),
                    }
                }
                Err(e) => return Err(e),
            },
        };

        let mint_created = batch.contains(PlanStep::CreateMintAccount);
        session.checkpoint(self.checkpoints.as_ref(), |cp| {
            if confirmed {
                cp.record_completed(batch, Some(signature.to_string()));
                if mint_created {
                    cp.forget_mint_secret();
                }
            } else {
                cp.pending = None;
            }
        })?;
        if confirmed {
            debug!(batch = batch.index, signature = %signature, "Pending batch confirmed");
        }
        Ok(())
    }

    /// `Some(true)` once confirmed, `Some(false)` when failed or expired
    /// unseen, `None` while it may still land
    async fn pending_verdict(
        &self,
        pending: &PendingSignature,
        signature: &Signature,
    ) -> LaunchResult<Option<bool>> {
        // Height before status: anything that landed in time shows up in the status read
        let block_height = self.chain.get_block_height().await?;
        match self.chain.get_signature_state(signature).await? {
            SignatureState::Confirmed => Ok(Some(true)),
            SignatureState::Failed(reason) => {
                info!(signature = %signature, reason = %reason, "Pending batch failed; resubmitting");
                Ok(Some(false))
            }
            SignatureState::Pending if pending.is_expired(block_height) => {
                info!(
                    signature = %signature,
                    blockhash = %pending.blockhash,
                    block_height,
                    last_valid_block_height = pending.last_valid_block_height,
                    "Pending batch expired without landing; resubmitting"
                );
                Ok(Some(false))
            }
            SignatureState::Pending | SignatureState::Processed => Ok(None),
        }
    }

    async fn verify_supply(&self, plan: &TransactionPlan) {
        match self.chain.get_token_balance(&plan.token_account).await {
            Ok(Some(amount)) if amount == plan.supply => {
                debug!(token_account = %plan.token_account, amount, "Minted supply verified");
            }
            Ok(Some(amount)) => warn!(
                token_account = %plan.token_account,
                expected = plan.supply,
                found = amount,
                "Token account balance differs from minted supply"
            ),
            Ok(None) => warn!(token_account = %plan.token_account, "Token account not visible yet"),
            Err(e) => debug!(error = %e, "Supply verification skipped"),
        }
    }
}
