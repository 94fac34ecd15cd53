//! Error types for the token launcher
//!
//! Every failure a launch can hit is folded into [`LaunchError`] at the
//! orchestrator boundary. Errors are designed to be:
//! - Distinguishable: funds vs. network rejection vs. declined signature
//! - Observable: each variant maps to a stable metrics/log category
//! - Itemized: funding failures carry the full cost breakdown

use crate::cost::CostBreakdown;
use crate::fees::lamports_to_sol;
use thiserror::Error;

/// Comprehensive error type for every launch operation
#[derive(Error, Debug, Clone)]
pub enum LaunchError {
    /// Missing or malformed configuration (RPC endpoint, fee collector, timeouts)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The RPC endpoint could not be reached or returned a transport failure
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Wallet balance does not cover the estimated cost
    ///
    /// The display form enumerates every cost component and the shortfall.
    #[error("{}", render_insufficient_funds(.breakdown, .balance))]
    InsufficientFunds {
        /// Itemized cost of the remaining launch steps
        breakdown: CostBreakdown,
        /// Balance observed for the requesting wallet (lamports)
        balance: u64,
        /// `breakdown.total() - balance` (lamports)
        shortfall: u64,
    },

    /// No wallet is connected to provide signatures
    #[error("Wallet not connected")]
    WalletNotConnected,

    /// The connected wallet is not the one named in the request
    #[error("Wallet mismatch: request names {requested}, connected wallet is {connected}")]
    WalletMismatch {
        requested: String,
        connected: String,
    },

    /// The user declined to sign a transaction
    #[error("Signing rejected: {0}")]
    SigningRejected(String),

    /// The chain executed the transaction and reported an error
    #[error("Transaction failed at {step} (signature={signature:?}): {reason}")]
    TransactionFailed {
        /// Human-readable name of the batch that failed
        step: String,
        /// Signature, when the transaction was broadcast
        signature: Option<String>,
        /// Chain-reported reason
        reason: String,
    },

    /// Transaction was broadcast but never confirmed within the polling window
    #[error("Transaction {signature} not confirmed within {waited_ms}ms")]
    ConfirmationTimeout { signature: String, waited_ms: u64 },

    /// Account creation collided with concurrent external state (transient)
    #[error("Account creation race: {0}")]
    AccountCreationRace(String),

    /// Request parameters failed validation before anything was built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Checkpoint store read/write failure
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Internal invariant violation or unexpected state
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LaunchError {
    /// Check if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connectivity(_) => true,
            Self::AccountCreationRace(_) => true,
            Self::ConfirmationTimeout { .. } => true,

            Self::Configuration(_) => false,
            Self::InsufficientFunds { .. } => false,
            Self::WalletNotConnected => false,
            Self::WalletMismatch { .. } => false,
            Self::SigningRejected(_) => false,
            Self::TransactionFailed { .. } => false,
            Self::InvalidRequest(_) => false,
            Self::Checkpoint(_) => false,
            Self::Internal(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "config",
            Self::Connectivity(_) => "connectivity",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::WalletNotConnected => "wallet_not_connected",
            Self::WalletMismatch { .. } => "wallet_mismatch",
            Self::SigningRejected(_) => "signing_rejected",
            Self::TransactionFailed { .. } => "transaction_failed",
            Self::ConfirmationTimeout { .. } => "confirmation_timeout",
            Self::AccountCreationRace(_) => "account_race",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Checkpoint(_) => "checkpoint",
            Self::Internal(_) => "internal",
        }
    }

    /// Single user-facing failure line
    pub fn user_message(&self) -> String {
        match self {
            Self::InsufficientFunds { .. } => format!("You need more SOL. {}", self),
            Self::SigningRejected(_) => {
                "You declined to sign the transaction; nothing further was submitted".to_string()
            }
            Self::WalletNotConnected => "Connect a wallet before creating a token".to_string(),
            Self::TransactionFailed { .. } | Self::ConfirmationTimeout { .. } => {
                format!("The network rejected the transaction: {}", self)
            }
            other => other.to_string(),
        }
    }
}

// Convenience constructors for common error scenarios
impl LaunchError {
    pub fn connectivity(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Connectivity(format!("{}: {}", context, err))
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }

    pub fn transaction_failed(
        step: impl Into<String>,
        signature: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::TransactionFailed {
            step: step.into(),
            signature,
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

fn render_insufficient_funds(breakdown: &CostBreakdown, balance: &u64) -> String {
    let balance = *balance;
    let mut out = String::from("Insufficient funds:");
    for (label, lamports) in breakdown.components() {
        out.push_str(&format!(" {} {:.9} SOL;", label, lamports_to_sol(lamports)));
    }
    let total = breakdown.total();
    out.push_str(&format!(
        " total {:.9} SOL; balance {:.9} SOL; shortfall {:.9} SOL",
        lamports_to_sol(total),
        lamports_to_sol(balance),
        lamports_to_sol(total.saturating_sub(balance)),
    ));
    out
}

pub type LaunchResult<T> = std::result::Result<T, LaunchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LaunchError::Connectivity("rpc down".to_string());
        assert_eq!(err.to_string(), "Connectivity error: rpc down");

        let err = LaunchError::transaction_failed("mint supply", None, "custom program error: 0x1");
        assert_eq!(
            err.to_string(),
            "Transaction failed at mint supply (signature=None): custom program error: 0x1"
        );
    }

    #[test]
    fn test_error_retryability() {
        assert!(LaunchError::Connectivity("x".into()).is_retryable());
        assert!(LaunchError::AccountCreationRace("x".into()).is_retryable());

        assert!(!LaunchError::SigningRejected("x".into()).is_retryable());
        assert!(!LaunchError::WalletNotConnected.is_retryable());
        assert!(!LaunchError::InvalidRequest("x".into()).is_retryable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(LaunchError::WalletNotConnected.category(), "wallet_not_connected");
        assert_eq!(LaunchError::Checkpoint("x".into()).category(), "checkpoint");
        assert_eq!(
            LaunchError::ConfirmationTimeout {
                signature: "s".into(),
                waited_ms: 1
            }
            .category(),
            "confirmation_timeout"
        );
    }

    #[test]
    fn test_user_messages_are_distinguishable() {
        let rejected = LaunchError::SigningRejected("user closed popup".into()).user_message();
        let failed = LaunchError::transaction_failed("fee", None, "blockhash expired").user_message();
        assert!(rejected.contains("declined"));
        assert!(failed.contains("network rejected"));
    }
}
