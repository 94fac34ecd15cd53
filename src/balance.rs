//! Balance guard: fail fast, before anything is signed, when the wallet
//! cannot cover the estimated cost.

use crate::cost::CostBreakdown;
use crate::errors::{LaunchError, LaunchResult};
use tracing::warn;

/// `Ok(())` if `balance >= breakdown.total()`, otherwise an itemized
/// `InsufficientFunds` error.
pub fn check_balance(balance: u64, breakdown: &CostBreakdown) -> LaunchResult<()> {
    let required = breakdown.total();
    if balance >= required {
        return Ok(());
    }
    let shortfall = required - balance;
    warn!(
        balance = balance,
        required = required,
        shortfall = shortfall,
        "Balance below launch cost"
    );
    Err(LaunchError::InsufficientFunds {
        breakdown: *breakdown,
        balance,
        shortfall,
    })
}
