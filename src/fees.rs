//! Service fee calculation
//!
//! The fee is a base amount plus a fixed surcharge for every optional feature
//! the requester selects (each authority revocation and creator metadata).
//! All arithmetic happens in lamports; conversion to SOL happens once, at the
//! edge, so amounts such as 0.05 + 0.3 + 0.1 come out as exactly 0.45.

use serde::{Deserialize, Serialize};

/// Lamports in one SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Base fee: 0.05 SOL
pub const DEFAULT_BASE_FEE_LAMPORTS: u64 = 50_000_000;

/// Surcharge per selected option: 0.1 SOL
pub const DEFAULT_OPTION_FEE_LAMPORTS: u64 = 100_000_000;

/// Fee schedule in lamports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub base_lamports: u64,
    pub per_option_lamports: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            base_lamports: DEFAULT_BASE_FEE_LAMPORTS,
            per_option_lamports: DEFAULT_OPTION_FEE_LAMPORTS,
        }
    }
}

/// Options that carry a surcharge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeOptions {
    pub revoke_freeze: bool,
    pub revoke_mint: bool,
    pub revoke_update: bool,
    pub creator_metadata: bool,
}

impl FeeOptions {
    /// Number of surcharged options selected (0..=4)
    pub fn selected_count(&self) -> u64 {
        [
            self.revoke_freeze,
            self.revoke_mint,
            self.revoke_update,
            self.creator_metadata,
        ]
        .iter()
        .filter(|selected| **selected)
        .count() as u64
    }
}

/// Computed service fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFee {
    pub lamports: u64,
}

impl ServiceFee {
    pub fn as_sol(&self) -> f64 {
        lamports_to_sol(self.lamports)
    }
}

/// Calculate the service fee for a set of options. Pure and deterministic.
pub fn calculate_service_fee(options: &FeeOptions, schedule: &FeeSchedule) -> ServiceFee {
    let surcharge = schedule
        .per_option_lamports
        .saturating_mul(options.selected_count());
    ServiceFee {
        lamports: schedule.base_lamports.saturating_add(surcharge),
    }
}

/// Convert lamports to SOL
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// SOL to lamports, rounding half-up at 9 decimal places
    fn sol_to_lamports(sol: f64) -> Option<u64> {
        if !sol.is_finite() || sol < 0.0 {
            return None;
        }
        let scaled = (sol * LAMPORTS_PER_SOL as f64 + 0.5).floor();
        if scaled > u64::MAX as f64 {
            return None;
        }
        Some(scaled as u64)
    }

    #[test]
    fn test_base_fee_only() {
        let fee = calculate_service_fee(&FeeOptions::default(), &FeeSchedule::default());
        assert_eq!(fee.lamports, 50_000_000);
        assert_eq!(fee.as_sol(), 0.05);
    }

    #[test]
    fn test_all_options_selected() {
        let options = FeeOptions {
            revoke_freeze: true,
            revoke_mint: true,
            revoke_update: true,
            creator_metadata: true,
        };
        let fee = calculate_service_fee(&options, &FeeSchedule::default());
        assert_eq!(fee.lamports, 450_000_000);
        assert_eq!(fee.as_sol(), 0.45);
    }

    #[test]
    fn test_sol_to_lamports_rounding() {
        assert_eq!(sol_to_lamports(0.05), Some(50_000_000));
        assert_eq!(sol_to_lamports(0.1 + 0.2), Some(300_000_000));
        assert_eq!(sol_to_lamports(-1.0), None);
        assert_eq!(sol_to_lamports(f64::NAN), None);
    }

    proptest! {
        #[test]
        fn fee_matches_formula(freeze: bool, mint: bool, update: bool, creator: bool) {
            let options = FeeOptions {
                revoke_freeze: freeze,
                revoke_mint: mint,
                revoke_update: update,
                creator_metadata: creator,
            };
            let fee = calculate_service_fee(&options, &FeeSchedule::default());

            let authorities = [freeze, mint, update].iter().filter(|b| **b).count() as f64;
            let expected = 0.05 + 0.1 * authorities + if creator { 0.1 } else { 0.0 };

            prop_assert_eq!(fee.lamports, sol_to_lamports(expected).unwrap());
            prop_assert!((fee.as_sol() - expected).abs() < 1e-12);
        }
    }
}
