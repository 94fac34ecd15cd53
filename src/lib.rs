//! Token Launcher - client-side SPL token creation
//!
//! Stands up a new SPL token (mint, metadata, initial supply, optional
//! authority revocations) from a single request, charging a flat service fee
//! and guarding the requester's balance before anything is signed.
//!
//! The entry point is [`launcher::TokenLauncher`]; chain access and signing
//! are injected through [`chain::ChainClient`] and [`wallet::WalletSigner`].

pub mod balance;
pub mod chain;
pub mod checkpoint;
pub mod config;
pub mod cost;
pub mod errors;
pub mod fees;
pub mod launcher;
pub mod metadata;
pub mod metrics;
pub mod observability;
pub mod plan;
pub mod result;
pub mod submit;
pub mod types;
pub mod wallet;

pub mod test_utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use errors::{LaunchError, LaunchResult};
pub use launcher::{LaunchEstimate, LaunchState, TokenLauncher};
pub use types::{LaunchResponse, TokenRequest, TokenResult};
