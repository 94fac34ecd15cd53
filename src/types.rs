//! Request and result types shared across the launcher

use crate::errors::{LaunchError, LaunchResult};
use crate::fees::FeeOptions;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Maximum token name length accepted by the metadata program (bytes)
pub const MAX_NAME_LEN: usize = 32;
/// Maximum symbol length accepted by the metadata program (bytes)
pub const MAX_SYMBOL_LEN: usize = 10;
/// Maximum metadata URI length accepted by the metadata program (bytes)
pub const MAX_URI_LEN: usize = 200;
/// Highest decimal precision supported
pub const MAX_DECIMALS: u8 = 9;

/// Serde helpers that encode a `Pubkey` as its base58 string
pub mod pubkey_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Pubkey, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&key.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Pubkey, D::Error> {
        let raw = String::deserialize(d)?;
        Pubkey::from_str(raw.trim()).map_err(|e| D::Error::custom(format!("invalid address: {e}")))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(key: &Option<Pubkey>, s: S) -> Result<S::Ok, S::Error> {
            match key {
                Some(k) => s.serialize_some(&k.to_string()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Pubkey>, D::Error> {
            let raw = Option::<String>::deserialize(d)?;
            raw.map(|r| {
                Pubkey::from_str(r.trim())
                    .map_err(|e| D::Error::custom(format!("invalid address: {e}")))
            })
            .transpose()
        }
    }
}

/// Authorities the requester chose to give up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityRevocations {
    #[serde(default)]
    pub freeze: bool,
    #[serde(default)]
    pub mint: bool,
    #[serde(default)]
    pub update: bool,
}

impl AuthorityRevocations {
    pub fn count(&self) -> usize {
        [self.freeze, self.mint, self.update]
            .iter()
            .filter(|b| **b)
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<String>,
}

impl SocialLinks {
    pub fn is_empty(&self) -> bool {
        self.website.is_none()
            && self.twitter.is_none()
            && self.telegram.is_none()
            && self.discord.is_none()
    }
}

/// User-supplied token parameters. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub name: String,
    pub symbol: String,
    /// Initial supply in whole tokens, comma tolerant (`"1,000,000"`)
    pub supply: String,
    pub decimals: u8,
    #[serde(with = "pubkey_serde")]
    pub wallet_address: Pubkey,
    #[serde(default)]
    pub authorities: AuthorityRevocations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_website: Option<String>,
    #[serde(default)]
    pub social_links: SocialLinks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Where the off-chain metadata document is (or will be) hosted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_uri: Option<String>,
}

impl TokenRequest {
    /// Minimal request with no optional features
    pub fn new(
        name: impl Into<String>,
        symbol: impl Into<String>,
        supply: impl Into<String>,
        decimals: u8,
        wallet_address: Pubkey,
    ) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            supply: supply.into(),
            decimals,
            wallet_address,
            authorities: AuthorityRevocations::default(),
            creator_name: None,
            creator_website: None,
            social_links: SocialLinks::default(),
            description: None,
            image: None,
            metadata_uri: None,
        }
    }

    /// Creator metadata is present when a non-blank creator name was given
    pub fn has_creator_metadata(&self) -> bool {
        self.creator_name
            .as_deref()
            .map(|name| !name.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn fee_options(&self) -> FeeOptions {
        FeeOptions {
            revoke_freeze: self.authorities.freeze,
            revoke_mint: self.authorities.mint,
            revoke_update: self.authorities.update,
            creator_metadata: self.has_creator_metadata(),
        }
    }

    pub fn metadata_uri(&self) -> &str {
        self.metadata_uri.as_deref().unwrap_or("")
    }

    /// Validate every field; returns the supply in base units on success.
    pub fn validate(&self) -> LaunchResult<u64> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(LaunchError::invalid("token name is required"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(LaunchError::invalid(format!(
                "token name is {} bytes, maximum is {}",
                name.len(),
                MAX_NAME_LEN
            )));
        }

        let symbol = self.symbol.trim();
        if symbol.is_empty() {
            return Err(LaunchError::invalid("token symbol is required"));
        }
        if symbol.len() > MAX_SYMBOL_LEN {
            return Err(LaunchError::invalid(format!(
                "token symbol is {} bytes, maximum is {}",
                symbol.len(),
                MAX_SYMBOL_LEN
            )));
        }

        if self.metadata_uri().len() > MAX_URI_LEN {
            return Err(LaunchError::invalid(format!(
                "metadata URI is {} bytes, maximum is {}",
                self.metadata_uri().len(),
                MAX_URI_LEN
            )));
        }

        validate_decimals(self.decimals)?;

        if self.wallet_address == Pubkey::default() {
            return Err(LaunchError::invalid("wallet address is required"));
        }

        parse_supply(&self.supply, self.decimals)
    }
}

/// Reject decimal precision outside [0, 9]
pub fn validate_decimals(decimals: u8) -> LaunchResult<()> {
    if decimals > MAX_DECIMALS {
        return Err(LaunchError::invalid(format!(
            "decimals must be between 0 and {}, got {}",
            MAX_DECIMALS, decimals
        )));
    }
    Ok(())
}

/// Parse a human supply string into base units.
///
/// Commas, underscores and surrounding whitespace are stripped. A fractional
/// part may have at most `decimals` digits. The result is
/// `whole * 10^decimals + fraction`, computed with checked arithmetic.
pub fn parse_supply(supply: &str, decimals: u8) -> LaunchResult<u64> {
    validate_decimals(decimals)?;

    let cleaned: String = supply
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect();
    if cleaned.is_empty() {
        return Err(LaunchError::invalid("supply is required"));
    }

    let (whole, fraction) = match cleaned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (cleaned.as_str(), ""),
    };
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(whole) || !all_digits(fraction) || (whole.is_empty() && fraction.is_empty()) {
        return Err(LaunchError::invalid(format!("supply '{}' is not a number", supply)));
    }
    if fraction.len() > decimals as usize {
        return Err(LaunchError::invalid(format!(
            "supply '{}' has more than {} decimal places",
            supply, decimals
        )));
    }

    let overflow = || LaunchError::invalid(format!("supply '{}' is too large", supply));
    let scale = 10u64.pow(decimals as u32);
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u64>().map_err(|_| overflow())?
    };
    let fraction_units = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        padded.parse::<u64>().map_err(|_| overflow())?
    };

    let amount = whole_units
        .checked_mul(scale)
        .and_then(|v| v.checked_add(fraction_units))
        .ok_or_else(overflow)?;

    if amount == 0 {
        return Err(LaunchError::invalid("supply must be greater than zero"));
    }
    Ok(amount)
}

/// Final output of a successful launch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResult {
    #[serde(with = "pubkey_serde")]
    pub token_address: Pubkey,
    #[serde(default, with = "pubkey_serde::option", skip_serializing_if = "Option::is_none")]
    pub metadata_address: Option<Pubkey>,
    #[serde(with = "pubkey_serde")]
    pub token_account: Pubkey,
    pub fee_lamports: u64,
    pub fee_amount: f64,
    pub signatures: Vec<String>,
    pub strategy: crate::plan::PlanStrategy,
    pub request_key: String,
}

/// Caller-facing response shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LaunchResponse {
    #[serde(rename_all = "camelCase")]
    Success {
        success: bool,
        token_address: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata_address: Option<String>,
        fee_amount: f64,
        signatures: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        success: bool,
        error_message: String,
        error_category: String,
    },
}

impl LaunchResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, LaunchResponse::Success { .. })
    }
}

impl From<LaunchResult<TokenResult>> for LaunchResponse {
    fn from(result: LaunchResult<TokenResult>) -> Self {
        match result {
            Ok(r) => LaunchResponse::Success {
                success: true,
                token_address: r.token_address.to_string(),
                metadata_address: r.metadata_address.map(|m| m.to_string()),
                fee_amount: r.fee_amount,
                signatures: r.signatures,
            },
            Err(e) => LaunchResponse::Failure {
                success: false,
                error_message: e.user_message(),
                error_category: e.category().to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TokenRequest {
        TokenRequest::new("Test", "TST", "1000", 9, Pubkey::new_unique())
    }

    #[test]
    fn test_parse_supply_strips_commas() {
        assert_eq!(parse_supply("1,000,000", 0).unwrap(), 1_000_000);
        assert_eq!(parse_supply(" 1_000 ", 2).unwrap(), 100_000);
        assert_eq!(parse_supply("1,000", 9).unwrap(), 1_000_000_000_000);
    }

    #[test]
    fn test_parse_supply_fraction() {
        assert_eq!(parse_supply("1.5", 1).unwrap(), 15);
        assert_eq!(parse_supply("0.000000001", 9).unwrap(), 1);
        assert!(parse_supply("1.55", 1).is_err());
        assert!(parse_supply("1.5", 0).is_err());
    }

    #[test]
    fn test_parse_supply_rejects_garbage() {
        assert!(parse_supply("", 0).is_err());
        assert!(parse_supply("abc", 0).is_err());
        assert!(parse_supply("-5", 0).is_err());
        assert!(parse_supply("0", 0).is_err());
        assert!(parse_supply(".", 0).is_err());
        assert!(parse_supply("1e6", 0).is_err());
    }

    #[test]
    fn test_parse_supply_overflow() {
        assert!(parse_supply("18446744073709551615", 0).is_ok());
        assert!(parse_supply("18446744073709551616", 0).is_err());
        assert!(parse_supply("18446744074", 9).is_err());
    }

    #[test]
    fn test_decimals_range() {
        for d in 0..=9u8 {
            assert!(validate_decimals(d).is_ok());
        }
        assert!(validate_decimals(10).is_err());
        assert!(parse_supply("1", 10).is_err());
    }

    #[test]
    fn test_validate_lengths() {
        let mut r = request();
        assert_eq!(r.validate().unwrap(), 1_000_000_000_000);

        r.name = "x".repeat(33);
        assert!(matches!(r.validate(), Err(LaunchError::InvalidRequest(_))));

        let mut r = request();
        r.symbol = "TOOLONGSYMB".into();
        assert!(r.validate().is_err());

        let mut r = request();
        r.metadata_uri = Some(format!("https://{}", "a".repeat(200)));
        assert!(r.validate().is_err());

        let mut r = request();
        r.name = "   ".into();
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_creator_metadata_flag() {
        let mut r = request();
        assert!(!r.has_creator_metadata());
        r.creator_name = Some("  ".into());
        assert!(!r.has_creator_metadata());
        r.creator_name = Some("Alice".into());
        assert!(r.has_creator_metadata());
        assert!(r.fee_options().creator_metadata);
    }

    #[test]
    fn test_request_json_shape() {
        let wallet = Pubkey::new_unique();
        let json = format!(
            r#"{{"name":"Test","symbol":"TST","supply":"1,000","decimals":6,
                "walletAddress":"{}","authorities":{{"freeze":true}},
                "creatorName":"Alice","socialLinks":{{"website":"https://t.example"}}}}"#,
            wallet
        );
        let r: TokenRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(r.wallet_address, wallet);
        assert!(r.authorities.freeze);
        assert!(!r.authorities.mint);
        assert_eq!(r.social_links.website.as_deref(), Some("https://t.example"));
        assert_eq!(r.validate().unwrap(), 1_000_000_000);
    }

    #[test]
    fn test_failure_response_shape() {
        let response: LaunchResponse = Err(LaunchError::WalletNotConnected).into();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorCategory"], "wallet_not_connected");
        assert!(json["errorMessage"].as_str().unwrap().contains("Connect a wallet"));
    }
}
