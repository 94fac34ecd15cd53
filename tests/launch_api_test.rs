//! Public API integration tests
//!
//! Exercises the crate the way the CLI does, without a network: request
//! parsing, fee and cost arithmetic, plan layout, metadata encoding,
//! checkpoint persistence and launcher construction.

use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::sync::Arc;
use token_launcher::chain::{ChainClient, RpcChainClient};
use token_launcher::checkpoint::{
    request_key, CheckpointStore, LaunchCheckpoint, MemoryCheckpointStore, SledCheckpointStore,
};
use token_launcher::config::StrategyPreference;
use token_launcher::cost::RentTable;
use token_launcher::fees::{calculate_service_fee, FeeSchedule, ServiceFee};
use token_launcher::metadata::{find_metadata_address, metadata_args, CreateMetadataAccountArgsV3};
use token_launcher::plan::{build_plan, LaunchAccounts, PlanOptions, PlanStep, PlanStrategy};
use token_launcher::types::parse_supply;
use token_launcher::wallet::KeypairWallet;
use token_launcher::{Config, LaunchError, LaunchState, TokenLauncher, TokenRequest};

const REQUEST_JSON: &str = r#"{
    "name": "Example Token",
    "symbol": "EXT",
    "supply": "1,000,000",
    "decimals": 6,
    "walletAddress": "WALLET",
    "authorities": { "freeze": true, "mint": true },
    "creatorName": "Example Labs",
    "socialLinks": { "twitter": "https://twitter.com/example" },
    "metadataUri": "https://example.com/ext.json"
}"#;

fn parse_request(wallet: &Pubkey) -> TokenRequest {
    serde_json::from_str(&REQUEST_JSON.replace("WALLET", &wallet.to_string())).unwrap()
}

fn rents() -> RentTable {
    RentTable {
        mint: 1_461_600,
        token_account: 2_039_280,
        metadata: 5_616_720,
    }
}

#[test]
fn test_request_json_to_fee() {
    let wallet = Pubkey::new_unique();
    let request = parse_request(&wallet);

    assert_eq!(request.validate().unwrap(), 1_000_000_000_000);
    assert!(!request.authorities.update);
    assert!(request.has_creator_metadata());

    // Base 0.05 + freeze, mint and creator metadata at 0.1 each
    let fee = calculate_service_fee(&request.fee_options(), &FeeSchedule::default());
    assert_eq!(fee.lamports, 350_000_000);
    assert_eq!(fee.as_sol(), 0.35);
}

#[test]
fn test_supply_parsing_edges() {
    assert_eq!(parse_supply(" 1_000 ", 2).unwrap(), 100_000);
    assert_eq!(parse_supply("0.5", 1).unwrap(), 5);
    assert!(parse_supply("0.55", 1).is_err());
    assert!(parse_supply("", 0).is_err());
    assert!(parse_supply("-1", 0).is_err());
}

#[test]
fn test_plan_from_parsed_request() {
    let wallet = Pubkey::new_unique();
    let request = parse_request(&wallet);
    let supply = request.validate().unwrap();
    let accounts = LaunchAccounts {
        payer: wallet,
        mint: Keypair::new().pubkey(),
        fee_collector: Pubkey::new_unique(),
    };
    let fee = calculate_service_fee(&request.fee_options(), &FeeSchedule::default());
    let key = request_key(&request);

    let mut config = Config::default();
    config.fees.collector = Some(accounts.fee_collector.to_string());
    let options = PlanOptions::from_config(&config);

    let plan = build_plan(&request, supply, &accounts, &rents(), fee, &options, &key).unwrap();
    assert_eq!(plan.strategy, PlanStrategy::Atomic);
    assert_eq!(plan.mint, accounts.mint);
    assert_eq!(plan.metadata, Some(find_metadata_address(&accounts.mint)));
    assert_eq!(plan.supply, 1_000_000_000_000);
    assert!(plan.batches[0].contains(PlanStep::RevokeMintAuthority));
    assert!(plan.batches[0].idempotency_key.starts_with(&key));

    config.submission.strategy = StrategyPreference::Saga;
    let saga = build_plan(
        &request,
        supply,
        &accounts,
        &rents(),
        fee,
        &PlanOptions::from_config(&config),
        &key,
    )
    .unwrap();
    assert_eq!(saga.strategy, PlanStrategy::Saga);
    assert!(saga.transaction_count() > 1);
    assert_eq!(saga.flattened().len(), plan.flattened().len());
}

#[test]
fn test_metadata_reflects_request() {
    let wallet = Pubkey::new_unique();
    let request = parse_request(&wallet);

    let args = metadata_args(&request);
    assert_eq!(args.data.name, "Example Token");
    assert_eq!(args.data.uri, "https://example.com/ext.json");
    assert!(args.is_mutable);
    let creators = args.data.creators.as_ref().unwrap();
    assert_eq!(creators[0].address, wallet.to_bytes());

    let decoded =
        CreateMetadataAccountArgsV3::from_instruction_data(&args.to_instruction_data().unwrap())
            .unwrap();
    assert_eq!(decoded, args);
}

#[test]
fn test_sled_checkpoint_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let request = parse_request(&Pubkey::new_unique());
    let key = request_key(&request);
    let mint = Keypair::new();

    {
        let store = SledCheckpointStore::open(dir.path().join("checkpoints")).unwrap();
        let checkpoint = LaunchCheckpoint::new(key.clone(), &mint, PlanStrategy::Saga, 5);
        store.save(&checkpoint).unwrap();
    }

    let store = SledCheckpointStore::open(dir.path().join("checkpoints")).unwrap();
    let loaded = store.load(&key).unwrap().unwrap();
    assert_eq!(loaded.mint, mint.pubkey());
    assert_eq!(loaded.state, LaunchState::BalanceChecked);
    assert_eq!(
        loaded.mint_keypair().unwrap().unwrap().pubkey(),
        mint.pubkey()
    );

    store.remove(&key).unwrap();
    assert!(store.load(&key).unwrap().is_none());
}

#[test]
fn test_launcher_requires_fee_collector() {
    let config = Config::default();
    let chain: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(&config.rpc));
    let wallet = Arc::new(KeypairWallet::from_keypair(Keypair::new()));
    let store = Arc::new(MemoryCheckpointStore::new());

    let err = TokenLauncher::new(config, chain, wallet, store).unwrap_err();
    assert!(matches!(err, LaunchError::Configuration(_)));
}

#[test]
fn test_service_fee_serializes_as_lamports() {
    let json = serde_json::to_string(&ServiceFee { lamports: 50_000_000 }).unwrap();
    assert_eq!(json, r#"{"lamports":50000000}"#);
}
