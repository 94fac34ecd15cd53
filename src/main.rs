//! Token Launcher CLI
//!
//! `token-launcher estimate ...` prints the itemized cost of a launch and
//! whether the wallet can cover it. `token-launcher launch ...` runs it.
//! `token-launcher metadata ...` prints the off-chain metadata document to
//! host behind the metadata URI. `token-launcher checkpoints` lists launches
//! that stopped part way; rerunning the same `launch` resumes them.

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::sync::Arc;
use token_launcher::chain::{ChainClient, RpcChainClient};
use token_launcher::checkpoint::{
    CheckpointStore, LaunchCheckpoint, MemoryCheckpointStore, SledCheckpointStore,
};
use token_launcher::fees::lamports_to_sol;
use token_launcher::metadata::offchain_document;
use token_launcher::types::{AuthorityRevocations, SocialLinks};
use token_launcher::wallet::KeypairWallet;
use token_launcher::{Config, LaunchEstimate, LaunchResponse, TokenLauncher, TokenRequest};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the token
    Launch(RequestArgs),
    /// Show the itemized cost without submitting anything
    Estimate(RequestArgs),
    /// Print the off-chain metadata JSON document
    Metadata(RequestArgs),
    /// List launches that stopped part way and can be resumed
    Checkpoints,
}

#[derive(ClapArgs, Debug)]
struct RequestArgs {
    /// Read the whole request from a JSON file instead of flags
    #[arg(long, conflicts_with_all = ["name", "symbol", "supply"])]
    request: Option<String>,

    #[arg(long, required_unless_present = "request")]
    name: Option<String>,

    #[arg(long, required_unless_present = "request")]
    symbol: Option<String>,

    /// Initial supply in whole tokens, e.g. "1,000,000"
    #[arg(long, required_unless_present = "request")]
    supply: Option<String>,

    #[arg(long, default_value_t = 9)]
    decimals: u8,

    #[arg(long)]
    revoke_freeze: bool,

    #[arg(long)]
    revoke_mint: bool,

    #[arg(long)]
    revoke_update: bool,

    #[arg(long)]
    creator_name: Option<String>,

    #[arg(long)]
    creator_website: Option<String>,

    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    image: Option<String>,

    #[arg(long)]
    metadata_uri: Option<String>,

    #[arg(long)]
    website: Option<String>,

    #[arg(long)]
    twitter: Option<String>,

    #[arg(long)]
    telegram: Option<String>,

    #[arg(long)]
    discord: Option<String>,

    /// Do not create a metadata account
    #[arg(long)]
    no_metadata: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;
    init_logging(args.verbose, config.monitoring.json_logs)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Token launcher starting");

    match &args.command {
        Command::Checkpoints => {
            let checkpoints = open_checkpoints(&config)?.list()?;
            if args.json {
                let summaries: Vec<_> = checkpoints.iter().map(checkpoint_summary).collect();
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                print_checkpoints(&checkpoints);
            }
            Ok(())
        }
        Command::Metadata(request_args) => {
            let wallet = load_wallet(&config)?;
            let request = build_request(request_args, &wallet)?;
            println!("{}", serde_json::to_string_pretty(&offchain_document(&request))?);
            Ok(())
        }
        Command::Estimate(request_args) => {
            let wallet = load_wallet(&config)?;
            let request = build_request(request_args, &wallet)?;
            let launcher = build_launcher(config, wallet, request_args.no_metadata)?;
            let estimate = launcher.estimate(&request).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&estimate)?);
            } else {
                print_estimate(&estimate);
            }
            Ok(())
        }
        Command::Launch(request_args) => {
            let wallet = load_wallet(&config)?;
            let request = build_request(request_args, &wallet)?;
            let print_metrics = config.monitoring.enable_metrics && args.verbose;
            let launcher = build_launcher(config, wallet, request_args.no_metadata)?;
            let response = launcher.launch_response(&request).await;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
            if print_metrics {
                eprintln!("{}", launcher.metrics().encode_text()?);
            }
            if !response.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_filter = if verbose {
        "token_launcher=debug,info"
    } else {
        "token_launcher=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .context("Failed to initialize logging")?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .context("Failed to initialize logging")?;
    }
    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path).with_context(|| format!("Failed to load config from {}", path))
    } else {
        dotenvy::dotenv().ok();
        let mut config = Config::default();
        config.apply_env(&std::env::vars().collect());
        Ok(config)
    }
}

fn load_wallet(config: &Config) -> Result<KeypairWallet> {
    let path = config
        .wallet
        .keypair_path
        .as_deref()
        .context("No keypair configured; set wallet.keypair_path or TOKEN_LAUNCHER_KEYPAIR")?;
    KeypairWallet::from_file(path).context("Failed to load wallet")
}

fn open_checkpoints(config: &Config) -> Result<Arc<dyn CheckpointStore>> {
    Ok(match &config.checkpoint.path {
        Some(path) => Arc::new(SledCheckpointStore::open(path)?),
        None => {
            warn!("No checkpoint path configured; an interrupted launch cannot be resumed after exit");
            Arc::new(MemoryCheckpointStore::new())
        }
    })
}

fn build_launcher(config: Config, wallet: KeypairWallet, no_metadata: bool) -> Result<TokenLauncher> {
    let chain: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(&config.rpc));
    let checkpoints = open_checkpoints(&config)?;
    info!(endpoint = %config.rpc.effective_endpoint(), wallet = %wallet.address(), "Launcher ready");
    let launcher = TokenLauncher::new(config, chain, Arc::new(wallet), checkpoints)?;
    Ok(launcher.with_metadata(!no_metadata))
}

fn build_request(args: &RequestArgs, wallet: &KeypairWallet) -> Result<TokenRequest> {
    if let Some(path) = &args.request {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {}", path))?;
        let request: TokenRequest =
            serde_json::from_str(&raw).context("Failed to parse request JSON")?;
        if request.wallet_address != wallet.address() {
            warn!(
                requested = %request.wallet_address,
                wallet = %wallet.address(),
                "Request names a different wallet than the configured keypair"
            );
        }
        return Ok(request);
    }

    let mut request = TokenRequest::new(
        args.name.clone().unwrap_or_default(),
        args.symbol.clone().unwrap_or_default(),
        args.supply.clone().unwrap_or_default(),
        args.decimals,
        wallet.address(),
    );
    request.authorities = AuthorityRevocations {
        freeze: args.revoke_freeze,
        mint: args.revoke_mint,
        update: args.revoke_update,
    };
    request.creator_name = args.creator_name.clone();
    request.creator_website = args.creator_website.clone();
    request.description = args.description.clone();
    request.image = args.image.clone();
    request.metadata_uri = args.metadata_uri.clone();
    request.social_links = SocialLinks {
        website: args.website.clone(),
        twitter: args.twitter.clone(),
        telegram: args.telegram.clone(),
        discord: args.discord.clone(),
    };
    Ok(request)
}

fn print_estimate(estimate: &LaunchEstimate) {
    println!("Launch cost ({:?}, {} transaction(s))", estimate.strategy, estimate.transaction_count);
    for (label, lamports) in estimate.breakdown.components() {
        println!("  {:<24} {:>14.9} SOL", label, lamports_to_sol(lamports));
    }
    println!("  {:<24} {:>14.9} SOL", "total", lamports_to_sol(estimate.total_lamports));
    println!("  {:<24} {:>14.9} SOL", "wallet balance", lamports_to_sol(estimate.balance));
    if !estimate.sufficient {
        println!("Balance is insufficient for this launch");
    }
}

/// Checkpoint fields safe to print; the mint secret is left out
fn checkpoint_summary(cp: &LaunchCheckpoint) -> serde_json::Value {
    serde_json::json!({
        "requestKey": cp.request_key,
        "mint": cp.mint.to_string(),
        "strategy": cp.strategy,
        "state": cp.state,
        "completed": cp.completed.len(),
        "batches": cp.batch_count,
        "pendingSignature": cp.pending.as_ref().map(|p| p.signature.clone()),
        "updatedAt": cp.updated_at,
    })
}

fn print_checkpoints(checkpoints: &[LaunchCheckpoint]) {
    if checkpoints.is_empty() {
        println!("No interrupted launches");
        return;
    }
    for cp in checkpoints {
        println!(
            "{}  mint {}  {}/{} batches  {}",
            cp.request_key,
            cp.mint,
            cp.completed.len(),
            cp.batch_count,
            cp.state
        );
        if let Some(pending) = &cp.pending {
            println!("    in flight: {} (valid through block {})", pending.signature, pending.last_valid_block_height);
        }
    }
}

fn print_response(response: &LaunchResponse) {
    match response {
        LaunchResponse::Success {
            token_address,
            metadata_address,
            fee_amount,
            signatures,
            ..
        } => {
            println!("Token created: {}", token_address);
            if let Some(metadata) = metadata_address {
                println!("Metadata:      {}", metadata);
            }
            println!("Service fee:   {} SOL", fee_amount);
            for signature in signatures {
                println!("Signature:     {}", signature);
            }
        }
        LaunchResponse::Failure { error_message, .. } => {
            eprintln!("Launch failed: {}", error_message);
        }
    }
}
