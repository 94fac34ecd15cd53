//! Resumable launch checkpoints
//!
//! A checkpoint records how far a launch got: which batches are confirmed,
//! which signature is in flight, and the mint keypair until the mint account
//! exists. Retrying the same request resumes from the checkpoint instead of
//! starting over, so the service fee is never charged twice.
//!
//! Checkpoints are keyed by the request key, a SHA-256 over the normalized
//! request.

use crate::errors::{LaunchError, LaunchResult};
use crate::launcher::LaunchState;
use crate::plan::{PlanBatch, PlanStrategy};
use crate::submit::Broadcast;
use crate::types::{pubkey_serde, TokenRequest};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_sdk::{pubkey::Pubkey, signature::Keypair};
use std::fmt;
use std::path::Path;
use tracing::debug;
use zeroize::Zeroize;

/// Stable key of a request: hex SHA-256 over its normalized JSON form
pub fn request_key(request: &TokenRequest) -> String {
    let mut normalized = request.clone();
    normalized.name = normalized.name.trim().to_string();
    normalized.symbol = normalized.symbol.trim().to_string();
    normalized.supply = normalized
        .supply
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '_')
        .collect();
    normalized.creator_name = normalized
        .creator_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let mut hasher = Sha256::new();
    // Serializing a plain struct into memory cannot fail
    hasher.update(serde_json::to_vec(&normalized).unwrap_or_default());
    hex::encode(hasher.finalize())
}

/// A batch that reached confirmation (or was skipped)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedBatch {
    pub index: usize,
    pub idempotency_key: String,
    /// `None` when the batch was skipped because its effect already existed
    pub signature: Option<String>,
}

/// Broadcast but not yet confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSignature {
    pub batch: usize,
    pub signature: String,
    pub blockhash: String,
    /// Once the chain is past this height the transaction can no longer land
    pub last_valid_block_height: u64,
}

impl PendingSignature {
    pub fn is_expired(&self, block_height: u64) -> bool {
        block_height > self.last_valid_block_height
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LaunchCheckpoint {
    pub request_key: String,
    #[serde(with = "pubkey_serde")]
    pub mint: Pubkey,
    /// Base58 mint secret; present only until the mint account is created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mint_secret: Option<String>,
    pub strategy: PlanStrategy,
    pub batch_count: usize,
    /// Confirmed batches, in batch order
    pub completed: Vec<CompletedBatch>,
    #[serde(default)]
    pub pending: Option<PendingSignature>,
    pub state: LaunchState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for LaunchCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchCheckpoint")
            .field("request_key", &self.request_key)
            .field("mint", &self.mint)
            .field("holds_mint_secret", &self.mint_secret.is_some())
            .field("strategy", &self.strategy)
            .field("completed", &self.completed)
            .field("pending", &self.pending)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for LaunchCheckpoint {
    fn drop(&mut self) {
        self.mint_secret.zeroize();
    }
}

impl LaunchCheckpoint {
    pub fn new(
        request_key: String,
        mint: &Keypair,
        strategy: PlanStrategy,
        batch_count: usize,
    ) -> Self {
        let now = Utc::now();
        let mut secret = mint.to_bytes();
        let encoded = bs58::encode(&secret).into_string();
        secret.zeroize();
        Self {
            request_key,
            mint: solana_sdk::signer::Signer::pubkey(mint),
            mint_secret: Some(encoded),
            strategy,
            batch_count,
            completed: Vec::new(),
            pending: None,
            state: LaunchState::BalanceChecked,
            created_at: now,
            updated_at: now,
        }
    }

    /// Restore the mint keypair, if it is still held
    pub fn mint_keypair(&self) -> LaunchResult<Option<Keypair>> {
        let Some(encoded) = &self.mint_secret else {
            return Ok(None);
        };
        let mut bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| LaunchError::Checkpoint(format!("mint secret is corrupt: {}", e)))?;
        let keypair = Keypair::try_from(bytes.as_slice())
            .map_err(|e| LaunchError::Checkpoint(format!("mint secret is invalid: {}", e)));
        bytes.zeroize();
        keypair.map(Some)
    }

    pub fn holds_mint_secret(&self) -> bool {
        self.mint_secret.is_some()
    }

    /// Wipe the mint secret; called once the mint account exists
    pub fn forget_mint_secret(&mut self) {
        self.mint_secret.zeroize();
        self.mint_secret = None;
    }

    /// A batch counts as completed only if its idempotency key matches
    pub fn is_completed(&self, batch: &PlanBatch) -> bool {
        self.completed
            .iter()
            .any(|c| c.index == batch.index && c.idempotency_key == batch.idempotency_key)
    }

    /// Fails when a recorded batch no longer matches the rebuilt plan
    pub fn verify_against(&self, batches: &[PlanBatch]) -> LaunchResult<()> {
        if batches.len() != self.batch_count {
            return Err(LaunchError::Checkpoint(format!(
                "checkpoint expects {} batches, rebuilt plan has {}",
                self.batch_count,
                batches.len()
            )));
        }
        for done in &self.completed {
            let matches = batches
                .get(done.index)
                .map(|b| b.idempotency_key == done.idempotency_key)
                .unwrap_or(false);
            if !matches {
                return Err(LaunchError::Checkpoint(format!(
                    "completed batch '{}' is not part of the rebuilt plan",
                    done.idempotency_key
                )));
            }
        }
        Ok(())
    }

    pub fn record_pending(&mut self, batch: usize, broadcast: &Broadcast) {
        self.pending = Some(PendingSignature {
            batch,
            signature: broadcast.signature.to_string(),
            blockhash: broadcast.blockhash.to_string(),
            last_valid_block_height: broadcast.last_valid_block_height,
        });
        self.updated_at = Utc::now();
    }

    /// Mark a batch confirmed. `signature` is `None` for skipped batches.
    pub fn record_completed(&mut self, batch: &PlanBatch, signature: Option<String>) {
        if !self.is_completed(batch) {
            self.completed.push(CompletedBatch {
                index: batch.index,
                idempotency_key: batch.idempotency_key.clone(),
                signature,
            });
            self.completed.sort_by_key(|c| c.index);
        }
        if self.pending.as_ref().map(|p| p.batch) == Some(batch.index) {
            self.pending = None;
        }
        self.updated_at = Utc::now();
    }

    /// Confirmed signatures in batch order
    pub fn signatures(&self) -> Vec<String> {
        self.completed
            .iter()
            .filter_map(|c| c.signature.clone())
            .collect()
    }

    pub fn all_completed(&self) -> bool {
        (0..self.batch_count).all(|i| self.completed.iter().any(|c| c.index == i))
    }
}

/// Persistence for checkpoints
pub trait CheckpointStore: Send + Sync + fmt::Debug {
    fn load(&self, request_key: &str) -> LaunchResult<Option<LaunchCheckpoint>>;
    fn save(&self, checkpoint: &LaunchCheckpoint) -> LaunchResult<()>;
    fn remove(&self, request_key: &str) -> LaunchResult<()>;
    fn list(&self) -> LaunchResult<Vec<LaunchCheckpoint>>;
}

/// In-process store; checkpoints do not survive a restart
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: DashMap<String, LaunchCheckpoint>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, request_key: &str) -> LaunchResult<Option<LaunchCheckpoint>> {
        Ok(self.entries.get(request_key).map(|e| e.value().clone()))
    }

    fn save(&self, checkpoint: &LaunchCheckpoint) -> LaunchResult<()> {
        self.entries
            .insert(checkpoint.request_key.clone(), checkpoint.clone());
        Ok(())
    }

    fn remove(&self, request_key: &str) -> LaunchResult<()> {
        self.entries.remove(request_key);
        Ok(())
    }

    fn list(&self) -> LaunchResult<Vec<LaunchCheckpoint>> {
        Ok(self.entries.iter().map(|e| e.value().clone()).collect())
    }
}

/// On-disk store backed by sled; values are JSON
pub struct SledCheckpointStore {
    db: sled::Db,
}

impl fmt::Debug for SledCheckpointStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SledCheckpointStore")
            .field("entries", &self.db.len())
            .finish()
    }
}

fn store_err(op: &str, e: impl fmt::Display) -> LaunchError {
    LaunchError::Checkpoint(format!("{}: {}", op, e))
}

impl SledCheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> LaunchResult<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .map_err(|e| store_err(&format!("open {}", path.display()), e))?;
        debug!(path = %path.display(), "Checkpoint store opened");
        Ok(Self { db })
    }
}

impl CheckpointStore for SledCheckpointStore {
    fn load(&self, request_key: &str) -> LaunchResult<Option<LaunchCheckpoint>> {
        let Some(raw) = self.db.get(request_key).map_err(|e| store_err("load", e))? else {
            return Ok(None);
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| store_err("decode", e))
    }

    fn save(&self, checkpoint: &LaunchCheckpoint) -> LaunchResult<()> {
        let mut raw = serde_json::to_vec(checkpoint).map_err(|e| store_err("encode", e))?;
        let result = self.db.insert(checkpoint.request_key.as_bytes(), raw.as_slice());
        raw.zeroize();
        result.map_err(|e| store_err("save", e))?;
        self.db.flush().map_err(|e| store_err("flush", e))?;
        Ok(())
    }

    fn remove(&self, request_key: &str) -> LaunchResult<()> {
        self.db.remove(request_key).map_err(|e| store_err("remove", e))?;
        self.db.flush().map_err(|e| store_err("flush", e))?;
        Ok(())
    }

    fn list(&self) -> LaunchResult<Vec<LaunchCheckpoint>> {
        self.db
            .iter()
            .values()
            .map(|raw| {
                let raw = raw.map_err(|e| store_err("scan", e))?;
                serde_json::from_slice(&raw).map_err(|e| store_err("decode", e))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{hash::Hash, signature::Signature, signer::Signer};

    fn broadcast(last_valid_block_height: u64) -> Broadcast {
        Broadcast {
            signature: Signature::new_unique(),
            blockhash: Hash::new_unique(),
            last_valid_block_height,
        }
    }

    fn request() -> TokenRequest {
        TokenRequest::new("Test", "TST", "1,000", 6, Pubkey::new_unique())
    }

    #[test]
    fn test_request_key_normalizes_formatting() {
        let a = request();
        let mut b = a.clone();
        b.name = "  Test ".into();
        b.supply = "1000".into();
        assert_eq!(request_key(&a), request_key(&b));

        let mut c = a.clone();
        c.decimals = 9;
        assert_ne!(request_key(&a), request_key(&c));
        assert_eq!(request_key(&a).len(), 64);
    }

    #[test]
    fn test_mint_secret_round_trip_and_forget() {
        let mint = Keypair::new();
        let mut cp = LaunchCheckpoint::new("k".into(), &mint, PlanStrategy::Saga, 3);
        let restored = cp.mint_keypair().unwrap().unwrap();
        assert_eq!(restored.pubkey(), mint.pubkey());

        cp.forget_mint_secret();
        assert!(!cp.holds_mint_secret());
        assert!(cp.mint_keypair().unwrap().is_none());
        let json = serde_json::to_string(&cp).unwrap();
        assert!(!json.contains("mint_secret"));
    }

    fn batch(index: usize, key: &str) -> PlanBatch {
        PlanBatch {
            index,
            groups: Vec::new(),
            idempotency_key: key.to_string(),
        }
    }

    #[test]
    fn test_progress_tracking() {
        let mut cp = LaunchCheckpoint::new("k".into(), &Keypair::new(), PlanStrategy::Saga, 2);
        let (b0, b1) = (batch(0, "k:0:fee_transfer"), batch(1, "k:1:create_mint_account"));
        let sent = broadcast(1_150);
        cp.record_pending(0, &sent);
        let pending = cp.pending.clone().unwrap();
        assert_eq!(pending.signature, sent.signature.to_string());
        assert_eq!(pending.blockhash, sent.blockhash.to_string());
        assert!(!pending.is_expired(1_150));
        assert!(pending.is_expired(1_151));
        cp.record_completed(&b0, Some("sig0".into()));
        assert!(cp.pending.is_none());
        assert!(cp.is_completed(&b0));
        assert!(!cp.is_completed(&batch(0, "other")));
        assert!(!cp.all_completed());
        cp.record_completed(&b1, None);
        assert!(cp.all_completed());
        assert_eq!(cp.signatures(), vec!["sig0".to_string()]);
    }

    #[test]
    fn test_verify_against_rebuilt_plan() {
        let mut cp = LaunchCheckpoint::new("k".into(), &Keypair::new(), PlanStrategy::Saga, 2);
        let plan = vec![batch(0, "k:0:a"), batch(1, "k:1:b")];
        cp.record_completed(&plan[0], Some("s".into()));
        assert!(cp.verify_against(&plan).is_ok());

        let changed = vec![batch(0, "k:0:x"), batch(1, "k:1:b")];
        assert!(matches!(
            cp.verify_against(&changed),
            Err(LaunchError::Checkpoint(_))
        ));
        assert!(cp.verify_against(&plan[..1]).is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCheckpointStore::new();
        let cp = LaunchCheckpoint::new("k".into(), &Keypair::new(), PlanStrategy::Atomic, 1);
        store.save(&cp).unwrap();
        assert_eq!(store.load("k").unwrap().unwrap().mint, cp.mint);
        assert_eq!(store.list().unwrap().len(), 1);
        store.remove("k").unwrap();
        assert!(store.load("k").unwrap().is_none());
    }

    #[test]
    fn test_sled_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mint = Keypair::new();
        {
            let store = SledCheckpointStore::open(dir.path()).unwrap();
            let mut cp = LaunchCheckpoint::new("k".into(), &mint, PlanStrategy::Saga, 5);
            cp.record_completed(&batch(0, "k:0:fee_transfer"), Some("sig".into()));
            store.save(&cp).unwrap();
        }
        let store = SledCheckpointStore::open(dir.path()).unwrap();
        let cp = store.load("k").unwrap().unwrap();
        assert_eq!(cp.completed[0].idempotency_key, "k:0:fee_transfer");
        assert_eq!(cp.mint_keypair().unwrap().unwrap().pubkey(), mint.pubkey());
        store.remove("k").unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
