// action-ledger-rs/src/ledger.rs
// Append-only, encrypted checkpoint ledger.
//
// File layout: a sequence of `u32 little-endian length + bincode(LedgerFileEntry)`.
// Each entry's `hash_chain` is SHA-256(previous hash || ciphertext), starting
// from the zero hash, so any edit inside the file is detected when the chain
// is replayed. A short final frame is a write torn by a crash: it is cut off
// on open and every complete entry before it is kept.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared_types::{HistoryEntry, RequestRecord};

use crate::{MemoryStore, StoreError};

const LEDGER_FILE: &str = "checkpoints.ledger";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum LedgerEventKind {
    Checkpoint,
    History,
}

/// Plaintext of one entry. The payload is JSON because records carry
/// free-form metadata that bincode cannot describe.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerEvent {
    kind: LedgerEventKind,
    request_id: String,
    payload: String,
    created_at: DateTime<Utc>,
}

/// On-disk representation of a single encrypted entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerFileEntry {
    hash_chain: [u8; 32],
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
}

/// Ledger configuration derived from storage settings and environment.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub path: PathBuf,
    /// Raw 32-byte encryption key.
    pub key: [u8; 32],
}

impl LedgerConfig {
    /// Ledger file inside `directory`; key from `ORCHESTRATOR_LEDGER_KEY` (64 hex chars).
    pub fn for_directory(directory: impl AsRef<Path>) -> Self {
        let key = match config_rs::env_string("ORCHESTRATOR_LEDGER_KEY") {
            Some(hex) => decode_hex_32(&hex).unwrap_or_else(|e| {
                tracing::warn!("Invalid ORCHESTRATOR_LEDGER_KEY: {}; using insecure dev key", e);
                insecure_dev_key()
            }),
            None => {
                tracing::warn!("ORCHESTRATOR_LEDGER_KEY not set; using insecure dev key");
                insecure_dev_key()
            }
        };

        Self {
            path: directory.as_ref().join(LEDGER_FILE),
            key,
        }
    }
}

struct LedgerFile {
    path: PathBuf,
    cipher: Aes256Gcm,
    /// Last hash in the chain (or all zeros for an empty file).
    last_hash: Mutex<[u8; 32]>,
}

impl LedgerFile {
    fn append(&self, event: &LedgerEvent) -> Result<(), StoreError> {
        let plaintext = bincode::serialize(event)?;

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|e| StoreError::Crypto(format!("encrypt failed: {e}")))?;

        // Holding the lock across the write keeps file order and chain order identical
        let mut last = self.last_hash.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let hash = chain_hash(&last, &ciphertext);

        let encoded = bincode::serialize(&LedgerFileEntry {
            hash_chain: hash,
            nonce: nonce_bytes,
            ciphertext,
        })?;

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&(encoded.len() as u32).to_le_bytes())?;
        file.write_all(&encoded)?;
        file.sync_data()?;

        *last = hash;
        Ok(())
    }

    /// Replays the whole file, verifying the chain and decrypting every entry
    fn replay(&self) -> Result<Vec<LedgerEvent>, StoreError> {
        Ok(read_ledger(&self.path, &self.cipher)?.events)
    }
}

/// Durable store backed by the encrypted ledger file
#[derive(Clone)]
pub struct FileLedgerStore {
    inner: Arc<LedgerFile>,
}

impl FileLedgerStore {
    /// Opens (or creates) the ledger, verifying the existing chain.
    pub fn open(config: LedgerConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&config.key));
        let scan = read_ledger(&config.path, &cipher)?;
        if let Some(torn) = scan.torn_bytes {
            tracing::warn!(
                path = %config.path.display(),
                torn_bytes = torn,
                intact_len = scan.intact_len,
                "Ledger ends in an incomplete entry; truncating to the last complete one"
            );
            OpenOptions::new().write(true).open(&config.path)?.set_len(scan.intact_len)?;
        }
        tracing::info!(path = %config.path.display(), entries = scan.events.len(), "Checkpoint ledger opened");

        Ok(Self {
            inner: Arc::new(LedgerFile {
                path: config.path,
                cipher,
                last_hash: Mutex::new(scan.last_hash),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// History stored for `request_id`, ordered and de-duplicated by sequence number
    pub async fn history(&self, request_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let events = self.replay().await?;
        let mut by_sequence = BTreeMap::new();
        for event in events
            .into_iter()
            .filter(|e| e.kind == LedgerEventKind::History && e.request_id == request_id)
        {
            let entries: Vec<HistoryEntry> = serde_json::from_str(&event.payload)?;
            for entry in entries {
                by_sequence.entry(entry.sequence_no).or_insert(entry);
            }
        }
        Ok(by_sequence.into_values().collect())
    }

    /// Re-reads the file and checks the hash chain end to end
    pub async fn verify(&self) -> Result<usize, StoreError> {
        Ok(self.replay().await?.len())
    }

    async fn append(&self, event: LedgerEvent) -> Result<(), StoreError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.append(&event))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    async fn replay(&self) -> Result<Vec<LedgerEvent>, StoreError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.replay())
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

#[async_trait]
impl MemoryStore for FileLedgerStore {
    async fn save_checkpoint(&self, record: &RequestRecord) -> Result<(), StoreError> {
        self.append(LedgerEvent {
            kind: LedgerEventKind::Checkpoint,
            request_id: record.request_id().to_string(),
            payload: serde_json::to_string(record)?,
            created_at: Utc::now(),
        })
        .await
    }

    async fn load_latest(&self, request_id: &str) -> Result<RequestRecord, StoreError> {
        let events = self.replay().await?;
        let latest = events
            .iter()
            .rev()
            .find(|e| e.kind == LedgerEventKind::Checkpoint && e.request_id == request_id)
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        Ok(serde_json::from_str(&latest.payload)?)
    }

    async fn append_history_entries(&self, request_id: &str, entries: &[HistoryEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.append(LedgerEvent {
            kind: LedgerEventKind::History,
            request_id: request_id.to_string(),
            payload: serde_json::to_string(entries)?,
            created_at: Utc::now(),
        })
        .await
    }
}

// --- helpers ---------------------------------------------------------------

fn chain_hash(previous: &[u8; 32], ciphertext: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(previous);
    hasher.update(ciphertext);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn insecure_dev_key() -> [u8; 32] {
    [0x42; 32]
}

fn decode_hex_32(s: &str) -> Result<[u8; 32], StoreError> {
    let s = s.trim();
    if s.len() != 64 || !s.is_ascii() {
        return Err(StoreError::Crypto(format!("expected 64 hex characters, got {}", s.len())));
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
            .map_err(|e| StoreError::Crypto(format!("invalid hex in key: {e}")))?;
    }
    Ok(out)
}

struct LedgerScan {
    events: Vec<LedgerEvent>,
    last_hash: [u8; 32],
    /// Byte length covered by complete entries
    intact_len: u64,
    /// Length of an incomplete trailing frame, if any
    torn_bytes: Option<usize>,
}

/// Decodes every entry, checking chain continuity and decryptability.
/// A missing file is an empty ledger. A frame that runs past the end of
/// the file stops the scan instead of failing it.
fn read_ledger(path: &Path, cipher: &Aes256Gcm) -> Result<LedgerScan, StoreError> {
    let mut scan = LedgerScan {
        events: Vec::new(),
        last_hash: [0u8; 32],
        intact_len: 0,
        torn_bytes: None,
    };
    if !path.exists() {
        return Ok(scan);
    }

    let mut buf = Vec::new();
    OpenOptions::new().read(true).open(path)?.read_to_end(&mut buf)?;

    let mut cursor = 0usize;
    while cursor < buf.len() {
        let frame_start = cursor;
        let Some(len_bytes) = buf.get(cursor..cursor + 4) else {
            scan.torn_bytes = Some(buf.len() - frame_start);
            break;
        };
        let mut len_arr = [0u8; 4];
        len_arr.copy_from_slice(len_bytes);
        let len = u32::from_le_bytes(len_arr) as usize;
        cursor += 4;

        let Some(slice) = buf.get(cursor..cursor + len) else {
            scan.torn_bytes = Some(buf.len() - frame_start);
            break;
        };
        cursor += len;

        let entry: LedgerFileEntry = bincode::deserialize(slice)?;
        if entry.hash_chain != chain_hash(&scan.last_hash, &entry.ciphertext) {
            return Err(StoreError::Integrity("hash chain mismatch; possible tampering".to_string()));
        }

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&entry.nonce), entry.ciphertext.as_ref())
            .map_err(|e| StoreError::Crypto(format!("decrypt failed: {e}")))?;
        scan.events.push(bincode::deserialize(&plaintext)?);

        scan.last_hash = entry.hash_chain;
        scan.intact_len = cursor as u64;
    }

    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{HistoryRole, StageId};

    fn config(dir: &Path) -> LedgerConfig {
        LedgerConfig {
            path: dir.join(LEDGER_FILE),
            key: [7u8; 32],
        }
    }

    fn sample_record() -> RequestRecord {
        let stage = StageId::from("receptionist");
        let mut record = RequestRecord::new("password reset loop", stage.clone());
        record.append_history(&stage, HistoryRole::Stage, "Welcome!").unwrap();
        record.insert_metadata("channel", serde_json::json!("email")).unwrap();
        record
    }

    #[tokio::test]
    async fn checkpoints_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = sample_record();
        {
            let store = FileLedgerStore::open(config(dir.path())).unwrap();
            store.save_checkpoint(&record).await.unwrap();
            record.insert_metadata("attempt", serde_json::json!(2)).unwrap();
            store.save_checkpoint(&record).await.unwrap();
            store
                .append_history_entries(record.request_id(), record.history())
                .await
                .unwrap();
        }

        let reopened = FileLedgerStore::open(config(dir.path())).unwrap();
        assert_eq!(reopened.verify().await.unwrap(), 3);
        let loaded = reopened.load_latest(record.request_id()).await.unwrap();
        assert_eq!(loaded, record);
        assert_eq!(reopened.history(record.request_id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tampering_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::open(config(dir.path())).unwrap();
        store.save_checkpoint(&sample_record()).await.unwrap();
        store.save_checkpoint(&sample_record()).await.unwrap();

        let mut bytes = std::fs::read(store.path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(store.path(), bytes).unwrap();

        assert!(matches!(
            FileLedgerStore::open(config(dir.path())),
            Err(StoreError::Integrity(_)) | Err(StoreError::Crypto(_)) | Err(StoreError::Serde(_))
        ));
    }

    #[tokio::test]
    async fn torn_final_entry_is_cut_off_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let record = sample_record();
        let intact_len = {
            let store = FileLedgerStore::open(config(dir.path())).unwrap();
            store.save_checkpoint(&record).await.unwrap();
            let intact_len = std::fs::metadata(store.path()).unwrap().len();
            store.save_checkpoint(&record).await.unwrap();
            intact_len
        };

        // Crash halfway through the second entry
        let path = config(dir.path()).path;
        let full_len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(intact_len + (full_len - intact_len) / 2).unwrap();
        drop(file);

        let reopened = FileLedgerStore::open(config(dir.path())).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact_len);
        assert_eq!(reopened.verify().await.unwrap(), 1);
        assert_eq!(reopened.load_latest(record.request_id()).await.unwrap(), record);

        // The chain continues from the last complete entry
        reopened.save_checkpoint(&record).await.unwrap();
        let again = FileLedgerStore::open(config(dir.path())).unwrap();
        assert_eq!(again.verify().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn wrong_key_cannot_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::open(config(dir.path())).unwrap();
        store.save_checkpoint(&sample_record()).await.unwrap();

        let mut other = config(dir.path());
        other.key = [9u8; 32];
        assert!(matches!(FileLedgerStore::open(other), Err(StoreError::Crypto(_))));
    }

    #[test]
    fn hex_keys_decode() {
        let hex = "00".repeat(31) + "ff";
        assert_eq!(decode_hex_32(&hex).unwrap()[31], 0xff);
        assert!(decode_hex_32("abc").is_err());
    }
}
