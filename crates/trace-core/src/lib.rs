use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod appender;
pub mod constants;
pub mod entity;
pub mod error;
pub mod identifiers;
pub mod resolver;
pub mod store;
pub mod transaction;
pub mod verifier;

pub use appender::{LedgerAppender, RetryPolicy};
pub use error::{LedgerError, StoreError};
pub use hash::{BlockHasher, RollingHasher, Sha256Hasher};
pub use resolver::{Journey, ProvenanceResolver, Stage, StageType, VerificationStatus};
pub use store::{memory::MemoryStore, EntityStore};
pub use transaction::{Transaction, TransactionType};
pub use verifier::{ChainReport, ChainVerifier, Violation, ViolationKind};

/// Lowercase hex digest produced by a [`BlockHasher`].
pub type Hash = String;

/// Unix time in milliseconds.
pub type Timestamp = u64;

pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

/// The string a block hash is computed over. Field order is fixed.
#[derive(Serialize)]
struct CanonicalTransaction<'a> {
    #[serde(rename = "type")]
    ty: TransactionType,
    data: transaction::TransactionData<'a>,
    entity: &'a str,
    timestamp: Timestamp,
    previous: Option<&'a str>,
    block: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_number: u64,
    pub block_hash: Hash,
    pub previous_hash: Option<Hash>,
    pub merkle_root: Hash,
    #[serde(flatten)]
    pub transaction: Transaction,
    pub entity_id: String,
    pub timestamp: Timestamp,
}

impl Block {
    /// Computes hash and merkle root for a new block.
    pub fn seal<H: BlockHasher + ?Sized>(
        hasher: &H,
        block_number: u64,
        previous_hash: Option<Hash>,
        transaction: Transaction,
        entity_id: &str,
        timestamp: Timestamp,
    ) -> serde_json::Result<Self> {
        let canonical = canonical_string(
            &transaction,
            entity_id,
            timestamp,
            previous_hash.as_deref(),
            block_number,
        )?;
        let block_hash = hasher.digest(canonical.as_bytes());
        let merkle_root = merkle_root(hasher, &[merkle_leaf(&block_hash, timestamp)]);
        Ok(Self {
            block_number,
            block_hash,
            previous_hash,
            merkle_root,
            transaction,
            entity_id: entity_id.to_string(),
            timestamp,
        })
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction.transaction_type()
    }

    pub fn canonical(&self) -> serde_json::Result<String> {
        canonical_string(
            &self.transaction,
            &self.entity_id,
            self.timestamp,
            self.previous_hash.as_deref(),
            self.block_number,
        )
    }

    /// Re-hashes the stored fields and compares with `block_hash`.
    pub fn is_intact<H: BlockHasher + ?Sized>(&self, hasher: &H) -> bool {
        match self.canonical() {
            Ok(canonical) => hasher.digest(canonical.as_bytes()) == self.block_hash,
            Err(_) => false,
        }
    }

    /// Whether `self` correctly follows `previous` in the chain.
    pub fn links_to(&self, previous: &Block) -> bool {
        previous.block_number.checked_add(1) == Some(self.block_number)
            && self.previous_hash.as_deref() == Some(previous.block_hash.as_str())
    }
}

pub fn canonical_string(
    transaction: &Transaction,
    entity_id: &str,
    timestamp: Timestamp,
    previous_hash: Option<&str>,
    block_number: u64,
) -> serde_json::Result<String> {
    serde_json::to_string(&CanonicalTransaction {
        ty: transaction.transaction_type(),
        data: transaction.data(),
        entity: entity_id,
        timestamp,
        previous: previous_hash,
        block: block_number,
    })
}

/// The single merkle leaf of a one-transaction block.
pub fn merkle_leaf(block_hash: &str, timestamp: Timestamp) -> String {
    format!("{block_hash}_{timestamp}")
}

/// Pairwise merkle root over `leaves`; an odd leaf is paired with itself.
pub fn merkle_root<H: BlockHasher + ?Sized>(hasher: &H, leaves: &[String]) -> Hash {
    if leaves.is_empty() {
        return "0".repeat(constants::HASH_HEX_SIZE);
    }
    let mut level: Vec<Hash> = leaves.iter().map(|l| hasher.digest(l.as_bytes())).collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let (a, b) = if pair.len() == 2 {
                (&pair[0], &pair[1])
            } else {
                (&pair[0], &pair[0])
            };
            next.push(hasher.digest(format!("{a}{b}").as_bytes()));
        }
        level = next;
    }
    level.swap_remove(0)
}

pub mod hash {
    use sha2::{Digest, Sha256};

    /// The hash primitive used for block hashes, merkle roots and identifiers.
    pub trait BlockHasher: Send + Sync {
        fn digest(&self, input: &[u8]) -> String;
    }

    #[derive(Clone, Copy, Debug, Default)]
    pub struct Sha256Hasher;

    impl BlockHasher for Sha256Hasher {
        fn digest(&self, input: &[u8]) -> String {
            hex::encode(Sha256::digest(input))
        }
    }

    /// 32-bit rolling hash over UTF-16 code units (`h = h*31 + c`, wrapping),
    /// printed as the hex of its absolute value.
    ///
    /// Not collision resistant. Kept because issued `QR_<hash>_<millis>` codes
    /// were minted with it.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct RollingHasher;

    impl BlockHasher for RollingHasher {
        fn digest(&self, input: &[u8]) -> String {
            rolling_hash(&String::from_utf8_lossy(input))
        }
    }

    pub fn rolling_hash(data: &str) -> String {
        let mut hash: i32 = 0;
        for unit in data.encode_utf16() {
            hash = (hash << 5).wrapping_sub(hash).wrapping_add(unit as i32);
        }
        // i64 so that i32::MIN has an absolute value
        format!("{:x}", (hash as i64).abs())
    }
}

pub mod chain {
    use super::*;
    use std::sync::Arc;

    /// Facade over one store and one hash primitive exposing
    /// `append`, `verify` and `resolve`.
    pub struct Ledger<S: EntityStore, H: BlockHasher = Sha256Hasher> {
        store: Arc<S>,
        hasher: Arc<H>,
        appender: LedgerAppender<S, H>,
        verifier: ChainVerifier<S>,
        resolver: ProvenanceResolver<S, H>,
    }

    impl<S: EntityStore, H: BlockHasher> Clone for Ledger<S, H> {
        fn clone(&self) -> Self {
            Self {
                store: self.store.clone(),
                hasher: self.hasher.clone(),
                appender: self.appender.clone(),
                verifier: self.verifier.clone(),
                resolver: self.resolver.clone(),
            }
        }
    }

    impl<S: EntityStore> Ledger<S, Sha256Hasher> {
        pub fn new(store: Arc<S>) -> Self {
            Self::with_hasher(store, Sha256Hasher, RetryPolicy::default())
        }
    }

    impl<S: EntityStore, H: BlockHasher> Ledger<S, H> {
        pub fn with_hasher(store: Arc<S>, hasher: H, retry: RetryPolicy) -> Self {
            let hasher = Arc::new(hasher);
            Self {
                appender: LedgerAppender::new(store.clone(), hasher.clone(), retry),
                verifier: ChainVerifier::new(store.clone()),
                resolver: ProvenanceResolver::new(store.clone(), hasher.clone()),
                store,
                hasher,
            }
        }

        pub fn store(&self) -> &Arc<S> {
            &self.store
        }

        pub fn hasher(&self) -> &H {
            &self.hasher
        }

        pub fn append(&self, transaction: Transaction, entity_id: &str) -> Result<Block, LedgerError> {
            self.appender.append(transaction, entity_id)
        }

        pub fn verify(&self) -> Result<ChainReport, LedgerError> {
            self.verifier.verify()
        }

        pub fn resolve(&self, identifier: &str) -> Result<Journey, LedgerError> {
            self.resolver.resolve(identifier)
        }

        /// Return (height, tip_hash). Height is 0 for an empty chain.
        pub fn tip(&self) -> Result<(u64, Option<Hash>), LedgerError> {
            Ok(self
                .store
                .latest_block()?
                .map(|b| (b.block_number, Some(b.block_hash)))
                .unwrap_or((0, None)))
        }

        pub fn block(&self, block_number: u64) -> Result<Option<Block>, LedgerError> {
            Ok(self.store.block_by_number(block_number)?)
        }

        /// Up to `limit` consecutive blocks starting at `from`.
        pub fn blocks(&self, from: u64, limit: u64) -> Result<Vec<Block>, LedgerError> {
            let start = from.max(constants::GENESIS_BLOCK_NUMBER);
            let mut out = Vec::new();
            for number in start..start.saturating_add(limit) {
                match self.store.block_by_number(number)? {
                    Some(block) => out.push(block),
                    None => break,
                }
            }
            Ok(out)
        }

        /// Every block recorded for `entity_id`, oldest first.
        pub fn history(&self, entity_id: &str) -> Result<Vec<Block>, LedgerError> {
            Ok(self.store.blocks_by_entity(entity_id)?)
        }
    }
}
