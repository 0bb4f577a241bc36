//! Appends hash-linked blocks to the global chain.
//!
//! "Read the tip, link to it, insert the next number" is the one critical
//! section in the ledger. It is serialized optimistically: the store refuses a
//! second block with the same number, and the loser re-reads the tip and tries
//! again within a bounded budget.

use rand::Rng;
use std::{sync::Arc, thread, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    constants::{APPEND_BASE_DELAY_MS, APPEND_MAX_ATTEMPTS, APPEND_MAX_DELAY_MS, GENESIS_BLOCK_NUMBER},
    error::{LedgerError, StoreError},
    hash::BlockHasher,
    now_millis,
    store::EntityStore,
    Block, Transaction,
};

/// Bounded exponential backoff for append conflicts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: APPEND_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(APPEND_BASE_DELAY_MS),
            max_delay: Duration::from_millis(APPEND_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`
    /// capped at `max_delay`, plus up to one `base_delay` of jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.max_delay);
        let jitter_ms = self.base_delay.as_millis() as u64;
        if jitter_ms == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

pub struct LedgerAppender<S: EntityStore, H: BlockHasher> {
    store: Arc<S>,
    hasher: Arc<H>,
    retry: RetryPolicy,
}

impl<S: EntityStore, H: BlockHasher> Clone for LedgerAppender<S, H> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            hasher: self.hasher.clone(),
            retry: self.retry,
        }
    }
}

impl<S: EntityStore, H: BlockHasher> LedgerAppender<S, H> {
    pub fn new(store: Arc<S>, hasher: Arc<H>, retry: RetryPolicy) -> Self {
        Self {
            store,
            hasher,
            retry,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Records `transaction` about `entity_id` as the next block.
    pub fn append(&self, transaction: Transaction, entity_id: &str) -> Result<Block, LedgerError> {
        if !self.store.entity_exists(entity_id)? {
            return Err(LedgerError::EntityNotFound {
                entity_id: entity_id.to_string(),
            });
        }

        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.try_append(&transaction, entity_id) {
                Ok(block) => {
                    info!(
                        block_number = block.block_number,
                        transaction_type = %block.transaction_type(),
                        entity_id,
                        attempt,
                        "appended block {}",
                        block.block_hash
                    );
                    return Ok(block);
                }
                Err(LedgerError::ConcurrentAppendConflict { block_number }) => {
                    if attempt == max_attempts {
                        break;
                    }
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        block_number,
                        entity_id,
                        attempt,
                        "block number taken by a concurrent append, retrying in {:?}",
                        delay
                    );
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }

        warn!(entity_id, attempts = max_attempts, "append retry budget exhausted");
        Err(LedgerError::AppendFailed {
            entity_id: entity_id.to_string(),
            attempts: max_attempts,
        })
    }

    /// One read-link-insert pass. A lost race surfaces as
    /// [`LedgerError::ConcurrentAppendConflict`].
    fn try_append(&self, transaction: &Transaction, entity_id: &str) -> Result<Block, LedgerError> {
        let latest = self.store.latest_block()?;
        let (block_number, previous_hash, floor) = match &latest {
            Some(tip) => {
                let next = tip.block_number.checked_add(1).ok_or_else(|| {
                    StoreError::Backend(format!("no block number follows {}", tip.block_number))
                })?;
                (next, Some(tip.block_hash.clone()), tip.timestamp)
            }
            None => (GENESIS_BLOCK_NUMBER, None, 0),
        };
        // keep timestamps non-decreasing along the chain even if clocks drift
        let timestamp = now_millis().max(floor);
        debug!(block_number, ?previous_hash, "sealing block");

        let block = Block::seal(
            &*self.hasher,
            block_number,
            previous_hash,
            transaction.clone(),
            entity_id,
            timestamp,
        )
        .map_err(StoreError::from)?;
        self.store.insert_block(&block)?;
        Ok(block)
    }
}
