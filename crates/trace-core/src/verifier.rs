//! Whole-chain linkage verification.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{constants::GENESIS_BLOCK_NUMBER, error::LedgerError, store::EntityStore, Block, Hash};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// `previous_hash` does not equal the predecessor's `block_hash`.
    HashMismatch {
        expected: Hash,
        found: Option<Hash>,
    },
    /// `block_number` is not the predecessor's number plus one.
    /// `expected` is `None` when the predecessor already holds the largest number.
    SequenceGap { expected: Option<u64>, found: u64 },
    /// The first block is not block 1 with an empty `previous_hash`.
    GenesisMismatch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub block_number: u64,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub is_valid: bool,
    pub blocks_checked: usize,
    pub violations: Vec<Violation>,
}

pub struct ChainVerifier<S: EntityStore> {
    store: Arc<S>,
}

impl<S: EntityStore> Clone for ChainVerifier<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: EntityStore> ChainVerifier<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Scans every block and reports all linkage violations.
    ///
    /// Only a failing store read is an error; a broken chain is a report.
    pub fn verify(&self) -> Result<ChainReport, LedgerError> {
        let blocks = self.store.blocks()?;
        let report = verify_blocks(&blocks);
        if report.is_valid {
            info!(blocks = report.blocks_checked, "chain verified");
        } else {
            for v in &report.violations {
                warn!(block_number = v.block_number, kind = ?v.kind, "chain violation");
            }
        }
        Ok(report)
    }

    /// Checks one block against its immediate predecessor only.
    pub fn check_link(&self, block: &Block) -> Result<bool, LedgerError> {
        if block.block_number == GENESIS_BLOCK_NUMBER {
            return Ok(block.previous_hash.is_none());
        }
        let Some(previous_number) = block.block_number.checked_sub(1) else {
            return Ok(false);
        };
        let Some(previous) = self.store.block_by_number(previous_number)? else {
            return Ok(false);
        };
        Ok(block.links_to(&previous))
    }
}

/// Verifies an ordered snapshot of blocks.
pub fn verify_blocks(blocks: &[Block]) -> ChainReport {
    let mut violations = Vec::new();
    if let Some(first) = blocks.first() {
        if first.block_number != GENESIS_BLOCK_NUMBER || first.previous_hash.is_some() {
            violations.push(Violation {
                block_number: first.block_number,
                kind: ViolationKind::GenesisMismatch,
            });
        }
    }
    // order of windows is preserved by collect
    let pairs: Vec<Violation> = blocks
        .par_windows(2)
        .flat_map_iter(|pair| check_pair(&pair[0], &pair[1]))
        .collect();
    violations.extend(pairs);

    ChainReport {
        is_valid: violations.is_empty(),
        blocks_checked: blocks.len(),
        violations,
    }
}

fn check_pair(previous: &Block, current: &Block) -> Vec<Violation> {
    let mut out = Vec::new();
    if current.previous_hash.as_deref() != Some(previous.block_hash.as_str()) {
        out.push(Violation {
            block_number: current.block_number,
            kind: ViolationKind::HashMismatch {
                expected: previous.block_hash.clone(),
                found: current.previous_hash.clone(),
            },
        });
    }
    let expected = previous.block_number.checked_add(1);
    if expected != Some(current.block_number) {
        out.push(Violation {
            block_number: current.block_number,
            kind: ViolationKind::SequenceGap {
                expected,
                found: current.block_number,
            },
        });
    }
    out
}
