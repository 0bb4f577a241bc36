pub mod memory;

use serde::{Deserialize, Serialize};

use crate::{
    entity::{
        Batch, BatchCollection, CollectionEvent, Collector, Entity, EntityKind, Herb,
        ProcessingStep, Product, Profile, QualityTest,
    },
    error::StoreError,
    Block,
};

/// Trait the storage backends implement for the ledger to operate.
/// This lives in `trace-core` to avoid a circular dependency.
///
/// The joined lookups the resolver needs are provided methods built on the
/// point lookups, so a backend only implements primitives.
pub trait EntityStore: Send + Sync {
    /// Block with the highest `block_number`, if any.
    fn latest_block(&self) -> Result<Option<Block>, StoreError>;

    /// Inserts `block` unless its `block_number` is taken, in which case
    /// this fails with [`StoreError::Conflict`] and writes nothing.
    fn insert_block(&self, block: &Block) -> Result<(), StoreError>;

    fn block_by_number(&self, block_number: u64) -> Result<Option<Block>, StoreError>;

    /// All blocks ordered by `block_number` ascending.
    fn blocks(&self) -> Result<Vec<Block>, StoreError>;

    /// Blocks whose `entity_id` matches, ordered by `block_number` ascending.
    fn blocks_by_entity(&self, entity_id: &str) -> Result<Vec<Block>, StoreError>;

    fn entity_kind(&self, id: &str) -> Result<Option<EntityKind>, StoreError>;

    /// Creates an entity, or replaces it when [`Entity::check_replaces`] allows.
    fn put_entity(&self, entity: Entity) -> Result<(), StoreError>;

    fn profile(&self, id: &str) -> Result<Option<Profile>, StoreError>;
    fn herb(&self, id: &str) -> Result<Option<Herb>, StoreError>;
    fn collector(&self, id: &str) -> Result<Option<Collector>, StoreError>;
    fn collection_event(&self, id: &str) -> Result<Option<CollectionEvent>, StoreError>;
    fn batch(&self, id: &str) -> Result<Option<Batch>, StoreError>;

    fn product_by_code(&self, qr_code: &str) -> Result<Option<Product>, StoreError>;

    /// Matches either the batch QR code or its human `BATCH_<millis>` id.
    fn batch_by_code(&self, code: &str) -> Result<Option<Batch>, StoreError>;

    fn batch_collections(&self, batch_id: &str) -> Result<Vec<BatchCollection>, StoreError>;
    fn quality_tests(&self, batch_id: &str) -> Result<Vec<QualityTest>, StoreError>;
    fn processing_steps(&self, batch_id: &str) -> Result<Vec<ProcessingStep>, StoreError>;

    fn entity_exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.entity_kind(id)?.is_some())
    }

    /// Batches for `ids`, in input order; unknown ids are skipped.
    fn batches_by_ids(&self, ids: &[String]) -> Result<Vec<Batch>, StoreError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(batch) = self.batch(id)? {
                out.push(batch);
            }
        }
        Ok(out)
    }

    fn batch_collections_by_batch_ids(
        &self,
        batch_ids: &[String],
    ) -> Result<Vec<CollectionJoin>, StoreError> {
        let mut out = Vec::new();
        for batch_id in batch_ids {
            for link in self.batch_collections(batch_id)? {
                let event = self.collection_event(&link.collection_event_id)?;
                let herb = match &event {
                    Some(e) => self.herb(&e.herb_id)?,
                    None => None,
                };
                let collector = match &event {
                    Some(e) => self.collector(&e.collector_id)?,
                    None => None,
                };
                let collector_profile = match &collector {
                    Some(c) => self.profile(&c.profile_id)?,
                    None => None,
                };
                out.push(CollectionJoin {
                    link,
                    event,
                    collector,
                    collector_profile,
                    herb,
                });
            }
        }
        Ok(out)
    }

    fn quality_tests_by_batch_ids(
        &self,
        batch_ids: &[String],
    ) -> Result<Vec<QualityTestJoin>, StoreError> {
        let mut out = Vec::new();
        for batch_id in batch_ids {
            for test in self.quality_tests(batch_id)? {
                let lab = self.profile(&test.lab_id)?;
                out.push(QualityTestJoin { test, lab });
            }
        }
        Ok(out)
    }

    fn processing_steps_by_batch_ids(
        &self,
        batch_ids: &[String],
    ) -> Result<Vec<ProcessingJoin>, StoreError> {
        let mut out = Vec::new();
        for batch_id in batch_ids {
            for step in self.processing_steps(batch_id)? {
                let processor = self.profile(&step.processor_id)?;
                out.push(ProcessingJoin { step, processor });
            }
        }
        Ok(out)
    }
}

/// A batch-collection link joined to its event, collector and herb.
/// Any of the joined parts may be missing if the referenced row is gone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionJoin {
    pub link: BatchCollection,
    pub event: Option<CollectionEvent>,
    pub collector: Option<Collector>,
    pub collector_profile: Option<Profile>,
    pub herb: Option<Herb>,
}

impl CollectionJoin {
    pub fn is_complete(&self) -> bool {
        self.event.is_some()
            && self.collector.is_some()
            && self.collector_profile.is_some()
            && self.herb.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityTestJoin {
    pub test: QualityTest,
    pub lab: Option<Profile>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJoin {
    pub step: ProcessingStep,
    pub processor: Option<Profile>,
}
