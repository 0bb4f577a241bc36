//! In-process [`EntityStore`] used for embedding and tests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use super::EntityStore;
use crate::{
    entity::{
        Batch, BatchCollection, CollectionEvent, Collector, Entity, EntityKind, Herb,
        ProcessingStep, Product, Profile, QualityTest,
    },
    error::StoreError,
    Block,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: RwLock<BTreeMap<u64, Block>>,
    entities: RwLock<HashMap<String, Entity>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every entity, stopping at the first rejected one.
    pub fn with_entities(entities: impl IntoIterator<Item = Entity>) -> Result<Self, StoreError> {
        let store = Self::new();
        for entity in entities {
            store.put_entity(entity)?;
        }
        Ok(store)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(read(&self.blocks)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Rewrites a stored block in place, bypassing every check.
    #[cfg(test)]
    pub(crate) fn tamper(&self, block_number: u64, f: impl FnOnce(&mut Block)) {
        let mut blocks = self.blocks.write().unwrap();
        f(blocks.get_mut(&block_number).expect("block to tamper with"));
    }

    fn find<T>(
        &self,
        pick: impl Fn(&Entity) -> Option<&T>,
    ) -> Result<Option<T>, StoreError>
    where
        T: Clone,
    {
        Ok(read(&self.entities)?.values().find_map(|e| pick(e)).cloned())
    }

    fn filter<T>(&self, pick: impl Fn(&Entity) -> Option<&T>, id: impl Fn(&T) -> &str) -> Result<Vec<T>, StoreError>
    where
        T: Clone,
    {
        let mut out: Vec<T> = read(&self.entities)?.values().filter_map(|e| pick(e)).cloned().collect();
        out.sort_by(|a, b| id(a).cmp(id(b)));
        Ok(out)
    }

    fn get<T: Clone>(&self, id: &str, pick: impl Fn(&Entity) -> Option<&T>) -> Result<Option<T>, StoreError> {
        Ok(read(&self.entities)?.get(id).and_then(pick).cloned())
    }
}

impl EntityStore for MemoryStore {
    fn latest_block(&self) -> Result<Option<Block>, StoreError> {
        Ok(read(&self.blocks)?.values().next_back().cloned())
    }

    fn insert_block(&self, block: &Block) -> Result<(), StoreError> {
        let mut blocks = write(&self.blocks)?;
        if blocks.contains_key(&block.block_number) {
            return Err(StoreError::Conflict {
                block_number: block.block_number,
            });
        }
        blocks.insert(block.block_number, block.clone());
        Ok(())
    }

    fn block_by_number(&self, block_number: u64) -> Result<Option<Block>, StoreError> {
        Ok(read(&self.blocks)?.get(&block_number).cloned())
    }

    fn blocks(&self) -> Result<Vec<Block>, StoreError> {
        Ok(read(&self.blocks)?.values().cloned().collect())
    }

    fn blocks_by_entity(&self, entity_id: &str) -> Result<Vec<Block>, StoreError> {
        Ok(read(&self.blocks)?
            .values()
            .filter(|b| b.entity_id == entity_id)
            .cloned()
            .collect())
    }

    fn entity_kind(&self, id: &str) -> Result<Option<EntityKind>, StoreError> {
        Ok(read(&self.entities)?.get(id).map(Entity::kind))
    }

    fn put_entity(&self, entity: Entity) -> Result<(), StoreError> {
        let mut entities = write(&self.entities)?;
        if let Some(existing) = entities.get(entity.id()) {
            entity.check_replaces(existing)?;
        }
        for code in entity.lookup_codes() {
            let owner = entities.values().find(|other| {
                other.id() != entity.id()
                    && other.kind() == entity.kind()
                    && other.lookup_codes().contains(&code)
            });
            if let Some(owner) = owner {
                return Err(StoreError::DuplicateCode {
                    code: code.to_string(),
                    owner: owner.id().to_string(),
                });
            }
        }
        entities.insert(entity.id().to_string(), entity);
        Ok(())
    }

    fn profile(&self, id: &str) -> Result<Option<Profile>, StoreError> {
        self.get(id, |e| match e {
            Entity::Profile(p) => Some(p),
            _ => None,
        })
    }

    fn herb(&self, id: &str) -> Result<Option<Herb>, StoreError> {
        self.get(id, |e| match e {
            Entity::Herb(h) => Some(h),
            _ => None,
        })
    }

    fn collector(&self, id: &str) -> Result<Option<Collector>, StoreError> {
        self.get(id, |e| match e {
            Entity::Collector(c) => Some(c),
            _ => None,
        })
    }

    fn collection_event(&self, id: &str) -> Result<Option<CollectionEvent>, StoreError> {
        self.get(id, |e| match e {
            Entity::CollectionEvent(c) => Some(c),
            _ => None,
        })
    }

    fn batch(&self, id: &str) -> Result<Option<Batch>, StoreError> {
        self.get(id, |e| match e {
            Entity::Batch(b) => Some(b),
            _ => None,
        })
    }

    fn product_by_code(&self, qr_code: &str) -> Result<Option<Product>, StoreError> {
        self.find(|e| match e {
            Entity::Product(p) if p.qr_code == qr_code => Some(p),
            _ => None,
        })
    }

    fn batch_by_code(&self, code: &str) -> Result<Option<Batch>, StoreError> {
        self.find(|e| match e {
            Entity::Batch(b) if b.qr_code.as_deref() == Some(code) || b.batch_id == code => Some(b),
            _ => None,
        })
    }

    fn batch_collections(&self, batch_id: &str) -> Result<Vec<BatchCollection>, StoreError> {
        self.filter(
            |e| match e {
                Entity::BatchCollection(l) if l.batch_id == batch_id => Some(l),
                _ => None,
            },
            |l| l.id.as_str(),
        )
    }

    fn quality_tests(&self, batch_id: &str) -> Result<Vec<QualityTest>, StoreError> {
        self.filter(
            |e| match e {
                Entity::QualityTest(t) if t.batch_id == batch_id => Some(t),
                _ => None,
            },
            |t| t.id.as_str(),
        )
    }

    fn processing_steps(&self, batch_id: &str) -> Result<Vec<ProcessingStep>, StoreError> {
        self.filter(
            |e| match e {
                Entity::ProcessingStep(s) if s.batch_id == batch_id => Some(s),
                _ => None,
            },
            |s| s.id.as_str(),
        )
    }
}
