use serde::{de::DeserializeOwned, Serialize};
use sled::{
  transaction::{ConflictableTransactionError, TransactionError},
  Db, IVec, Transactional, Tree,
};
use std::path::Path;
use tracing::{debug, info};
use trace_core::{
  entity::{
    Batch, BatchCollection, CollectionEvent, Collector, Entity, EntityKind, Herb, ProcessingStep,
    Product, Profile, QualityTest,
  },
  Block, EntityStore, StoreError,
};

const TREE_BLOCKS: &str = "blocks";
const TREE_ENTITY_BLOCKS: &str = "entity_blocks";
const TREE_ENTITIES: &str = "entities";
const TREE_PRODUCT_CODES: &str = "product_codes";
const TREE_BATCH_CODES: &str = "batch_codes";
const TREE_BATCH_MEMBERS: &str = "batch_members";

// member tags in `batch_members` keys
const MEMBER_COLLECTION: u8 = b'c';
const MEMBER_TEST: u8 = b'q';
const MEMBER_STEP: u8 = b'p';

const SEP: u8 = 0;
const EMPTY: &[u8] = &[];

/// Persistent [`EntityStore`] backed by sled.
///
/// Blocks are keyed by big-endian block number so iteration order is chain
/// order. Values are JSON.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
  blocks: Tree,
  entity_blocks: Tree,
  entities: Tree,
  product_codes: Tree,
  batch_codes: Tree,
  batch_members: Tree,
}

fn backend(err: sled::Error) -> StoreError {
  StoreError::backend(err)
}

fn abort(err: TransactionError<StoreError>) -> StoreError {
  match err {
    TransactionError::Abort(e) => e,
    TransactionError::Storage(e) => backend(e),
  }
}

fn block_key(block_number: u64) -> [u8; 8] {
  block_number.to_be_bytes()
}

fn entity_block_key(entity_id: &str, block_number: u64) -> Vec<u8> {
  let mut key = Vec::with_capacity(entity_id.len() + 9);
  key.extend_from_slice(entity_id.as_bytes());
  key.push(SEP);
  key.extend_from_slice(&block_key(block_number));
  key
}

fn member_prefix(batch_id: &str, tag: u8) -> Vec<u8> {
  let mut key = Vec::with_capacity(batch_id.len() + 3);
  key.extend_from_slice(batch_id.as_bytes());
  key.push(SEP);
  key.push(tag);
  key.push(SEP);
  key
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
  Ok(serde_json::from_slice(bytes)?)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
  Ok(serde_json::to_vec(value)?)
}

/// The index entries an entity contributes besides its own row.
fn index_entries(entity: &Entity) -> (Vec<Vec<u8>>, Vec<Vec<u8>>, Option<Vec<u8>>) {
  let id = entity.id();
  let member = |batch_id: &str, tag| {
    let mut key = member_prefix(batch_id, tag);
    key.extend_from_slice(id.as_bytes());
    Some(key)
  };
  match entity {
    Entity::Product(p) => (vec![p.qr_code.as_bytes().to_vec()], vec![], None),
    Entity::Batch(b) => {
      let mut codes = vec![b.batch_id.as_bytes().to_vec()];
      if let Some(qr) = &b.qr_code {
        codes.push(qr.as_bytes().to_vec());
      }
      (vec![], codes, None)
    }
    Entity::BatchCollection(l) => (vec![], vec![], member(&l.batch_id, MEMBER_COLLECTION)),
    Entity::QualityTest(t) => (vec![], vec![], member(&t.batch_id, MEMBER_TEST)),
    Entity::ProcessingStep(s) => (vec![], vec![], member(&s.batch_id, MEMBER_STEP)),
    _ => (vec![], vec![], None),
  }
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
    let db = sled::open(path).map_err(backend)?;
    let tree = |name: &str| db.open_tree(name).map_err(backend);
    let store = Self {
      blocks: tree(TREE_BLOCKS)?,
      entity_blocks: tree(TREE_ENTITY_BLOCKS)?,
      entities: tree(TREE_ENTITIES)?,
      product_codes: tree(TREE_PRODUCT_CODES)?,
      batch_codes: tree(TREE_BATCH_CODES)?,
      batch_members: tree(TREE_BATCH_MEMBERS)?,
      db,
    };
    info!(blocks = store.blocks.len(), entities = store.entities.len(), "sled store opened");
    Ok(store)
  }

  pub fn flush(&self) -> Result<usize, StoreError> {
    self.db.flush().map_err(backend)
  }

  pub fn len(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }

  fn entity(&self, id: &str) -> Result<Option<Entity>, StoreError> {
    self
      .entities
      .get(id.as_bytes())
      .map_err(backend)?
      .map(|bytes| decode(&bytes))
      .transpose()
  }

  fn typed<T>(&self, id: &str, pick: impl FnOnce(Entity) -> Option<T>) -> Result<Option<T>, StoreError> {
    Ok(self.entity(id)?.and_then(pick))
  }

  fn by_code(&self, index: &Tree, code: &str) -> Result<Option<Entity>, StoreError> {
    match index.get(code.as_bytes()).map_err(backend)? {
      Some(id) => self.entity(&String::from_utf8_lossy(&id)),
      None => Ok(None),
    }
  }

  fn members<T>(&self, batch_id: &str, tag: u8, pick: impl Fn(Entity) -> Option<T>) -> Result<Vec<T>, StoreError> {
    let prefix = member_prefix(batch_id, tag);
    let mut out = Vec::new();
    for entry in self.batch_members.scan_prefix(&prefix) {
      let (key, _) = entry.map_err(backend)?;
      let id = String::from_utf8_lossy(&key[prefix.len()..]);
      if let Some(member) = self.entity(&id)?.and_then(&pick) {
        out.push(member);
      }
    }
    Ok(out)
  }

  fn decode_block(bytes: &IVec) -> Result<Block, StoreError> {
    decode(bytes)
  }
}

impl EntityStore for SledStore {
  fn latest_block(&self) -> Result<Option<Block>, StoreError> {
    match self.blocks.last().map_err(backend)? {
      Some((_, bytes)) => Ok(Some(Self::decode_block(&bytes)?)),
      None => Ok(None),
    }
  }

  fn insert_block(&self, block: &Block) -> Result<(), StoreError> {
    let key = block_key(block.block_number);
    let index_key = entity_block_key(&block.entity_id, block.block_number);
    let bytes = encode(block)?;

    (&self.blocks, &self.entity_blocks)
      .transaction(|(blocks, index)| {
        if blocks.get(&key[..])?.is_some() {
          return Err(ConflictableTransactionError::Abort(StoreError::Conflict {
            block_number: block.block_number,
          }));
        }
        blocks.insert(&key[..], bytes.as_slice())?;
        index.insert(index_key.as_slice(), EMPTY)?;
        Ok(())
      })
      .map_err(abort)?;

    self.flush()?;
    debug!(block_number = block.block_number, entity_id = %block.entity_id, "block stored");
    Ok(())
  }

  fn block_by_number(&self, block_number: u64) -> Result<Option<Block>, StoreError> {
    self
      .blocks
      .get(block_key(block_number))
      .map_err(backend)?
      .map(|bytes| Self::decode_block(&bytes))
      .transpose()
  }

  fn blocks(&self) -> Result<Vec<Block>, StoreError> {
    self
      .blocks
      .iter()
      .map(|entry| {
        let (_, bytes) = entry.map_err(backend)?;
        Self::decode_block(&bytes)
      })
      .collect()
  }

  fn blocks_by_entity(&self, entity_id: &str) -> Result<Vec<Block>, StoreError> {
    let mut prefix = entity_id.as_bytes().to_vec();
    prefix.push(SEP);
    let mut out = Vec::new();
    for entry in self.entity_blocks.scan_prefix(&prefix) {
      let (key, _) = entry.map_err(backend)?;
      let number: [u8; 8] = key[prefix.len()..]
        .try_into()
        .map_err(|_| StoreError::Backend(format!("malformed entity index key for {entity_id}")))?;
      if let Some(block) = self.block_by_number(u64::from_be_bytes(number))? {
        out.push(block);
      }
    }
    Ok(out)
  }

  fn entity_kind(&self, id: &str) -> Result<Option<EntityKind>, StoreError> {
    Ok(self.entity(id)?.map(|e| e.kind()))
  }

  fn put_entity(&self, entity: Entity) -> Result<(), StoreError> {
    let id = entity.id().as_bytes().to_vec();
    let bytes = encode(&entity)?;
    let (product_codes, batch_codes, member) = index_entries(&entity);

    (
      &self.entities,
      &self.product_codes,
      &self.batch_codes,
      &self.batch_members,
    )
      .transaction(|(entities, products, batches, members)| {
        if let Some(existing) = entities.get(&id)? {
          let existing: Entity = serde_json::from_slice(&existing)
            .map_err(|e| ConflictableTransactionError::Abort(StoreError::Codec(e)))?;
          entity
            .check_replaces(&existing)
            .map_err(ConflictableTransactionError::Abort)?;
        }
        for (index, codes) in [(products, &product_codes), (batches, &batch_codes)] {
          for code in codes {
            match index.get(code.as_slice())? {
              Some(owner) if &owner[..] != id.as_slice() => {
                return Err(ConflictableTransactionError::Abort(StoreError::DuplicateCode {
                  code: String::from_utf8_lossy(code).into_owned(),
                  owner: String::from_utf8_lossy(&owner).into_owned(),
                }));
              }
              _ => {}
            }
          }
        }
        entities.insert(id.as_slice(), bytes.as_slice())?;
        for code in &product_codes {
          products.insert(code.as_slice(), id.as_slice())?;
        }
        for code in &batch_codes {
          batches.insert(code.as_slice(), id.as_slice())?;
        }
        if let Some(key) = &member {
          members.insert(key.as_slice(), EMPTY)?;
        }
        Ok(())
      })
      .map_err(abort)?;

    debug!(id = entity.id(), kind = %entity.kind(), "entity stored");
    Ok(())
  }

  fn profile(&self, id: &str) -> Result<Option<Profile>, StoreError> {
    self.typed(id, |e| match e {
      Entity::Profile(p) => Some(p),
      _ => None,
    })
  }

  fn herb(&self, id: &str) -> Result<Option<Herb>, StoreError> {
    self.typed(id, |e| match e {
      Entity::Herb(h) => Some(h),
      _ => None,
    })
  }

  fn collector(&self, id: &str) -> Result<Option<Collector>, StoreError> {
    self.typed(id, |e| match e {
      Entity::Collector(c) => Some(c),
      _ => None,
    })
  }

  fn collection_event(&self, id: &str) -> Result<Option<CollectionEvent>, StoreError> {
    self.typed(id, |e| match e {
      Entity::CollectionEvent(c) => Some(c),
      _ => None,
    })
  }

  fn batch(&self, id: &str) -> Result<Option<Batch>, StoreError> {
    self.typed(id, |e| match e {
      Entity::Batch(b) => Some(b),
      _ => None,
    })
  }

  fn product_by_code(&self, qr_code: &str) -> Result<Option<Product>, StoreError> {
    Ok(match self.by_code(&self.product_codes, qr_code)? {
      Some(Entity::Product(p)) => Some(p),
      _ => None,
    })
  }

  fn batch_by_code(&self, code: &str) -> Result<Option<Batch>, StoreError> {
    Ok(match self.by_code(&self.batch_codes, code)? {
      Some(Entity::Batch(b)) => Some(b),
      _ => None,
    })
  }

  fn batch_collections(&self, batch_id: &str) -> Result<Vec<BatchCollection>, StoreError> {
    self.members(batch_id, MEMBER_COLLECTION, |e| match e {
      Entity::BatchCollection(l) => Some(l),
      _ => None,
    })
  }

  fn quality_tests(&self, batch_id: &str) -> Result<Vec<QualityTest>, StoreError> {
    self.members(batch_id, MEMBER_TEST, |e| match e {
      Entity::QualityTest(t) => Some(t),
      _ => None,
    })
  }

  fn processing_steps(&self, batch_id: &str) -> Result<Vec<ProcessingStep>, StoreError> {
    self.members(batch_id, MEMBER_STEP, |e| match e {
      Entity::ProcessingStep(s) => Some(s),
      _ => None,
    })
  }
}
