#![allow(dead_code)]

use std::{fs, path::PathBuf};

use tempfile::{tempdir, TempDir};
use trace_core::{
  entity::{Batch, BatchCollection, BatchStatus, CollectionEvent, Collector, Entity, GeoPoint, Herb, Profile},
  transaction::{BatchCreated, CollectionRecorded},
  Transaction,
};
use trace_storage::SledStore;

pub const T0: u64 = 1_700_000_000_000;

pub fn create_temp_dir() -> (TempDir, PathBuf) {
  let temp_dir = tempdir().expect("Failed to create temp dir");
  let db_path = temp_dir.path().to_path_buf();
  (temp_dir, db_path)
}

pub fn create_temp_store() -> (TempDir, SledStore) {
  let (temp_dir, db_path) = create_temp_dir();
  let store = SledStore::open(&db_path).expect("Failed to open SledStore");
  (temp_dir, store)
}

pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
  let db_path = temp_dir.path().to_path_buf();
  drop(store);
  temp_dir.close().expect("Failed to delete temp dir");
  let _ = fs::remove_dir_all(&db_path);
  assert!(!db_path.exists(), "Database directory should be removed");
}

/// Herb, collector and profile every collection event refers to.
pub fn reference_entities() -> Vec<Entity> {
  vec![
    Entity::Herb(Herb {
      id: "herb".into(),
      botanical_name: "Bacopa monnieri".into(),
      local_name: "Brahmi".into(),
    }),
    Entity::Profile(Profile {
      id: "p-collector".into(),
      full_name: "Ravi Kumar".into(),
      role: "collector".into(),
      organization: Some("Kerala Growers Co-op".into()),
      location: None,
    }),
    Entity::Collector(Collector {
      id: "collector".into(),
      profile_id: "p-collector".into(),
      collector_type: "cooperative".into(),
    }),
  ]
}

pub fn collection_event(id: &str, at: u64) -> Entity {
  Entity::CollectionEvent(CollectionEvent {
    id: id.into(),
    collector_id: "collector".into(),
    herb_id: "herb".into(),
    plant_part: "whole plant".into(),
    quantity_kg: 4.0,
    location: GeoPoint {
      latitude: 9.93,
      longitude: 76.26,
    },
    collection_timestamp: at,
    initial_condition: None,
  })
}

pub fn batch(id: &str, code: &str, qr: &str, at: u64) -> Entity {
  Entity::Batch(Batch {
    id: id.into(),
    batch_id: code.into(),
    herb_id: "herb".into(),
    aggregator_id: "p-collector".into(),
    total_quantity_kg: 4.0,
    status: BatchStatus::Created,
    qr_code: Some(qr.into()),
    creation_timestamp: at,
  })
}

pub fn link(id: &str, batch_id: &str, event_id: &str, at: u64) -> Entity {
  Entity::BatchCollection(BatchCollection {
    id: id.into(),
    batch_id: batch_id.into(),
    collection_event_id: event_id.into(),
    contribution_percentage: 100.0,
    created_at: at,
  })
}

pub fn collection_recorded(event_id: &str) -> Transaction {
  Transaction::CollectionRecorded(CollectionRecorded {
    collection_event_id: event_id.into(),
    herb_id: "herb".into(),
    quantity_kg: 4.0,
  })
}

pub fn batch_created(code: &str) -> Transaction {
  Transaction::BatchCreated(BatchCreated {
    batch_id: code.into(),
    herb_id: "herb".into(),
    total_quantity_kg: 4.0,
    collections: 1,
    aggregator_id: None,
  })
}
