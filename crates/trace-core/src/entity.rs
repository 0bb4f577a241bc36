//! Domain entities owned by the entity store and referenced by id from the ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{error::StoreError, Timestamp};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub full_name: String,
    pub role: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Herb {
    pub id: String,
    pub botanical_name: String,
    pub local_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Collector {
    pub id: String,
    pub profile_id: String,
    pub collector_type: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionEvent {
    pub id: String,
    pub collector_id: String,
    pub herb_id: String,
    pub plant_part: String,
    pub quantity_kg: f64,
    pub location: GeoPoint,
    pub collection_timestamp: Timestamp,
    #[serde(default)]
    pub initial_condition: Option<String>,
}

/// Batch lifecycle: `created -> lab_testing -> approved | rejected`, `approved -> dispatched -> sold`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Created,
    LabTesting,
    Approved,
    Rejected,
    Dispatched,
    Sold,
}

impl BatchStatus {
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Created, LabTesting)
                | (LabTesting, Approved)
                | (LabTesting, Rejected)
                | (Approved, Dispatched)
                | (Dispatched, Sold)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    /// Human code, `BATCH_<millis>`.
    pub batch_id: String,
    pub herb_id: String,
    pub aggregator_id: String,
    pub total_quantity_kg: f64,
    #[serde(default)]
    pub status: BatchStatus,
    #[serde(default)]
    pub qr_code: Option<String>,
    pub creation_timestamp: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchCollection {
    pub id: String,
    pub batch_id: String,
    pub collection_event_id: String,
    pub contribution_percentage: f64,
    pub created_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityTest {
    pub id: String,
    pub batch_id: String,
    pub lab_id: String,
    pub sample_id: String,
    pub test_type: String,
    pub test_date: Timestamp,
    #[serde(default)]
    pub test_results: serde_json::Value,
    #[serde(default)]
    pub test_status: Option<String>,
    #[serde(default)]
    pub certificate_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub id: String,
    pub batch_id: String,
    pub processor_id: String,
    pub process_type: String,
    pub process_date: Timestamp,
    pub input_quantity_kg: f64,
    #[serde(default)]
    pub output_quantity_kg: Option<f64>,
    #[serde(default)]
    pub process_parameters: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub product_name: String,
    pub product_type: String,
    pub manufacturer_id: String,
    pub batch_ids: Vec<String>,
    pub qr_code: String,
    pub manufacturing_date: Timestamp,
    #[serde(default)]
    pub expiry_date: Option<Timestamp>,
}

/// Custody transfer of an item between two profiles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Handoff {
    pub id: String,
    pub from_entity_id: String,
    pub to_entity_id: String,
    pub item_id: String,
    pub item_type: String,
    pub handoff_type: String,
    pub handoff_timestamp: Timestamp,
    #[serde(default)]
    pub quantity: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Profile,
    Herb,
    Collector,
    CollectionEvent,
    Batch,
    BatchCollection,
    QualityTest,
    ProcessingStep,
    Product,
    Handoff,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Profile => "profile",
            EntityKind::Herb => "herb",
            EntityKind::Collector => "collector",
            EntityKind::CollectionEvent => "collection_event",
            EntityKind::Batch => "batch",
            EntityKind::BatchCollection => "batch_collection",
            EntityKind::QualityTest => "quality_test",
            EntityKind::ProcessingStep => "processing_step",
            EntityKind::Product => "product",
            EntityKind::Handoff => "handoff",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any record the store can hold. Seed files are a JSON array of these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Entity {
    Profile(Profile),
    Herb(Herb),
    Collector(Collector),
    CollectionEvent(CollectionEvent),
    Batch(Batch),
    BatchCollection(BatchCollection),
    QualityTest(QualityTest),
    ProcessingStep(ProcessingStep),
    Product(Product),
    Handoff(Handoff),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Entity::Profile(e) => &e.id,
            Entity::Herb(e) => &e.id,
            Entity::Collector(e) => &e.id,
            Entity::CollectionEvent(e) => &e.id,
            Entity::Batch(e) => &e.id,
            Entity::BatchCollection(e) => &e.id,
            Entity::QualityTest(e) => &e.id,
            Entity::ProcessingStep(e) => &e.id,
            Entity::Product(e) => &e.id,
            Entity::Handoff(e) => &e.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Profile(_) => EntityKind::Profile,
            Entity::Herb(_) => EntityKind::Herb,
            Entity::Collector(_) => EntityKind::Collector,
            Entity::CollectionEvent(_) => EntityKind::CollectionEvent,
            Entity::Batch(_) => EntityKind::Batch,
            Entity::BatchCollection(_) => EntityKind::BatchCollection,
            Entity::QualityTest(_) => EntityKind::QualityTest,
            Entity::ProcessingStep(_) => EntityKind::ProcessingStep,
            Entity::Product(_) => EntityKind::Product,
            Entity::Handoff(_) => EntityKind::Handoff,
        }
    }

    /// Public codes this entity can be looked up by. Each code has one owner.
    pub fn lookup_codes(&self) -> Vec<&str> {
        match self {
            Entity::Product(p) => vec![p.qr_code.as_str()],
            Entity::Batch(b) => std::iter::once(b.batch_id.as_str())
                .chain(b.qr_code.as_deref())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Checks that `self` may replace `existing` under the same id.
    ///
    /// Entities are write-once; the only permitted rewrite is a legal batch
    /// status transition with every other field unchanged. Rewriting an
    /// identical record is a no-op and allowed.
    pub fn check_replaces(&self, existing: &Entity) -> Result<(), StoreError> {
        if self == existing {
            return Ok(());
        }
        let immutable = |reason: String| StoreError::Immutable {
            entity_id: self.id().to_string(),
            reason,
        };
        match (existing, self) {
            (Entity::Batch(old), Entity::Batch(new)) => {
                let same_otherwise = Batch {
                    status: old.status,
                    ..new.clone()
                } == *old;
                if !same_otherwise {
                    return Err(immutable("only the batch status may change".into()));
                }
                if !old.status.can_transition_to(new.status) {
                    return Err(immutable(format!(
                        "illegal status transition {:?} -> {:?}",
                        old.status, new.status
                    )));
                }
                Ok(())
            }
            _ => Err(immutable(format!("{} records are write-once", existing.kind()))),
        }
    }
}

/// Percentage each collection contributes to a batch by quantity.
///
/// Returns all zeros when the total quantity is not positive.
pub fn contribution_shares(quantities_kg: &[f64]) -> Vec<f64> {
    let total: f64 = quantities_kg.iter().sum();
    if total <= 0.0 {
        return vec![0.0; quantities_kg.len()];
    }
    quantities_kg.iter().map(|q| q / total * 100.0).collect()
}
