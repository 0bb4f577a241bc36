//! Resolves a public product or batch code into its provenance journey.
//!
//! A journey is every collection, quality test and processing step behind
//! the code, merged into one timeline. Each stage carries two flags derived
//! from the ledger:
//!
//! * `data_integrity`: the entity's documenting block exists, the joined
//!   records behind the stage are all present, and re-hashing the block
//!   reproduces its stored hash;
//! * `on_chain_verified`: `data_integrity` holds and the block links to its
//!   immediate predecessor.
//!
//! A missing joined row degrades the one stage it belongs to and never fails
//! the whole resolution.

use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::HashSet, sync::Arc};
use tracing::{debug, warn};

use crate::{
    entity::GeoPoint,
    error::LedgerError,
    hash::BlockHasher,
    identifiers::parse_identifier,
    store::{CollectionJoin, EntityStore, ProcessingJoin, QualityTestJoin},
    verifier::ChainVerifier,
    Timestamp, TransactionType,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageType {
    Collection,
    QualityTest,
    Processing,
}

impl StageType {
    /// The transaction type of the block that documents a stage's entity.
    pub fn documented_by(self) -> TransactionType {
        match self {
            StageType::Collection => TransactionType::CollectionRecorded,
            StageType::QualityTest => TransactionType::QualityTest,
            StageType::Processing => TransactionType::ProcessingStep,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub batch_id: String,
    pub collection_event_id: String,
    pub contribution_percentage: f64,
    pub herb_name: Option<String>,
    pub botanical_name: Option<String>,
    pub collector_name: Option<String>,
    pub plant_part: Option<String>,
    pub quantity_kg: Option<f64>,
    pub location: Option<GeoPoint>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityTestMetadata {
    pub batch_id: String,
    pub quality_test_id: String,
    pub lab_name: Option<String>,
    pub test_type: String,
    pub test_status: Option<String>,
    pub results: serde_json::Value,
    pub certificate_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub batch_id: String,
    pub processing_step_id: String,
    pub processor_name: Option<String>,
    pub process_type: String,
    pub input_quantity_kg: f64,
    pub output_quantity_kg: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage_type", content = "metadata")]
pub enum StageMetadata {
    Collection(CollectionMetadata),
    QualityTest(QualityTestMetadata),
    Processing(ProcessingMetadata),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(flatten)]
    pub metadata: StageMetadata,
    pub entity_id: String,
    pub timestamp: Timestamp,
    pub block_number: Option<u64>,
    pub data_integrity: bool,
    pub on_chain_verified: bool,
}

impl Stage {
    pub fn stage_type(&self) -> StageType {
        match self.metadata {
            StageMetadata::Collection(_) => StageType::Collection,
            StageMetadata::QualityTest(_) => StageType::QualityTest,
            StageMetadata::Processing(_) => StageType::Processing,
        }
    }

    pub fn batch_id(&self) -> &str {
        match &self.metadata {
            StageMetadata::Collection(m) => &m.batch_id,
            StageMetadata::QualityTest(m) => &m.batch_id,
            StageMetadata::Processing(m) => &m.batch_id,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Verified,
    PartiallyVerified,
    Unverified,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneySummary {
    pub total_stages: usize,
    pub verified_stages: usize,
    pub verification_status: VerificationStatus,
}

impl JourneySummary {
    pub fn from_stages(stages: &[Stage]) -> Self {
        let total_stages = stages.len();
        let verified_stages = stages.iter().filter(|s| s.on_chain_verified).count();
        let verification_status = match verified_stages {
            0 => VerificationStatus::Unverified,
            n if n == total_stages => VerificationStatus::Verified,
            _ => VerificationStatus::PartiallyVerified,
        };
        Self {
            total_stages,
            verified_stages,
            verification_status,
        }
    }
}

/// What the identifier turned out to name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedAs {
    Product {
        product_id: String,
        product_name: String,
    },
    Batch {
        batch_id: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    pub identifier: String,
    pub resolved_as: ResolvedAs,
    /// Human codes of the batches the stages were gathered from.
    pub batches: Vec<String>,
    pub stages: Vec<Stage>,
    pub summary: JourneySummary,
}

pub struct ProvenanceResolver<S: EntityStore, H: BlockHasher> {
    store: Arc<S>,
    hasher: Arc<H>,
    verifier: ChainVerifier<S>,
}

impl<S: EntityStore, H: BlockHasher> Clone for ProvenanceResolver<S, H> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            hasher: self.hasher.clone(),
            verifier: self.verifier.clone(),
        }
    }
}

/// Ledger-derived flags for one stage.
struct Integrity {
    block_number: Option<u64>,
    data_integrity: bool,
    on_chain_verified: bool,
}

impl<S: EntityStore, H: BlockHasher> ProvenanceResolver<S, H> {
    pub fn new(store: Arc<S>, hasher: Arc<H>) -> Self {
        Self {
            verifier: ChainVerifier::new(store.clone()),
            store,
            hasher,
        }
    }

    pub fn resolve(&self, identifier: &str) -> Result<Journey, LedgerError> {
        debug!(identifier, shape = ?parse_identifier(identifier), "resolving identifier");

        let (resolved_as, batch_ids) = if let Some(product) = self.store.product_by_code(identifier)? {
            let mut seen = HashSet::new();
            let ids: Vec<String> = product
                .batch_ids
                .iter()
                .filter(|id| seen.insert(id.as_str()))
                .cloned()
                .collect();
            (
                ResolvedAs::Product {
                    product_id: product.id,
                    product_name: product.product_name,
                },
                ids,
            )
        } else if let Some(batch) = self.store.batch_by_code(identifier)? {
            (
                ResolvedAs::Batch {
                    batch_id: batch.batch_id,
                },
                vec![batch.id],
            )
        } else {
            return Err(LedgerError::NotFound {
                identifier: identifier.to_string(),
            });
        };

        let batches = self.store.batches_by_ids(&batch_ids)?;
        if batches.len() < batch_ids.len() {
            let found: HashSet<&str> = batches.iter().map(|b| b.id.as_str()).collect();
            for missing in batch_ids.iter().filter(|id| !found.contains(id.as_str())) {
                warn!(identifier, batch_id = %missing, "referenced batch not found, skipping");
            }
        }
        let batch_ids: Vec<String> = batches.iter().map(|b| b.id.clone()).collect();

        let mut stages = Vec::new();
        for join in self.store.batch_collections_by_batch_ids(&batch_ids)? {
            stages.push(self.collection_stage(join)?);
        }
        for join in self.store.quality_tests_by_batch_ids(&batch_ids)? {
            stages.push(self.quality_test_stage(join)?);
        }
        for join in self.store.processing_steps_by_batch_ids(&batch_ids)? {
            stages.push(self.processing_stage(join)?);
        }
        stages.sort_by(stage_order);

        let summary = JourneySummary::from_stages(&stages);
        debug!(
            identifier,
            total = summary.total_stages,
            verified = summary.verified_stages,
            "journey resolved"
        );
        Ok(Journey {
            identifier: identifier.to_string(),
            resolved_as,
            batches: batches.into_iter().map(|b| b.batch_id).collect(),
            stages,
            summary,
        })
    }

    fn collection_stage(&self, join: CollectionJoin) -> Result<Stage, LedgerError> {
        let complete = join.is_complete();
        let entity_id = join.link.collection_event_id.clone();
        let integrity = self.integrity(&entity_id, StageType::Collection, complete)?;
        if !complete {
            warn!(
                batch_id = %join.link.batch_id,
                collection_event_id = %entity_id,
                "collection stage has missing joined records"
            );
        }
        let CollectionJoin {
            link,
            event,
            collector_profile,
            herb,
            ..
        } = join;
        let timestamp = event
            .as_ref()
            .map(|e| e.collection_timestamp)
            .unwrap_or(link.created_at);
        Ok(Stage {
            metadata: StageMetadata::Collection(CollectionMetadata {
                batch_id: link.batch_id,
                collection_event_id: link.collection_event_id,
                contribution_percentage: link.contribution_percentage,
                herb_name: herb.as_ref().map(|h| h.local_name.clone()),
                botanical_name: herb.map(|h| h.botanical_name),
                collector_name: collector_profile.map(|p| p.full_name),
                plant_part: event.as_ref().map(|e| e.plant_part.clone()),
                quantity_kg: event.as_ref().map(|e| e.quantity_kg),
                location: event.map(|e| e.location),
            }),
            entity_id,
            timestamp,
            block_number: integrity.block_number,
            data_integrity: integrity.data_integrity,
            on_chain_verified: integrity.on_chain_verified,
        })
    }

    fn quality_test_stage(&self, join: QualityTestJoin) -> Result<Stage, LedgerError> {
        let QualityTestJoin { test, lab } = join;
        let integrity = self.integrity(&test.id, StageType::QualityTest, lab.is_some())?;
        Ok(Stage {
            entity_id: test.id.clone(),
            timestamp: test.test_date,
            block_number: integrity.block_number,
            data_integrity: integrity.data_integrity,
            on_chain_verified: integrity.on_chain_verified,
            metadata: StageMetadata::QualityTest(QualityTestMetadata {
                batch_id: test.batch_id,
                quality_test_id: test.id,
                lab_name: lab.map(|p| p.full_name),
                test_type: test.test_type,
                test_status: test.test_status,
                results: test.test_results,
                certificate_url: test.certificate_url,
            }),
        })
    }

    fn processing_stage(&self, join: ProcessingJoin) -> Result<Stage, LedgerError> {
        let ProcessingJoin { step, processor } = join;
        let integrity = self.integrity(&step.id, StageType::Processing, processor.is_some())?;
        Ok(Stage {
            entity_id: step.id.clone(),
            timestamp: step.process_date,
            block_number: integrity.block_number,
            data_integrity: integrity.data_integrity,
            on_chain_verified: integrity.on_chain_verified,
            metadata: StageMetadata::Processing(ProcessingMetadata {
                batch_id: step.batch_id,
                processing_step_id: step.id,
                processor_name: processor.map(|p| p.full_name),
                process_type: step.process_type,
                input_quantity_kg: step.input_quantity_kg,
                output_quantity_kg: step.output_quantity_kg,
            }),
        })
    }

    fn integrity(
        &self,
        entity_id: &str,
        stage_type: StageType,
        joined: bool,
    ) -> Result<Integrity, LedgerError> {
        let wanted = stage_type.documented_by();
        let blocks = self.store.blocks_by_entity(entity_id)?;
        let Some(block) = blocks.iter().find(|b| b.transaction_type() == wanted) else {
            debug!(entity_id, %wanted, "no documenting block");
            return Ok(Integrity {
                block_number: None,
                data_integrity: false,
                on_chain_verified: false,
            });
        };
        let data_integrity = joined && block.is_intact(&*self.hasher);
        let on_chain_verified = data_integrity && self.verifier.check_link(block)?;
        Ok(Integrity {
            block_number: Some(block.block_number),
            data_integrity,
            on_chain_verified,
        })
    }
}

/// Timestamp, then block number (stages without a block last), then
/// Collection < QualityTest < Processing, then batch and entity id.
fn stage_order(a: &Stage, b: &Stage) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| {
            a.block_number
                .unwrap_or(u64::MAX)
                .cmp(&b.block_number.unwrap_or(u64::MAX))
        })
        .then_with(|| a.stage_type().cmp(&b.stage_type()))
        .then_with(|| a.batch_id().cmp(b.batch_id()))
        .then_with(|| a.entity_id.cmp(&b.entity_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::Ledger,
        entity::{
            Batch, BatchCollection, BatchStatus, CollectionEvent, Collector, Entity, Herb,
            ProcessingStep, Product, Profile, QualityTest,
        },
        identifiers::{batch_code, qr_code, BatchQrPayload},
        transaction::{
            BatchCreated, CollectionRecorded, ProcessingStepRecorded, QualityTestRecorded,
            Transaction,
        },
        MemoryStore,
    };

    const T0: Timestamp = 1_700_000_000_000;

    struct Fixture {
        ledger: Ledger<MemoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = MemoryStore::with_entities([
                Entity::Herb(Herb {
                    id: "herb".into(),
                    botanical_name: "Withania somnifera".into(),
                    local_name: "Ashwagandha".into(),
                }),
                profile("p-collector", "Asha Devi", "collector"),
                profile("p-lab", "Green Labs", "lab"),
                profile("p-factory", "Vaidya Works", "manufacturer"),
                profile("p-agg", "Hill Aggregators", "aggregator"),
                Entity::Collector(Collector {
                    id: "collector".into(),
                    profile_id: "p-collector".into(),
                    collector_type: "individual".into(),
                }),
            ])
            .unwrap();
            Self {
                ledger: Ledger::new(Arc::new(store)),
            }
        }

        fn put(&self, entity: Entity) {
            self.ledger.store().put_entity(entity).unwrap();
        }

        fn collection(&self, id: &str, at: Timestamp, kg: f64) {
            self.put(Entity::CollectionEvent(CollectionEvent {
                id: id.into(),
                collector_id: "collector".into(),
                herb_id: "herb".into(),
                plant_part: "root".into(),
                quantity_kg: kg,
                location: GeoPoint {
                    latitude: 23.25,
                    longitude: 77.41,
                },
                collection_timestamp: at,
                initial_condition: Some("fresh".into()),
            }));
            self.ledger
                .append(
                    Transaction::CollectionRecorded(CollectionRecorded {
                        collection_event_id: id.into(),
                        herb_id: "herb".into(),
                        quantity_kg: kg,
                    }),
                    id,
                )
                .unwrap();
        }

        /// Creates a batch over `events` and returns its QR code.
        fn batch(&self, id: &str, events: &[&str], at: Timestamp) -> String {
            let code = batch_code(at);
            let qr = qr_code(&BatchQrPayload::new(&code, "herb"), at).unwrap();
            self.put(Entity::Batch(Batch {
                id: id.into(),
                batch_id: code.clone(),
                herb_id: "herb".into(),
                aggregator_id: "p-agg".into(),
                total_quantity_kg: 10.0,
                status: BatchStatus::Created,
                qr_code: Some(qr.clone()),
                creation_timestamp: at,
            }));
            for (i, event) in events.iter().enumerate() {
                self.put(Entity::BatchCollection(BatchCollection {
                    id: format!("{id}-link-{i}"),
                    batch_id: id.into(),
                    collection_event_id: event.to_string(),
                    contribution_percentage: 100.0 / events.len() as f64,
                    created_at: at,
                }));
            }
            self.ledger
                .append(
                    Transaction::BatchCreated(BatchCreated {
                        batch_id: code,
                        herb_id: "herb".into(),
                        total_quantity_kg: 10.0,
                        collections: events.len() as u32,
                        aggregator_id: Some("p-agg".into()),
                    }),
                    id,
                )
                .unwrap();
            qr
        }

        fn quality_test(&self, id: &str, batch: &str, at: Timestamp) {
            self.put(Entity::QualityTest(QualityTest {
                id: id.into(),
                batch_id: batch.into(),
                lab_id: "p-lab".into(),
                sample_id: format!("S-{id}"),
                test_type: "heavy_metals".into(),
                test_date: at,
                test_results: serde_json::json!({"lead_ppm": 0.4}),
                test_status: Some("passed".into()),
                certificate_url: None,
            }));
            self.ledger
                .append(
                    Transaction::QualityTest(QualityTestRecorded {
                        quality_test_id: id.into(),
                        batch_id: batch.into(),
                        lab_id: "p-lab".into(),
                        test_type: "heavy_metals".into(),
                        test_status: Some("passed".into()),
                    }),
                    id,
                )
                .unwrap();
        }

        fn processing(&self, id: &str, batch: &str, at: Timestamp) {
            self.put(Entity::ProcessingStep(ProcessingStep {
                id: id.into(),
                batch_id: batch.into(),
                processor_id: "p-factory".into(),
                process_type: "drying".into(),
                process_date: at,
                input_quantity_kg: 10.0,
                output_quantity_kg: Some(7.5),
                process_parameters: serde_json::Value::Null,
            }));
            self.ledger
                .append(
                    Transaction::ProcessingStep(ProcessingStepRecorded {
                        processing_step_id: id.into(),
                        batch_id: batch.into(),
                        processor_id: "p-factory".into(),
                        process_type: "drying".into(),
                        input_quantity_kg: 10.0,
                        output_quantity_kg: Some(7.5),
                    }),
                    id,
                )
                .unwrap();
        }
    }

    fn profile(id: &str, name: &str, role: &str) -> Entity {
        Entity::Profile(Profile {
            id: id.into(),
            full_name: name.into(),
            role: role.into(),
            organization: None,
            location: None,
        })
    }

    fn kinds(journey: &Journey) -> Vec<(StageType, Timestamp)> {
        journey
            .stages
            .iter()
            .map(|s| (s.stage_type(), s.timestamp))
            .collect()
    }

    #[test]
    fn collection_then_batch_resolves_to_one_verified_stage() {
        let fx = Fixture::new();
        fx.collection("A", T0, 10.0);
        let qr = fx.batch("B", &["A"], T0 + 1_000);

        let blocks = fx.ledger.store().blocks().unwrap();
        assert_eq!(blocks[0].entity_id, "A");
        assert_eq!(blocks[0].previous_hash, None);
        assert_eq!(blocks[1].block_number, 2);
        assert_eq!(blocks[1].previous_hash.as_ref(), Some(&blocks[0].block_hash));
        assert!(fx.ledger.verify().unwrap().is_valid);

        let journey = fx.ledger.resolve(&qr).unwrap();
        assert_eq!(journey.stages.len(), 1);
        assert_eq!(journey.summary.verification_status, VerificationStatus::Verified);
        assert_eq!(journey.stages[0].block_number, Some(1));
        assert!(journey.stages[0].data_integrity);
        assert!(journey.stages[0].on_chain_verified);
        assert_eq!(
            journey.resolved_as,
            ResolvedAs::Batch {
                batch_id: batch_code(T0 + 1_000)
            }
        );

        // the human batch code resolves to the same stages
        let by_code = fx.ledger.resolve(&batch_code(T0 + 1_000)).unwrap();
        assert_eq!(by_code.stages, journey.stages);
    }

    #[test]
    fn unknown_code_is_not_found() {
        let fx = Fixture::new();
        let err = fx.ledger.resolve("unknown-code").unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { ref identifier } if identifier == "unknown-code"));
    }

    #[test]
    fn stages_follow_event_time_across_types() {
        let fx = Fixture::new();
        // recorded out of event order on purpose
        fx.collection("late", T0 + 2_000, 4.0);
        fx.collection("early", T0 + 1_000, 6.0);
        let qr = fx.batch("B", &["late", "early"], T0 + 2_500);
        fx.quality_test("qt", "B", T0 + 3_000);

        let journey = fx.ledger.resolve(&qr).unwrap();
        assert_eq!(
            kinds(&journey),
            vec![
                (StageType::Collection, T0 + 1_000),
                (StageType::Collection, T0 + 2_000),
                (StageType::QualityTest, T0 + 3_000),
            ]
        );
        assert_eq!(journey.stages[0].entity_id, "early");
        assert_eq!(journey.summary.verified_stages, 3);
    }

    #[test]
    fn equal_timestamps_break_ties_by_block_number_then_type() {
        let fx = Fixture::new();
        fx.collection("c2", T0, 1.0);
        fx.collection("c1", T0, 1.0);
        fx.batch("B", &["c1", "c2"], T0);
        // no blocks for these two: they sort after blocked stages, by type
        fx.put(Entity::ProcessingStep(ProcessingStep {
            id: "ps".into(),
            batch_id: "B".into(),
            processor_id: "p-factory".into(),
            process_type: "grinding".into(),
            process_date: T0,
            input_quantity_kg: 1.0,
            output_quantity_kg: None,
            process_parameters: serde_json::Value::Null,
        }));
        fx.put(Entity::QualityTest(QualityTest {
            id: "qt".into(),
            batch_id: "B".into(),
            lab_id: "p-lab".into(),
            sample_id: "S".into(),
            test_type: "moisture".into(),
            test_date: T0,
            test_results: serde_json::Value::Null,
            test_status: None,
            certificate_url: None,
        }));

        let journey = fx.ledger.resolve(&batch_code(T0)).unwrap();
        let ids: Vec<&str> = journey.stages.iter().map(|s| s.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1", "qt", "ps"]);
        assert_eq!(journey.stages[2].block_number, None);
        assert!(!journey.stages[2].data_integrity);
        assert_eq!(
            journey.summary.verification_status,
            VerificationStatus::PartiallyVerified
        );
    }

    #[test]
    fn product_spans_all_its_batches() {
        let fx = Fixture::new();
        fx.collection("c1", T0, 5.0);
        fx.collection("c2", T0 + 10, 5.0);
        fx.batch("B1", &["c1"], T0 + 20);
        fx.batch("B2", &["c2"], T0 + 30);
        fx.quality_test("qt1", "B1", T0 + 40);
        fx.processing("ps1", "B2", T0 + 50);
        fx.put(Entity::Product(Product {
            id: "prod".into(),
            product_name: "Ashwagandha Churna".into(),
            product_type: "powder".into(),
            manufacturer_id: "p-factory".into(),
            // duplicate and dangling ids are tolerated
            batch_ids: vec!["B1".into(), "B2".into(), "B1".into(), "gone".into()],
            qr_code: "QR_abc123_1700000000999".into(),
            manufacturing_date: T0 + 60,
            expiry_date: None,
        }));

        let journey = fx.ledger.resolve("QR_abc123_1700000000999").unwrap();
        assert!(matches!(journey.resolved_as, ResolvedAs::Product { ref product_id, .. } if product_id == "prod"));
        assert_eq!(journey.batches.len(), 2);
        assert_eq!(
            kinds(&journey),
            vec![
                (StageType::Collection, T0),
                (StageType::Collection, T0 + 10),
                (StageType::QualityTest, T0 + 40),
                (StageType::Processing, T0 + 50),
            ]
        );
        assert_eq!(journey.summary.verification_status, VerificationStatus::Verified);
        match &journey.stages[3].metadata {
            StageMetadata::Processing(m) => {
                assert_eq!(m.processor_name.as_deref(), Some("Vaidya Works"));
                assert_eq!(m.output_quantity_kg, Some(7.5));
            }
            other => panic!("expected processing metadata, got {other:?}"),
        }
    }

    #[test]
    fn resolve_is_idempotent_and_sorted() {
        let fx = Fixture::new();
        for i in 0..6u64 {
            fx.collection(&format!("c{i}"), T0 + (i * 7919) % 5_000, 1.0);
        }
        let events: Vec<String> = (0..6).map(|i| format!("c{i}")).collect();
        let refs: Vec<&str> = events.iter().map(String::as_str).collect();
        let qr = fx.batch("B", &refs, T0 + 6_000);
        fx.quality_test("qt", "B", T0 + 2_000);

        let first = fx.ledger.resolve(&qr).unwrap();
        let second = fx.ledger.resolve(&qr).unwrap();
        assert_eq!(first, second);
        assert!(first.stages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn deleted_collection_event_degrades_only_its_stage() {
        let fx = Fixture::new();
        fx.collection("kept", T0, 3.0);
        fx.put(Entity::BatchCollection(BatchCollection {
            id: "dangling".into(),
            batch_id: "B".into(),
            collection_event_id: "deleted".into(),
            contribution_percentage: 50.0,
            created_at: T0 + 5,
        }));
        let qr = fx.batch("B", &["kept"], T0 + 10);

        let journey = fx.ledger.resolve(&qr).unwrap();
        assert_eq!(journey.stages.len(), 2);
        let dangling = journey
            .stages
            .iter()
            .find(|s| s.entity_id == "deleted")
            .unwrap();
        assert!(!dangling.data_integrity);
        assert!(!dangling.on_chain_verified);
        assert_eq!(dangling.timestamp, T0 + 5);
        assert_eq!(
            journey.summary.verification_status,
            VerificationStatus::PartiallyVerified
        );
    }

    #[test]
    fn tampered_payload_fails_integrity() {
        let fx = Fixture::new();
        fx.collection("c1", T0, 3.0);
        fx.collection("c2", T0 + 1, 3.0);
        let qr = fx.batch("B", &["c1", "c2"], T0 + 2);
        fx.ledger.store().tamper(1, |b| {
            if let Transaction::CollectionRecorded(p) = &mut b.transaction {
                p.quantity_kg = 300.0;
            }
        });

        let journey = fx.ledger.resolve(&qr).unwrap();
        assert!(!journey.stages[0].data_integrity);
        assert!(journey.stages[1].data_integrity);
        assert!(journey.stages[1].on_chain_verified);
        // linkage is untouched, so the chain itself still verifies
        assert!(fx.ledger.verify().unwrap().is_valid);
    }

    #[test]
    fn broken_link_clears_on_chain_flag_but_not_integrity() {
        let fx = Fixture::new();
        fx.collection("c1", T0, 3.0);
        fx.collection("c2", T0 + 1, 3.0);
        let qr = fx.batch("B", &["c1", "c2"], T0 + 2);
        fx.ledger.store().tamper(1, |b| b.block_hash = "0badc0de".into());

        let journey = fx.ledger.resolve(&qr).unwrap();
        let c2 = &journey.stages[1];
        assert_eq!(c2.entity_id, "c2");
        assert!(c2.data_integrity);
        assert!(!c2.on_chain_verified);
        assert_eq!(journey.summary.verification_status, VerificationStatus::Unverified);
    }

    #[test]
    fn empty_batch_is_unverified() {
        let fx = Fixture::new();
        let qr = fx.batch("B", &[], T0);
        let journey = fx.ledger.resolve(&qr).unwrap();
        assert!(journey.stages.is_empty());
        assert_eq!(journey.summary.total_stages, 0);
        assert_eq!(journey.summary.verification_status, VerificationStatus::Unverified);
    }

    #[test]
    fn journey_serializes_with_wire_names() {
        let fx = Fixture::new();
        fx.collection("c1", T0, 3.0);
        let qr = fx.batch("B", &["c1"], T0 + 2);
        let value = serde_json::to_value(fx.ledger.resolve(&qr).unwrap()).unwrap();
        assert_eq!(value["summary"]["verification_status"], "VERIFIED");
        assert_eq!(value["stages"][0]["stage_type"], "Collection");
        assert_eq!(value["stages"][0]["metadata"]["collector_name"], "Asha Devi");
        assert_eq!(value["stages"][0]["data_integrity"], true);
        assert_eq!(value["resolved_as"]["kind"], "batch");
    }
}
