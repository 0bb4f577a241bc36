//! The closed transaction taxonomy and one payload shape per transaction type.

use serde::{Deserialize, Serialize, Serializer};
use std::{fmt, str::FromStr};

use crate::{entity::BatchStatus, error::LedgerError};

/// Names of the transaction types as they appear in `transaction_type`.
///
/// The set only grows; existing names are never repurposed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "COLLECTION_RECORDED")]
    CollectionRecorded,
    #[serde(rename = "BATCH_CREATED")]
    BatchCreated,
    #[serde(rename = "BATCH_SENT_TO_LAB")]
    BatchSentToLab,
    #[serde(rename = "QualityTest")]
    QualityTest,
    #[serde(rename = "ProcessingStep")]
    ProcessingStep,
    #[serde(rename = "HANDOFF_RECORDED")]
    HandoffRecorded,
}

impl TransactionType {
    pub const ALL: [TransactionType; 6] = [
        TransactionType::CollectionRecorded,
        TransactionType::BatchCreated,
        TransactionType::BatchSentToLab,
        TransactionType::QualityTest,
        TransactionType::ProcessingStep,
        TransactionType::HandoffRecorded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::CollectionRecorded => "COLLECTION_RECORDED",
            TransactionType::BatchCreated => "BATCH_CREATED",
            TransactionType::BatchSentToLab => "BATCH_SENT_TO_LAB",
            TransactionType::QualityTest => "QualityTest",
            TransactionType::ProcessingStep => "ProcessingStep",
            TransactionType::HandoffRecorded => "HANDOFF_RECORDED",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| LedgerError::UnknownTransactionType(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionRecorded {
    pub collection_event_id: String,
    pub herb_id: String,
    pub quantity_kg: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchCreated {
    /// Human batch code, `BATCH_<millis>`.
    pub batch_id: String,
    pub herb_id: String,
    pub total_quantity_kg: f64,
    pub collections: u32,
    #[serde(default)]
    pub aggregator_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSentToLab {
    pub batch_id: String,
    pub status: BatchStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualityTestRecorded {
    pub quality_test_id: String,
    pub batch_id: String,
    pub lab_id: String,
    pub test_type: String,
    #[serde(default)]
    pub test_status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessingStepRecorded {
    pub processing_step_id: String,
    pub batch_id: String,
    pub processor_id: String,
    pub process_type: String,
    pub input_quantity_kg: f64,
    #[serde(default)]
    pub output_quantity_kg: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandoffRecorded {
    pub handoff_id: String,
    pub from_entity_id: String,
    pub to_entity_id: String,
    pub item_id: String,
    pub item_type: String,
    #[serde(default)]
    pub quantity: Option<f64>,
}

/// A transaction: the type tag plus its payload.
///
/// Payloads reject keys they do not declare, so everything submitted is hashed.
///
/// Serialized as `{"transaction_type": ..., "transaction_data": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transaction_type", content = "transaction_data")]
pub enum Transaction {
    #[serde(rename = "COLLECTION_RECORDED")]
    CollectionRecorded(CollectionRecorded),
    #[serde(rename = "BATCH_CREATED")]
    BatchCreated(BatchCreated),
    #[serde(rename = "BATCH_SENT_TO_LAB")]
    BatchSentToLab(BatchSentToLab),
    #[serde(rename = "QualityTest")]
    QualityTest(QualityTestRecorded),
    #[serde(rename = "ProcessingStep")]
    ProcessingStep(ProcessingStepRecorded),
    #[serde(rename = "HANDOFF_RECORDED")]
    HandoffRecorded(HandoffRecorded),
}

impl Transaction {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Transaction::CollectionRecorded(_) => TransactionType::CollectionRecorded,
            Transaction::BatchCreated(_) => TransactionType::BatchCreated,
            Transaction::BatchSentToLab(_) => TransactionType::BatchSentToLab,
            Transaction::QualityTest(_) => TransactionType::QualityTest,
            Transaction::ProcessingStep(_) => TransactionType::ProcessingStep,
            Transaction::HandoffRecorded(_) => TransactionType::HandoffRecorded,
        }
    }

    /// Builds a transaction from a type name and an untyped payload.
    pub fn from_parts(
        transaction_type: &str,
        transaction_data: serde_json::Value,
    ) -> Result<Self, LedgerError> {
        let ty: TransactionType = transaction_type.parse()?;
        let tagged = serde_json::json!({
            "transaction_type": ty.as_str(),
            "transaction_data": transaction_data,
        });
        serde_json::from_value(tagged).map_err(|e| LedgerError::InvalidTransactionData {
            transaction_type: ty.to_string(),
            reason: e.to_string(),
        })
    }

    /// The payload alone, as it appears under `transaction_data`.
    pub fn data(&self) -> TransactionData<'_> {
        TransactionData(self)
    }
}

/// Serializes only the payload of a [`Transaction`], without its tag.
pub struct TransactionData<'a>(&'a Transaction);

impl Serialize for TransactionData<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Transaction::CollectionRecorded(p) => p.serialize(serializer),
            Transaction::BatchCreated(p) => p.serialize(serializer),
            Transaction::BatchSentToLab(p) => p.serialize(serializer),
            Transaction::QualityTest(p) => p.serialize(serializer),
            Transaction::ProcessingStep(p) => p.serialize(serializer),
            Transaction::HandoffRecorded(p) => p.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_round_trip_through_from_str() {
        for ty in TransactionType::ALL {
            assert_eq!(ty.as_str().parse::<TransactionType>().unwrap(), ty);
        }
        assert!(matches!(
            "BATCH_DELETED".parse::<TransactionType>(),
            Err(LedgerError::UnknownTransactionType(t)) if t == "BATCH_DELETED"
        ));
    }

    #[test]
    fn transaction_serializes_adjacently_tagged() {
        let tx = Transaction::BatchSentToLab(BatchSentToLab {
            batch_id: "b-1".into(),
            status: BatchStatus::LabTesting,
        });
        let json = serde_json::to_string(&tx).unwrap();
        assert_eq!(
            json,
            r#"{"transaction_type":"BATCH_SENT_TO_LAB","transaction_data":{"batch_id":"b-1","status":"lab_testing"}}"#
        );
        let data = serde_json::to_string(&tx.data()).unwrap();
        assert_eq!(data, r#"{"batch_id":"b-1","status":"lab_testing"}"#);
    }

    #[test]
    fn from_parts_rejects_unknown_type_and_bad_payload() {
        let ok = Transaction::from_parts(
            "COLLECTION_RECORDED",
            serde_json::json!({"collection_event_id": "c1", "herb_id": "h1", "quantity_kg": 2.5}),
        )
        .unwrap();
        assert_eq!(ok.transaction_type(), TransactionType::CollectionRecorded);

        assert!(Transaction::from_parts("MINTED", serde_json::json!({})).is_err());
        assert!(matches!(
            Transaction::from_parts("QualityTest", serde_json::json!({"lab": 1})),
            Err(LedgerError::InvalidTransactionData { transaction_type, .. }) if transaction_type == "QualityTest"
        ));
    }

    #[test]
    fn from_parts_rejects_undeclared_fields() {
        let err = Transaction::from_parts(
            "BATCH_SENT_TO_LAB",
            serde_json::json!({"batch_id": "b1", "status": "lab_testing", "lab_id": "lab-7", "notes": "urgent"}),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransactionData { ref transaction_type, ref reason }
                if transaction_type == "BATCH_SENT_TO_LAB" && reason.contains("unknown field")
        ));

        // optional fields may still be left out
        let tx = Transaction::from_parts(
            "HANDOFF_RECORDED",
            serde_json::json!({
                "handoff_id": "h1", "from_entity_id": "a", "to_entity_id": "b",
                "item_id": "b1", "item_type": "batch"
            }),
        )
        .unwrap();
        assert!(matches!(tx, Transaction::HandoffRecorded(HandoffRecorded { quantity: None, .. })));
    }
}
