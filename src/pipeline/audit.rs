//! Append-only audit trail for generation events.
//!
//! Records carry a SHA-256 of the event payload, never the payload itself,
//! and each record links to the hash of the one before it.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hash of the first record's predecessor.
pub const GENESIS_HASH: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    SarGenerated,
    PiiLeakageDetected,
    GenerationFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SarGenerated => "SAR_GENERATED",
            Self::PiiLeakageDetected => "PII_LEAKAGE_DETECTED",
            Self::GenerationFailed => "GENERATION_FAILED",
        }
    }
}

/// Something worth recording. The payload must not contain PII values.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub report_id: String,
    pub payload: serde_json::Value,
}

impl AuditEvent {
    pub fn new(action: AuditAction, report_id: &str, payload: serde_json::Value) -> Self {
        Self {
            action,
            report_id: report_id.to_string(),
            payload,
        }
    }

    pub fn data_hash(&self) -> String {
        sha256_hex(self.payload.to_string().as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub report_id: String,
    pub data_hash: String,
    pub previous_hash: String,
}

impl AuditRecord {
    /// Hash that the next record points back to.
    pub fn chain_hash(&self) -> String {
        sha256_hex(
            format!(
                "{}|{}|{}|{}|{}",
                self.previous_hash,
                self.record_id,
                self.action.as_str(),
                self.report_id,
                self.data_hash
            )
            .as_bytes(),
        )
    }
}

/// Sink shared by concurrent pipelines. Appends only.
pub trait AuditSink: Send + Sync {
    fn append(&self, event: AuditEvent);
}

/// In-process chained log.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if every record points at its predecessor's chain hash.
    pub fn verify_chain(&self) -> bool {
        let records = self.records();
        let mut expected = GENESIS_HASH.to_string();
        for record in &records {
            if record.previous_hash != expected {
                return false;
            }
            expected = record.chain_hash();
        }
        true
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, event: AuditEvent) {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Read of the tail and push happen under one lock.
        let previous_hash = records
            .last()
            .map(AuditRecord::chain_hash)
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        records.push(AuditRecord {
            record_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action: event.action,
            report_id: event.report_id.clone(),
            data_hash: event.data_hash(),
            previous_hash,
        });
    }
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append(&self, event: AuditEvent) {
        tracing::info!(
            target: "sarscribe::audit",
            action = event.action.as_str(),
            report_id = %event.report_id,
            data_hash = %event.data_hash(),
            "Audit event"
        );
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
