//! Append-only execution history and the statistics derived from it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use roastery_core::{ExecutionOutcome, OperationKind, OperationStatus, ProductionContext};
use serde::{Deserialize, Serialize};

use super::operation::{OperationId, OperationType};

/// Immutable snapshot written when an execution or cancellation finishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: OperationId,
    pub name: String,
    pub operation_type: OperationType,
    pub kind: OperationKind,
    pub final_status: OperationStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ProductionContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_cost: Option<f64>,
}

/// History query. Every field is optional; date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoryFilter {
    #[serde(rename = "type")]
    pub operation_type: Option<OperationType>,
    pub status: Option<OperationStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    #[must_use]
    pub fn matches(&self, record: &HistoryRecord) -> bool {
        self.operation_type.is_none_or(|t| t == record.operation_type)
            && self.status.is_none_or(|s| s == record.final_status)
            && self.from.is_none_or(|from| record.timestamp >= from)
            && self.to.is_none_or(|to| record.timestamp <= to)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStatistics {
    pub total: usize,
    pub successful: usize,
    pub partial: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl TypeStatistics {
    fn count(&mut self, status: OperationStatus) {
        self.total += 1;
        match status {
            OperationStatus::Completed => self.successful += 1,
            OperationStatus::CompletedPartial => {
                self.successful += 1;
                self.partial += 1;
            }
            OperationStatus::Failed => self.failed += 1,
            OperationStatus::Cancelled => self.cancelled += 1,
            OperationStatus::Pending | OperationStatus::InProgress => {}
        }
    }
}

/// Aggregate counters over the whole history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total: usize,
    /// Completed plus partially completed runs.
    pub successful: usize,
    pub partial: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// `successful / total × 100`, two decimals; zero for an empty history.
    pub success_rate: f64,
    pub by_type: BTreeMap<OperationType, TypeStatistics>,
}

/// Append-only list of [`HistoryRecord`]s.
#[derive(Debug, Default)]
pub struct History {
    records: Vec<HistoryRecord>,
}

impl History {
    pub fn append(&mut self, record: HistoryRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Matching records, newest first, at most `limit`.
    #[must_use]
    pub fn query(&self, filter: &HistoryFilter, limit: usize) -> Vec<HistoryRecord> {
        self.records
            .iter()
            .rev()
            .filter(|record| filter.matches(record))
            .take(limit)
            .cloned()
            .collect()
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn statistics(&self) -> Statistics {
        let mut overall = TypeStatistics::default();
        let mut by_type: BTreeMap<OperationType, TypeStatistics> = BTreeMap::new();
        for record in &self.records {
            overall.count(record.final_status);
            by_type
                .entry(record.operation_type)
                .or_default()
                .count(record.final_status);
        }
        let success_rate = if overall.total == 0 {
            0.0
        } else {
            (overall.successful as f64 / overall.total as f64 * 10_000.0).round() / 100.0
        };
        Statistics {
            total: overall.total,
            successful: overall.successful,
            partial: overall.partial,
            failed: overall.failed,
            cancelled: overall.cancelled,
            success_rate,
            by_type,
        }
    }
}
