use super::format::FormattedValue;
use crate::trace::ScopeBinding;
use serde::{Deserialize, Serialize};

/// One annotation: what a traced line produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub line_number: u32,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FormattedValue>,
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl AnnotationRecord {
    pub fn value(line_number: u32, source: impl Into<String>, value: FormattedValue) -> Self {
        Self {
            line_number,
            source: source.into(),
            value: Some(value),
            error: false,
            error_detail: None,
        }
    }

    /// A record whose value is filled in later.
    pub fn pending(line_number: u32, source: impl Into<String>) -> Self {
        Self {
            line_number,
            source: source.into(),
            value: None,
            error: false,
            error_detail: None,
        }
    }

    pub fn error(line_number: u32, source: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            line_number,
            source: source.into(),
            value: None,
            error: true,
            error_detail: Some(detail.into()),
        }
    }
}

/// Records of one run in execution order. An error record, when present, is
/// the last one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationLog {
    records: Vec<AnnotationRecord>,
}

impl AnnotationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: AnnotationRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&AnnotationRecord> {
        self.records.last()
    }

    pub fn has_error(&self) -> bool {
        self.records.last().is_some_and(|record| record.error)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AnnotationRecord> {
        self.records.iter()
    }

    /// The log as a JSON array.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.records).unwrap_or_else(|_| "[]".to_string())
    }
}

impl<'a> IntoIterator for &'a AnnotationLog {
    type Item = &'a AnnotationRecord;
    type IntoIter = std::slice::Iter<'a, AnnotationRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// An assignment macro waiting for its right-hand side to finish running.
#[derive(Debug, Clone)]
pub struct PendingEvaluation {
    /// Target text as written, e.g. `x` or `a, b`.
    pub targets: String,
    pub originating_depth: usize,
    /// Record to complete with the target's value once resolved.
    pub originating_record: AnnotationRecord,
    /// Live bindings of the frame that queued the evaluation.
    pub scope: ScopeBinding,
}
