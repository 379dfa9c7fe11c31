use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::domain::ObjectId;
use crate::error::{BackfillError, ErrorKind};

#[derive(Debug, Clone, Serialize)]
pub struct RecordedError {
    pub kind: ErrorKind,
    pub object_id: Option<ObjectId>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorLog {
    entries: Vec<RecordedError>,
}

impl ErrorLog {
    pub fn record(&mut self, object_id: Option<ObjectId>, error: &BackfillError) {
        let kind = error.kind();
        match object_id {
            Some(object_id) => warn!(object_id, %kind, "{error}"),
            None => warn!(%kind, "{error}"),
        }
        self.entries.push(RecordedError {
            kind,
            object_id,
            message: error.to_string(),
        });
    }

    pub fn record_all(&mut self, object_id: Option<ObjectId>, errors: &[BackfillError]) {
        for error in errors {
            self.record(object_id, error);
        }
    }

    pub fn merge(&mut self, other: ErrorLog) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RecordedError] {
        &self.entries
    }

    pub fn count_of(&self, kind: ErrorKind) -> usize {
        self.entries.iter().filter(|entry| entry.kind == kind).count()
    }

    pub fn by_kind(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.kind).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub identified: usize,
    pub staged: usize,
    pub materialized: usize,
    pub failed: usize,
    pub properties_written: usize,
    pub error_count: usize,
    pub errors_by_kind: BTreeMap<ErrorKind, usize>,
    pub errors: ErrorLog,
}

impl RunSummary {
    pub fn count_of(&self, kind: ErrorKind) -> usize {
        self.errors.count_of(kind)
    }
}
