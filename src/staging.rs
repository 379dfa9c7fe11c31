use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::domain::{ExtractedFields, LegacyObjectRecord, ObjectId, RecordStatus};
use crate::error::BackfillError;
use crate::sql::{Dialect, SqlRow, SqlSession, SqlValue};

pub const WORKING_TABLE: &str = "dip_files";
pub const EVENT_TABLE: &str = "dip_file_events";

const SQLITE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS dip_files (
        object_id INTEGER PRIMARY KEY,
        object_uuid TEXT NOT NULL,
        aip_uuid TEXT NOT NULL,
        extracted_fields TEXT,
        status TEXT NOT NULL DEFAULT 'STAGED'
    );
    CREATE INDEX IF NOT EXISTS idx_dip_files_status_aip
        ON dip_files(status, aip_uuid);
    CREATE TABLE IF NOT EXISTS dip_file_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        object_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        detail TEXT,
        recorded_at TEXT NOT NULL
    );
"#;

const MYSQL_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS dip_files (
        object_id BIGINT NOT NULL PRIMARY KEY,
        object_uuid VARCHAR(255) NOT NULL,
        aip_uuid VARCHAR(255) NOT NULL,
        extracted_fields LONGTEXT,
        status VARCHAR(16) NOT NULL DEFAULT 'STAGED',
        INDEX idx_dip_files_status_aip (status, aip_uuid)
    ) DEFAULT CHARSET = utf8mb4;
    CREATE TABLE IF NOT EXISTS dip_file_events (
        id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        object_id BIGINT NOT NULL,
        status VARCHAR(16) NOT NULL,
        detail TEXT,
        recorded_at VARCHAR(40) NOT NULL
    ) DEFAULT CHARSET = utf8mb4;
"#;

const RECORD_COLUMNS: &str = "object_id, object_uuid, aip_uuid, extracted_fields, status";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts(pub BTreeMap<RecordStatus, usize>);

impl StatusCounts {
    pub fn get(&self, status: RecordStatus) -> usize {
        self.0.get(&status).copied().unwrap_or(0)
    }

    pub fn pending(&self) -> usize {
        self.0
            .iter()
            .filter(|(status, _)| !status.is_terminal())
            .map(|(_, count)| count)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    pub object_id: ObjectId,
    pub status: RecordStatus,
    pub detail: Option<String>,
    pub recorded_at: String,
}

pub struct StagingStore<'a> {
    session: &'a dyn SqlSession,
}

impl<'a> StagingStore<'a> {
    pub fn new(session: &'a dyn SqlSession) -> Self {
        Self { session }
    }

    pub fn init(&self) -> Result<(), BackfillError> {
        let schema = match self.session.dialect() {
            Dialect::Sqlite => SQLITE_SCHEMA,
            Dialect::Mysql => MYSQL_SCHEMA,
        };
        self.session.execute_batch(schema)?;
        debug!("working tables initialized");
        Ok(())
    }

    pub fn teardown(&self) -> Result<(), BackfillError> {
        self.session.execute_batch(
            "DROP TABLE IF EXISTS dip_file_events; DROP TABLE IF EXISTS dip_files;",
        )?;
        Ok(())
    }

    /// Stages an object. Existing rows keep their progress; only a row that is
    /// still `STAGED` has its identifiers refreshed. Returns `true` for a new row.
    pub fn upsert_staged(
        &self,
        object_id: ObjectId,
        object_uuid: &str,
        package_uuid: &str,
    ) -> Result<bool, BackfillError> {
        if self.get(object_id)?.is_some() {
            self.session.execute(
                "UPDATE dip_files SET object_uuid = ?, aip_uuid = ? WHERE object_id = ? AND status = ?",
                &[
                    object_uuid.into(),
                    package_uuid.into(),
                    object_id.into(),
                    RecordStatus::Staged.as_str().into(),
                ],
            )?;
            return Ok(false);
        }
        self.session.execute(
            "INSERT INTO dip_files (object_id, object_uuid, aip_uuid, status) VALUES (?, ?, ?, ?)",
            &[
                object_id.into(),
                object_uuid.into(),
                package_uuid.into(),
                RecordStatus::Staged.as_str().into(),
            ],
        )?;
        self.log_event(object_id, RecordStatus::Staged, None)?;
        Ok(true)
    }

    pub fn get(&self, object_id: ObjectId) -> Result<Option<LegacyObjectRecord>, BackfillError> {
        let mut records = self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM dip_files WHERE object_id = ?"),
            &[object_id.into()],
        )?;
        Ok(records.pop())
    }

    pub fn all(&self) -> Result<Vec<LegacyObjectRecord>, BackfillError> {
        self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM dip_files ORDER BY object_id"),
            &[],
        )
    }

    pub fn next_unprocessed_package(
        &self,
        skip: &HashSet<String>,
    ) -> Result<Option<String>, BackfillError> {
        let rows = self.session.query(
            "
            SELECT aip_uuid FROM dip_files
            WHERE status = ?
            GROUP BY aip_uuid
            ORDER BY MIN(object_id)
            ",
            &[RecordStatus::Staged.as_str().into()],
        )?;
        for row in rows {
            let package_uuid = row.text(0)?;
            if !skip.contains(&package_uuid) {
                return Ok(Some(package_uuid));
            }
        }
        Ok(None)
    }

    pub fn staged_for_package(
        &self,
        package_uuid: &str,
    ) -> Result<Vec<LegacyObjectRecord>, BackfillError> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM dip_files WHERE status = ? AND aip_uuid = ? ORDER BY object_id"
            ),
            &[RecordStatus::Staged.as_str().into(), package_uuid.into()],
        )
    }

    pub fn parsed_records(&self) -> Result<Vec<LegacyObjectRecord>, BackfillError> {
        self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM dip_files WHERE status = ? ORDER BY object_id"),
            &[RecordStatus::Parsed.as_str().into()],
        )
    }

    pub fn record_extraction(
        &self,
        object_id: ObjectId,
        fields: &ExtractedFields,
    ) -> Result<(), BackfillError> {
        let json = serde_json::to_string(fields)
            .map_err(|err| BackfillError::Database(err.to_string()))?;
        let changed = self.session.execute(
            "UPDATE dip_files SET extracted_fields = ?, status = ? WHERE object_id = ? AND status = ?",
            &[
                json.into(),
                RecordStatus::Parsed.as_str().into(),
                object_id.into(),
                RecordStatus::Staged.as_str().into(),
            ],
        )?;
        if changed == 0 {
            return Err(self.transition_error(object_id, RecordStatus::Parsed));
        }
        self.log_event(object_id, RecordStatus::Parsed, None)
    }

    pub fn advance(
        &self,
        object_id: ObjectId,
        from: RecordStatus,
        to: RecordStatus,
        detail: Option<&str>,
    ) -> Result<(), BackfillError> {
        if !from.can_advance_to(to) {
            return Err(BackfillError::InvalidTransition {
                object_id,
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let changed = self.session.execute(
            "UPDATE dip_files SET status = ? WHERE object_id = ? AND status = ?",
            &[to.as_str().into(), object_id.into(), from.as_str().into()],
        )?;
        if changed == 0 {
            return Err(self.transition_error(object_id, to));
        }
        self.log_event(object_id, to, detail)
    }

    pub fn status_counts(&self) -> Result<StatusCounts, BackfillError> {
        let rows = self
            .session
            .query("SELECT status, COUNT(*) FROM dip_files GROUP BY status", &[])?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let status = row.text(0)?.parse::<RecordStatus>()?;
            counts.insert(status, row.int(1)? as usize);
        }
        Ok(StatusCounts(counts))
    }

    pub fn events(&self, object_id: ObjectId) -> Result<Vec<TransitionEvent>, BackfillError> {
        let rows = self.session.query(
            "
            SELECT object_id, status, detail, recorded_at
            FROM dip_file_events WHERE object_id = ?
            ORDER BY id
            ",
            &[object_id.into()],
        )?;
        rows.iter()
            .map(|row| {
                Ok(TransitionEvent {
                    object_id: row.int(0)?,
                    status: row.text(1)?.parse()?,
                    detail: row.opt_text(2)?,
                    recorded_at: row.text(3)?,
                })
            })
            .collect()
    }

    fn log_event(
        &self,
        object_id: ObjectId,
        status: RecordStatus,
        detail: Option<&str>,
    ) -> Result<(), BackfillError> {
        self.session.execute(
            "INSERT INTO dip_file_events (object_id, status, detail, recorded_at) VALUES (?, ?, ?, ?)",
            &[
                object_id.into(),
                status.as_str().into(),
                detail.into(),
                Utc::now().to_rfc3339().into(),
            ],
        )?;
        Ok(())
    }

    fn transition_error(&self, object_id: ObjectId, to: RecordStatus) -> BackfillError {
        let from = match self.get(object_id) {
            Ok(Some(record)) => record.status.to_string(),
            Ok(None) => "UNSTAGED".to_string(),
            Err(err) => return err,
        };
        BackfillError::InvalidTransition {
            object_id,
            from,
            to: to.to_string(),
        }
    }

    fn query_records(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<LegacyObjectRecord>, BackfillError> {
        self.session
            .query(sql, params)?
            .iter()
            .map(record_from_row)
            .collect()
    }
}

fn record_from_row(row: &SqlRow) -> Result<LegacyObjectRecord, BackfillError> {
    let extracted_fields = row
        .opt_text(3)?
        .map(|json| {
            serde_json::from_str::<ExtractedFields>(&json)
                .map_err(|err| BackfillError::Database(err.to_string()))
        })
        .transpose()?;
    Ok(LegacyObjectRecord {
        object_id: row.int(0)?,
        object_uuid: row.text(1)?,
        package_uuid: row.text(2)?,
        extracted_fields,
        status: row.text(4)?.parse()?,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    use crate::sql::SqliteSession;

    fn store(session: &SqliteSession) -> StagingStore<'_> {
        let store = StagingStore::new(session);
        store.init().unwrap();
        store
    }

    #[test]
    fn upsert_is_idempotent() {
        let session = SqliteSession::in_memory().unwrap();
        let staging = store(&session);
        assert!(staging.upsert_staged(42, "abc-111", "pkg-9").unwrap());
        assert!(!staging.upsert_staged(42, "abc-111", "pkg-9").unwrap());
        assert_eq!(staging.all().unwrap().len(), 1);
        assert_eq!(staging.events(42).unwrap().len(), 1);
    }

    #[test]
    fn upsert_never_regresses_progress() {
        let session = SqliteSession::in_memory().unwrap();
        let staging = store(&session);
        staging.upsert_staged(7, "abc", "pkg").unwrap();
        staging
            .record_extraction(7, &ExtractedFields::default())
            .unwrap();
        staging.upsert_staged(7, "other", "pkg-2").unwrap();

        let record = staging.get(7).unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Parsed);
        assert_eq!(record.object_uuid, "abc");
        assert_eq!(record.extracted_fields, Some(ExtractedFields::default()));
    }

    #[test]
    fn next_package_follows_lowest_object_and_skips_visited() {
        let session = SqliteSession::in_memory().unwrap();
        let staging = store(&session);
        staging.upsert_staged(3, "c", "pkg-b").unwrap();
        staging.upsert_staged(1, "a", "pkg-a").unwrap();
        staging.upsert_staged(2, "b", "pkg-b").unwrap();

        let mut skip = HashSet::new();
        assert_eq!(
            staging.next_unprocessed_package(&skip).unwrap().as_deref(),
            Some("pkg-a")
        );
        skip.insert("pkg-a".to_string());
        assert_eq!(
            staging.next_unprocessed_package(&skip).unwrap().as_deref(),
            Some("pkg-b")
        );
        assert_eq!(staging.staged_for_package("pkg-b").unwrap().len(), 2);
    }

    #[test]
    fn terminal_records_cannot_move() {
        let session = SqliteSession::in_memory().unwrap();
        let staging = store(&session);
        staging.upsert_staged(5, "e", "pkg").unwrap();
        staging
            .advance(5, RecordStatus::Staged, RecordStatus::Failed, Some("gone"))
            .unwrap();

        let err = staging
            .record_extraction(5, &ExtractedFields::default())
            .unwrap_err();
        assert_matches!(err, BackfillError::InvalidTransition { .. });

        let err = staging
            .advance(5, RecordStatus::Failed, RecordStatus::Parsed, None)
            .unwrap_err();
        assert_matches!(err, BackfillError::InvalidTransition { .. });

        let counts = staging.status_counts().unwrap();
        assert_eq!(counts.get(RecordStatus::Failed), 1);
        assert_eq!(counts.pending(), 0);
        let events = staging.events(5).unwrap();
        assert_eq!(events.last().unwrap().detail.as_deref(), Some("gone"));
    }
}
