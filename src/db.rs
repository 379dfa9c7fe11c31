use tracing::debug;

use crate::config::{DatabaseConfig, DatabaseTarget};
use crate::domain::{ObjectId, PropertyRecord};
use crate::error::BackfillError;
use crate::sql::{MysqlSession, SqlSession, SqliteSession, in_transaction};

pub const LEGACY_SENTINEL_PROPERTY: &str = "objectUUID";
pub const PACKAGE_PROPERTY: &str = "aipUUID";

const REQUIRED_TABLES: [&str; 2] = ["property", "property_i18n"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyProperty {
    pub property_id: i64,
    pub object_id: ObjectId,
}

pub struct DescriptiveDb {
    session: Box<dyn SqlSession>,
    culture: String,
}

impl DescriptiveDb {
    pub fn connect(config: &DatabaseConfig) -> Result<Self, BackfillError> {
        let session: Box<dyn SqlSession> = match &config.target {
            DatabaseTarget::Mysql(target) => Box::new(MysqlSession::connect(target)?),
            DatabaseTarget::Sqlite(path) => Box::new(SqliteSession::open(path)?),
        };
        Ok(Self::from_session(session, &config.culture))
    }

    pub fn open_in_memory() -> Result<Self, BackfillError> {
        Ok(Self::from_session(Box::new(SqliteSession::in_memory()?), "en"))
    }

    pub fn from_session(session: Box<dyn SqlSession>, culture: &str) -> Self {
        Self {
            session,
            culture: culture.to_string(),
        }
    }

    pub fn session(&self) -> &dyn SqlSession {
        self.session.as_ref()
    }

    pub fn culture(&self) -> &str {
        &self.culture
    }

    pub fn ping(&self) -> Result<(), BackfillError> {
        let unavailable = |err: BackfillError| BackfillError::DatabaseUnavailable(err.to_string());
        self.session.query("SELECT 1", &[]).map_err(unavailable)?;
        let exists = self.session.dialect().table_exists_query();
        for table in REQUIRED_TABLES {
            let found = self
                .session
                .query(exists, &[table.into()])
                .map_err(unavailable)?;
            if found.is_empty() {
                return Err(BackfillError::DatabaseUnavailable(format!(
                    "table {table} does not exist"
                )));
            }
        }
        Ok(())
    }

    /// One entry per object holding an unscoped sentinel; the lowest row id wins.
    pub fn legacy_properties(&self) -> Result<Vec<LegacyProperty>, BackfillError> {
        let rows = self.session.query(
            "
            SELECT MIN(id), object_id
            FROM property
            WHERE name = ? AND scope IS NULL
            GROUP BY object_id
            ORDER BY object_id
            ",
            &[LEGACY_SENTINEL_PROPERTY.into()],
        )?;
        rows.iter()
            .map(|row| {
                Ok(LegacyProperty {
                    property_id: row.int(0)?,
                    object_id: row.int(1)?,
                })
            })
            .collect()
    }

    pub fn property_value(&self, property_id: i64) -> Result<Option<String>, BackfillError> {
        let rows = self.session.query(
            "
            SELECT value FROM property_i18n
            WHERE id = ?
            ORDER BY CASE WHEN culture = ? THEN 0 ELSE 1 END
            LIMIT 1
            ",
            &[property_id.into(), self.culture.as_str().into()],
        )?;
        match rows.first() {
            Some(row) => row.opt_text(0),
            None => Ok(None),
        }
    }

    pub fn property_id(&self, object_id: ObjectId, name: &str) -> Result<Option<i64>, BackfillError> {
        let rows = self.session.query(
            "SELECT id FROM property WHERE object_id = ? AND name = ? ORDER BY id LIMIT 1",
            &[object_id.into(), name.into()],
        )?;
        rows.first().map(|row| row.int(0)).transpose()
    }

    pub fn delete_properties(&self, object_id: ObjectId) -> Result<u64, BackfillError> {
        let session = self.session();
        let deleted = in_transaction(session, || {
            session.execute(
                "DELETE FROM property_i18n WHERE id IN (SELECT id FROM property WHERE object_id = ?)",
                &[object_id.into()],
            )?;
            session.execute("DELETE FROM property WHERE object_id = ?", &[object_id.into()])
        })?;
        debug!(object_id, deleted, "flushed properties");
        Ok(deleted)
    }

    pub fn insert_property(&self, record: &PropertyRecord) -> Result<i64, BackfillError> {
        let session = self.session();
        in_transaction(session, || {
            session.execute(
                "INSERT INTO property (object_id, name, scope, source_culture) VALUES (?, ?, ?, ?)",
                &[
                    record.object_id.into(),
                    record.name.as_str().into(),
                    record.scope.as_deref().into(),
                    self.culture.as_str().into(),
                ],
            )?;
            let property_id = session.last_insert_id();
            session.execute(
                "INSERT INTO property_i18n (id, value, culture) VALUES (?, ?, ?)",
                &[
                    property_id.into(),
                    record.value.as_str().into(),
                    self.culture.as_str().into(),
                ],
            )?;
            Ok(property_id)
        })
    }

    pub fn properties(&self, object_id: ObjectId) -> Result<Vec<PropertyRecord>, BackfillError> {
        let rows = self.session.query(
            "
            SELECT p.object_id, p.scope, p.name, i.value
            FROM property p
            JOIN property_i18n i ON i.id = p.id
            WHERE p.object_id = ?
            ORDER BY p.id
            ",
            &[object_id.into()],
        )?;
        rows.iter()
            .map(|row| {
                Ok(PropertyRecord {
                    object_id: row.int(0)?,
                    scope: row.opt_text(1)?,
                    name: row.opt_text(2)?.unwrap_or_default(),
                    value: row.opt_text(3)?.unwrap_or_default(),
                })
            })
            .collect()
    }
}
