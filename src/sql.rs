use std::cell::RefCell;

use camino::Utf8Path;
use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Params};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, OpenFlags, ToSql};
use tracing::warn;

use crate::config::MysqlTarget;
use crate::error::BackfillError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Mysql,
}

impl Dialect {
    pub fn begin_statement(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "BEGIN",
            Dialect::Mysql => "START TRANSACTION",
        }
    }

    pub fn table_exists_query(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            Dialect::Mysql => {
                "SELECT table_name FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ?"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        SqlValue::Text(value.clone())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlRow(pub Vec<SqlValue>);

impl SqlRow {
    fn value(&self, index: usize) -> Result<&SqlValue, BackfillError> {
        self.0
            .get(index)
            .ok_or_else(|| BackfillError::Database(format!("no column at index {index}")))
    }

    pub fn int(&self, index: usize) -> Result<i64, BackfillError> {
        match self.value(index)? {
            SqlValue::Int(value) => Ok(*value),
            SqlValue::Text(text) => text.trim().parse().map_err(|_| {
                BackfillError::Database(format!("column {index} is not an integer: {text}"))
            }),
            SqlValue::Null => Err(BackfillError::Database(format!("column {index} is NULL"))),
        }
    }

    pub fn text(&self, index: usize) -> Result<String, BackfillError> {
        self.opt_text(index)?
            .ok_or_else(|| BackfillError::Database(format!("column {index} is NULL")))
    }

    pub fn opt_text(&self, index: usize) -> Result<Option<String>, BackfillError> {
        Ok(match self.value(index)? {
            SqlValue::Null => None,
            SqlValue::Int(value) => Some(value.to_string()),
            SqlValue::Text(text) => Some(text.clone()),
        })
    }
}

pub trait SqlSession {
    fn dialect(&self) -> Dialect;
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, BackfillError>;
    fn execute_batch(&self, sql: &str) -> Result<(), BackfillError>;
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, BackfillError>;
    fn last_insert_id(&self) -> i64;
}

pub fn in_transaction<T>(
    session: &dyn SqlSession,
    work: impl FnOnce() -> Result<T, BackfillError>,
) -> Result<T, BackfillError> {
    session.execute_batch(session.dialect().begin_statement())?;
    match work() {
        Ok(value) => {
            session.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = session.execute_batch("ROLLBACK") {
                warn!("rollback failed: {rollback}");
            }
            Err(err)
        }
    }
}

#[derive(Debug)]
pub struct SqliteSession {
    conn: Connection,
}

impl SqliteSession {
    /// Opens an existing database file; a missing file is an error, never created.
    pub fn open(path: &Utf8Path) -> Result<Self, BackfillError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path.as_std_path(), flags)
            .map_err(|err| BackfillError::DatabaseUnavailable(format!("{path}: {err}")))?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self, BackfillError> {
        let conn = Connection::open_in_memory()
            .map_err(|err| BackfillError::DatabaseUnavailable(err.to_string()))?;
        Ok(Self { conn })
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            SqlValue::Int(value) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*value)),
            SqlValue::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
        })
    }
}

impl SqlSession for SqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, BackfillError> {
        let changed = self
            .conn
            .execute(sql, rusqlite::params_from_iter(params.iter()))?;
        Ok(changed as u64)
    }

    fn execute_batch(&self, sql: &str) -> Result<(), BackfillError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, BackfillError> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns = stmt.column_count();
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            let mut values = Vec::with_capacity(columns);
            for index in 0..columns {
                values.push(match row.get_ref(index)? {
                    ValueRef::Null => SqlValue::Null,
                    ValueRef::Integer(value) => SqlValue::Int(value),
                    ValueRef::Real(value) => SqlValue::Text(value.to_string()),
                    ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                        SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
                    }
                });
            }
            Ok(SqlRow(values))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }
}

pub struct MysqlSession {
    conn: RefCell<Conn>,
}

impl MysqlSession {
    pub fn connect(target: &MysqlTarget) -> Result<Self, BackfillError> {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(target.host.clone()))
            .tcp_port(target.port)
            .user(Some(target.user.clone()))
            .pass(target.password.clone())
            .db_name(Some(target.name.clone()));
        let mut conn = Conn::new(opts).map_err(|err| {
            BackfillError::DatabaseUnavailable(format!(
                "{}@{}:{}/{}: {err}",
                target.user, target.host, target.port, target.name
            ))
        })?;
        conn.query_drop("SET NAMES utf8mb4")
            .map_err(|err| BackfillError::DatabaseUnavailable(err.to_string()))?;
        Ok(Self {
            conn: RefCell::new(conn),
        })
    }
}

fn mysql_params(params: &[SqlValue]) -> Params {
    if params.is_empty() {
        return Params::Empty;
    }
    Params::Positional(
        params
            .iter()
            .map(|value| match value {
                SqlValue::Null => mysql::Value::NULL,
                SqlValue::Int(value) => mysql::Value::Int(*value),
                SqlValue::Text(text) => mysql::Value::Bytes(text.as_bytes().to_vec()),
            })
            .collect(),
    )
}

fn from_mysql(value: &mysql::Value) -> SqlValue {
    match value {
        mysql::Value::NULL => SqlValue::Null,
        mysql::Value::Int(value) => SqlValue::Int(*value),
        mysql::Value::UInt(value) => match i64::try_from(*value) {
            Ok(value) => SqlValue::Int(value),
            Err(_) => SqlValue::Text(value.to_string()),
        },
        mysql::Value::Bytes(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        other => SqlValue::Text(other.as_sql(true).trim_matches('\'').to_string()),
    }
}

fn mysql_error(err: mysql::Error) -> BackfillError {
    BackfillError::Database(err.to_string())
}

impl SqlSession for MysqlSession {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, BackfillError> {
        let mut conn = self.conn.borrow_mut();
        conn.exec_drop(sql, mysql_params(params))
            .map_err(mysql_error)?;
        Ok(conn.affected_rows())
    }

    fn execute_batch(&self, sql: &str) -> Result<(), BackfillError> {
        let mut conn = self.conn.borrow_mut();
        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            conn.query_drop(statement).map_err(mysql_error)?;
        }
        Ok(())
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, BackfillError> {
        let mut conn = self.conn.borrow_mut();
        let rows: Vec<mysql::Row> = conn.exec(sql, mysql_params(params)).map_err(mysql_error)?;
        Ok(rows
            .iter()
            .map(|row| {
                SqlRow(
                    (0..row.len())
                        .map(|index| row.as_ref(index).map(from_mysql).unwrap_or(SqlValue::Null))
                        .collect(),
                )
            })
            .collect())
    }

    fn last_insert_id(&self) -> i64 {
        self.conn.borrow().last_insert_id() as i64
    }
}
