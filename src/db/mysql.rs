use std::future::Future;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, warn};
use sqlx::{
    mysql::{MySqlArguments, MySqlConnectOptions, MySqlPoolOptions, MySqlRow},
    query::Query,
    MySql, MySqlPool, Row, TypeInfo, ValueRef,
};

use crate::{
    errors::DbError,
    models::{
        schema::{ColumnDefinition, ForeignKeyRef, IndexColumn},
        value::SqlValue,
    },
};

use super::{DbClient, Transaction};

pub struct MySqlClient {
    pub pool: MySqlPool,
}

impl MySqlClient {
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Builds a pool that opens connections on first use, so an unreachable
    /// environment surfaces through `test_connection` instead of at startup.
    pub fn connect_lazy(options: MySqlConnectOptions) -> Self {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect_lazy_with(options);

        Self { pool }
    }

    async fn clear_with(&self, statement: &str) -> Result<(), DbError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        sqlx::query("SET FOREIGN_KEY_CHECKS = 0")
            .execute(&mut *conn)
            .await
            .map_err(DbError::classify)?;

        let cleared = sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(DbError::classify);

        // Restored on the same connection before it goes back to the pool.
        let restored = sqlx::query("SET FOREIGN_KEY_CHECKS = 1")
            .execute(&mut *conn)
            .await
            .map_err(DbError::classify);

        if restored.is_err() {
            conn.close().await.ok();
        }

        cleared?;
        restored?;
        Ok(())
    }
}

/// Reads a text column, tolerating servers that report metadata as binary strings.
fn get_text(row: &MySqlRow, column: &str) -> Result<String, DbError> {
    get_optional_text(row, column)?
        .ok_or_else(|| DbError::Decode(format!("column {} is NULL", column)))
}

fn get_optional_text(row: &MySqlRow, column: &str) -> Result<Option<String>, DbError> {
    match row.try_get::<Option<String>, _>(column) {
        Ok(value) => Ok(value),
        Err(_) => row
            .try_get::<Option<Vec<u8>>, _>(column)
            .map(|bytes| bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
            .map_err(|e| DbError::Decode(format!("{}: {}", column, e))),
    }
}

fn decode_value(row: &MySqlRow, index: usize) -> Result<SqlValue, DbError> {
    let raw = row.try_get_raw(index).map_err(DbError::Sqlx)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let type_name = raw.type_info().name().to_uppercase();
    let base_type = type_name.trim_end_matches(" UNSIGNED");

    let typed = match base_type {
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            let signed = || row.try_get::<i64, _>(index).map(SqlValue::Int);
            let unsigned = || row.try_get::<u64, _>(index).map(SqlValue::UInt);
            if type_name.ends_with("UNSIGNED") {
                unsigned().or_else(|_| signed())
            } else {
                signed().or_else(|_| unsigned())
            }
        }
        "YEAR" => row.try_get_unchecked::<i64, _>(index).map(SqlValue::Int),
        "FLOAT" => row.try_get::<f32, _>(index).map(|v| SqlValue::Float(v as f64)),
        "DOUBLE" => row.try_get::<f64, _>(index).map(SqlValue::Float),
        "DECIMAL" => row.try_get_unchecked::<String, _>(index).map(SqlValue::Decimal),
        "DATE" => row.try_get::<NaiveDate, _>(index).map(SqlValue::Date),
        // NaiveTime would drop the day part of values past 24h.
        "TIME" => {
            let bytes = row.try_get_unchecked::<&[u8], _>(index)?;
            return decode_binary_time(bytes).ok_or_else(|| {
                DbError::Decode(format!("{} (TIME): malformed value", index))
            });
        }
        "DATETIME" | "TIMESTAMP" => row.try_get::<NaiveDateTime, _>(index).map(SqlValue::DateTime),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => row.try_get::<Vec<u8>, _>(index).map(SqlValue::Bytes),
        _ => row.try_get::<String, _>(index).map(SqlValue::Text),
    };

    match typed {
        Ok(value) => Ok(value),
        Err(err) => {
            debug!("Typed decode of column {} ({}) failed: {}", index, type_name, err);
            if let Some(zero) = zero_temporal(base_type) {
                let bytes = row.try_get_unchecked::<&[u8], _>(index)?;
                if bytes.first().map_or(true, |len| *len == 0) {
                    return Ok(SqlValue::Text(zero.to_string()));
                }
            }
            row.try_get_unchecked::<String, _>(index)
                .map(SqlValue::Text)
                .map_err(|e| DbError::Decode(format!("{} ({}): {}", index, type_name, e)))
        }
    }
}

/// The literal MySQL stores for an all-zero value of a temporal type.
fn zero_temporal(type_name: &str) -> Option<&'static str> {
    match type_name {
        "DATE" => Some("0000-00-00"),
        "DATETIME" | "TIMESTAMP" => Some("0000-00-00 00:00:00"),
        _ => None,
    }
}

/// Decodes a binary-protocol TIME: length, sign, days, hours, minutes,
/// seconds and optional microseconds. Values inside one day become
/// `SqlValue::Time`, anything else keeps its `[-]HHH:MM:SS[.ffffff]` text.
fn decode_binary_time(bytes: &[u8]) -> Option<SqlValue> {
    let (&len, rest) = bytes.split_first()?;
    if len == 0 {
        return NaiveTime::from_hms_opt(0, 0, 0).map(SqlValue::Time);
    }
    if rest.len() < 8 {
        return None;
    }
    let negative = rest[0] == 1;
    let days = u32::from_le_bytes([rest[1], rest[2], rest[3], rest[4]]);
    let (hours, minutes, seconds) = (rest[5] as u32, rest[6] as u32, rest[7] as u32);
    let micros = match rest.get(8..12) {
        Some(m) => u32::from_le_bytes([m[0], m[1], m[2], m[3]]),
        None => 0,
    };

    if !negative && days == 0 {
        if let Some(time) = NaiveTime::from_hms_micro_opt(hours, minutes, seconds, micros) {
            return Some(SqlValue::Time(time));
        }
    }

    let mut text = format!(
        "{}{:02}:{:02}:{:02}",
        if negative { "-" } else { "" },
        days * 24 + hours,
        minutes,
        seconds
    );
    if micros > 0 {
        text.push_str(&format!(".{:06}", micros));
    }
    Some(SqlValue::Text(text))
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::UInt(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Decimal(v) | SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Bytes(v) => query.bind(v.clone()),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
    }
}

/// Empties `table_name` through `run`, falling back to DELETE when TRUNCATE fails.
async fn clear_table<F, Fut>(table_name: &str, mut run: F) -> Result<(), DbError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<(), DbError>>,
{
    let truncate = format!("TRUNCATE TABLE {}", quote(table_name));
    if let Err(err) = run(truncate).await {
        warn!(
            "TRUNCATE of {} failed ({}), falling back to DELETE",
            table_name, err
        );
        run(format!("DELETE FROM {}", quote(table_name))).await?;
    }
    Ok(())
}

/// Backtick-quotes an identifier.
pub fn quote(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

#[async_trait]
impl DbClient for MySqlClient {
    async fn test_connection(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let query = r#"
            SELECT TABLE_NAME AS table_name
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
        "#;

        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::classify)?;

        rows.iter().map(|row| get_text(row, "table_name")).collect()
    }

    async fn table_exists(&self, table_name: &str) -> Result<bool, DbError> {
        let query = r#"
            SELECT COUNT(*)
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
        "#;

        let count: i64 = sqlx::query_scalar(query)
            .bind(table_name)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::classify)?;

        Ok(count > 0)
    }

    async fn describe_table(&self, table_name: &str) -> Result<Vec<ColumnDefinition>, DbError> {
        let query = r#"
            SELECT COLUMN_NAME AS name, COLUMN_TYPE AS data_type, IS_NULLABLE AS nullable,
                   COLUMN_DEFAULT AS default_value, EXTRA AS extra
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;

        let rows = sqlx::query(query)
            .bind(table_name)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::classify)?;

        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                Ok(ColumnDefinition {
                    name: get_text(row, "name")?,
                    data_type: get_text(row, "data_type")?,
                    is_nullable: get_text(row, "nullable")? == "YES",
                    default: get_optional_text(row, "default_value")?,
                    extra: get_optional_text(row, "extra")?.unwrap_or_default(),
                    ordinal: i as u32 + 1,
                })
            })
            .collect()
    }

    async fn foreign_keys(&self, table_name: &str) -> Result<Vec<ForeignKeyRef>, DbError> {
        let query = r#"
            SELECT COLUMN_NAME AS column_name, REFERENCED_TABLE_NAME AS referenced_table,
                   REFERENCED_COLUMN_NAME AS referenced_column, CONSTRAINT_NAME AS constraint_name
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
              AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
        "#;

        let rows = sqlx::query(query)
            .bind(table_name)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::classify)?;

        rows.iter()
            .map(|row| {
                Ok(ForeignKeyRef {
                    column: get_text(row, "column_name")?,
                    referenced_table: get_text(row, "referenced_table")?,
                    referenced_column: get_text(row, "referenced_column")?,
                    constraint_name: get_text(row, "constraint_name")?,
                })
            })
            .collect()
    }

    async fn index_columns(&self, table_name: &str) -> Result<Vec<IndexColumn>, DbError> {
        let query = r#"
            SELECT INDEX_NAME AS index_name, COLUMN_NAME AS column_name,
                   CAST(NON_UNIQUE AS SIGNED) AS non_unique, CAST(SEQ_IN_INDEX AS SIGNED) AS seq
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY INDEX_NAME, SEQ_IN_INDEX
        "#;

        let rows = sqlx::query(query)
            .bind(table_name)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::classify)?;

        rows.iter()
            .map(|row| {
                let non_unique: i64 = row.try_get("non_unique").map_err(DbError::Sqlx)?;
                let seq: i64 = row.try_get("seq").map_err(DbError::Sqlx)?;
                Ok(IndexColumn {
                    index_name: get_text(row, "index_name")?,
                    // Functional index parts have no column name.
                    column_name: get_optional_text(row, "column_name")?.unwrap_or_default(),
                    is_unique: non_unique == 0,
                    seq_in_index: seq as u32,
                })
            })
            .collect()
    }

    async fn row_count(&self, table_name: &str) -> Result<u64, DbError> {
        let query = format!("SELECT COUNT(*) FROM {}", quote(table_name));
        let count: i64 = sqlx::query_scalar(&query)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::classify)?;

        Ok(count.max(0) as u64)
    }

    async fn create_table_statement(&self, table_name: &str) -> Result<String, DbError> {
        let query = format!("SHOW CREATE TABLE {}", quote(table_name));
        let row = sqlx::query(&query)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::classify)?;

        match row.try_get::<String, _>(1) {
            Ok(statement) => Ok(statement),
            Err(_) => row
                .try_get::<Vec<u8>, _>(1)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .map_err(|e| DbError::Decode(e.to_string())),
        }
    }

    async fn execute(&self, query: &str) -> Result<(), DbError> {
        debug!("executing: {}", query);
        sqlx::query(query)
            .execute(&self.pool)
            .await
            .map_err(DbError::classify)?;
        Ok(())
    }

    async fn execute_many(&self, queries: &[String]) -> Result<(), DbError> {
        let mut tx = self.begin_transaction().await?;
        for query in queries {
            debug!("executing: {}", query);
            if let Err(err) = tx.execute_transaction(query).await {
                tx.rollback_transaction().await.ok();
                return Err(err);
            }
        }
        tx.commit_transaction().await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, DbError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;
        Ok(Box::new(MySqlTransaction { tx }))
    }

    async fn truncate_table(&self, table_name: &str) -> Result<(), DbError> {
        clear_table(table_name, move |statement| async move {
            self.clear_with(&statement).await
        })
        .await
    }

    async fn fetch_rows(&self, table_name: &str) -> Result<Vec<Vec<SqlValue>>, DbError> {
        let query = format!("SELECT * FROM {}", quote(table_name));
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::classify)?;

        rows.iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|i| decode_value(row, i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect()
    }
}

pub struct MySqlTransaction {
    tx: sqlx::Transaction<'static, MySql>,
}

#[async_trait]
impl Transaction for MySqlTransaction {
    async fn execute_transaction(&mut self, query: &str) -> Result<(), DbError> {
        sqlx::query(query)
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::classify)?;
        Ok(())
    }

    async fn execute_bound(&mut self, query: &str, params: &[SqlValue]) -> Result<(), DbError> {
        let statement = params
            .iter()
            .fold(sqlx::query(query), |q, value| bind_value(q, value));
        statement
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::classify)?;
        Ok(())
    }

    async fn commit_transaction(self: Box<Self>) -> Result<(), DbError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))
    }

    async fn rollback_transaction(self: Box<Self>) -> Result<(), DbError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))
    }
}
