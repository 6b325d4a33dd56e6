use crate::{
    errors::DbError,
    models::{
        schema::{ColumnDefinition, ForeignKeyRef, IndexColumn, IndexDefinition, TableSchema},
        value::SqlValue,
    },
};
use async_trait::async_trait;

pub mod mysql;

/// Read and write access to one configured database.
///
/// Every call acquires its own connection and releases it before returning.
#[async_trait]
pub trait DbClient: Send + Sync {
    async fn test_connection(&self) -> Result<(), DbError>;
    async fn list_tables(&self) -> Result<Vec<String>, DbError>;
    async fn table_exists(&self, table_name: &str) -> Result<bool, DbError>;
    /// Columns in ordinal order.
    async fn describe_table(&self, table_name: &str) -> Result<Vec<ColumnDefinition>, DbError>;
    async fn foreign_keys(&self, table_name: &str) -> Result<Vec<ForeignKeyRef>, DbError>;
    /// Raw index rows, one per indexed column.
    async fn index_columns(&self, table_name: &str) -> Result<Vec<IndexColumn>, DbError>;
    async fn row_count(&self, table_name: &str) -> Result<u64, DbError>;
    async fn create_table_statement(&self, table_name: &str) -> Result<String, DbError>;
    async fn execute(&self, query: &str) -> Result<(), DbError>;
    /// Runs all statements inside one transaction.
    async fn execute_many(&self, queries: &[String]) -> Result<(), DbError>;
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, DbError>;
    /// Empties a table with foreign-key checks disabled, falling back to DELETE
    /// when TRUNCATE is refused.
    async fn truncate_table(&self, table_name: &str) -> Result<(), DbError>;
    async fn fetch_rows(&self, table_name: &str) -> Result<Vec<Vec<SqlValue>>, DbError>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn execute_transaction(&mut self, query: &str) -> Result<(), DbError>;
    async fn execute_bound(&mut self, query: &str, params: &[SqlValue]) -> Result<(), DbError>;
    async fn commit_transaction(self: Box<Self>) -> Result<(), DbError>;
    async fn rollback_transaction(self: Box<Self>) -> Result<(), DbError>;
}

/// Reads a full snapshot of `table_name`, or `None` when the table does not exist.
pub async fn inspect_table(
    client: &dyn DbClient,
    table_name: &str,
) -> Result<Option<TableSchema>, DbError> {
    if !client.table_exists(table_name).await? {
        return Ok(None);
    }

    let columns = client.describe_table(table_name).await?;
    let foreign_keys = client.foreign_keys(table_name).await?;
    let indexes = IndexDefinition::group(client.index_columns(table_name).await?);
    let row_count = client.row_count(table_name).await?;

    Ok(Some(TableSchema {
        table_name: table_name.to_string(),
        columns,
        foreign_keys,
        indexes,
        row_count,
    }))
}
