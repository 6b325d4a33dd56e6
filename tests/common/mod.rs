#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use schemasync::{
    db::{DbClient, Transaction},
    errors::DbError,
    models::{
        schema::{ColumnDefinition, ForeignKeyRef, IndexColumn},
        value::SqlValue,
    },
};

#[derive(Debug, Clone)]
pub struct FakeTable {
    pub columns: Vec<ColumnDefinition>,
    pub foreign_keys: Vec<ForeignKeyRef>,
    pub indexes: Vec<IndexColumn>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl FakeTable {
    pub fn new(columns: Vec<ColumnDefinition>) -> Self {
        Self {
            columns,
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn with_foreign_key(mut self, column: &str, referenced_table: &str, constraint: &str) -> Self {
        self.foreign_keys.push(ForeignKeyRef {
            column: column.to_string(),
            referenced_table: referenced_table.to_string(),
            referenced_column: "id".to_string(),
            constraint_name: constraint.to_string(),
        });
        self
    }

    pub fn with_rows(mut self, rows: Vec<Vec<SqlValue>>) -> Self {
        self.rows = rows;
        self
    }

    /// `SHOW CREATE TABLE` style text.
    pub fn create_statement(&self, name: &str) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                format!(
                    "  `{}` {}{}",
                    c.name,
                    c.data_type,
                    if c.is_nullable { "" } else { " NOT NULL" }
                )
            })
            .collect();
        for fk in &self.foreign_keys {
            lines.push(format!(
                "  CONSTRAINT `{}` FOREIGN KEY (`{}`) REFERENCES `{}` (`{}`)",
                fk.constraint_name, fk.column, fk.referenced_table, fk.referenced_column
            ));
        }
        format!(
            "CREATE TABLE `{}` (\n{}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            name,
            lines.join(",\n")
        )
    }
}

pub fn column(name: &str, data_type: &str) -> ColumnDefinition {
    ColumnDefinition {
        name: name.to_string(),
        data_type: data_type.to_string(),
        is_nullable: true,
        default: None,
        extra: String::new(),
        ordinal: 0,
    }
}

pub fn int_rows(count: i64) -> Vec<Vec<SqlValue>> {
    (1..=count)
        .map(|id| vec![SqlValue::Int(id), SqlValue::Text(format!("value {}", id))])
        .collect()
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub tables: BTreeMap<String, FakeTable>,
    /// Definitions used to interpret CREATE and ALTER statements.
    pub templates: BTreeMap<String, FakeTable>,
    pub executed: Vec<String>,
    pub commits: usize,
    /// Inserts beyond this many rows per table are silently dropped.
    pub row_cap: Option<usize>,
}

/// In-memory MySQL stand-in understanding the statements the replicator emits.
#[derive(Clone, Default)]
pub struct FakeDatabase {
    pub state: Arc<Mutex<FakeState>>,
}

fn fk_error(referenced_table: &str) -> DbError {
    DbError::ForeignKeyConstraint {
        code: 1824,
        message: format!("Failed to open the referenced table '{}'", referenced_table),
    }
}

/// Backtick-quoted identifiers of a statement, in order.
fn identifiers(statement: &str) -> Vec<String> {
    statement
        .split('`')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, s)| s.to_string())
        .collect()
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, table: FakeTable) -> Self {
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(name.to_string(), table);
        self
    }

    pub fn with_templates_from(self, other: &FakeDatabase) -> Self {
        let templates = other.state.lock().unwrap().tables.clone();
        self.state.lock().unwrap().templates = templates;
        self
    }

    pub fn with_row_cap(self, cap: usize) -> Self {
        self.state.lock().unwrap().row_cap = Some(cap);
        self
    }

    pub fn table(&self, name: &str) -> Option<FakeTable> {
        self.state.lock().unwrap().tables.get(name).cloned()
    }

    pub fn column_names(&self, name: &str) -> Vec<String> {
        self.table(name)
            .map(|t| t.columns.into_iter().map(|c| c.name).collect())
            .unwrap_or_default()
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    fn apply(state: &mut FakeState, statement: &str) -> Result<(), DbError> {
        let ids = identifiers(statement);
        let missing = |what: &str| DbError::General(format!("unknown {} in: {}", what, statement));

        if statement.starts_with("CREATE TABLE") {
            let name = ids.first().ok_or_else(|| missing("table"))?.clone();
            let template = state.templates.get(&name).ok_or_else(|| missing("template"))?;
            let mut table = FakeTable::new(template.columns.clone());
            if statement.contains("FOREIGN KEY") {
                for fk in &template.foreign_keys {
                    if !state.tables.contains_key(&fk.referenced_table) {
                        return Err(fk_error(&fk.referenced_table));
                    }
                }
                table.foreign_keys = template.foreign_keys.clone();
            }
            state.tables.insert(name, table);
            return Ok(());
        }

        if statement.starts_with("CREATE") && statement.contains(" INDEX ") {
            let table = state.tables.get_mut(&ids[1]).ok_or_else(|| missing("table"))?;
            let unique = statement.starts_with("CREATE UNIQUE");
            for (i, column) in ids[2..].iter().enumerate() {
                table.indexes.push(IndexColumn {
                    index_name: ids[0].clone(),
                    column_name: column.clone(),
                    is_unique: unique,
                    seq_in_index: i as u32 + 1,
                });
            }
            return Ok(());
        }

        if statement.starts_with("DROP INDEX") {
            let table = state.tables.get_mut(&ids[1]).ok_or_else(|| missing("table"))?;
            table.indexes.retain(|i| i.index_name != ids[0]);
            return Ok(());
        }

        if !statement.starts_with("ALTER TABLE") {
            return Err(missing("statement"));
        }

        let name = ids[0].clone();
        if statement.contains("ADD CONSTRAINT") {
            let referenced = &ids[3];
            if !state.tables.contains_key(referenced) {
                return Err(fk_error(referenced));
            }
            let table = state.tables.get_mut(&name).ok_or_else(|| missing("table"))?;
            table.foreign_keys.push(ForeignKeyRef {
                column: ids[2].clone(),
                referenced_table: ids[3].clone(),
                referenced_column: ids[4].clone(),
                constraint_name: ids[1].clone(),
            });
            return Ok(());
        }

        let template_column = state
            .templates
            .get(&name)
            .and_then(|t| t.columns.iter().find(|c| ids.get(1) == Some(&c.name)))
            .cloned();
        let table = state.tables.get_mut(&name).ok_or_else(|| missing("table"))?;

        if statement.contains("ADD COLUMN") {
            let column = template_column.ok_or_else(|| missing("column"))?;
            let at = if statement.ends_with("FIRST") {
                0
            } else {
                let after = ids.get(2).ok_or_else(|| missing("position"))?;
                table
                    .columns
                    .iter()
                    .position(|c| &c.name == after)
                    .map(|i| i + 1)
                    .ok_or_else(|| missing("AFTER column"))?
            };
            table.columns.insert(at, column);
        } else if statement.contains("DROP COLUMN") {
            table.columns.retain(|c| c.name != ids[1]);
        } else if statement.contains("MODIFY COLUMN") {
            // MODIFY replaces the whole definition with what follows the name.
            let definition = statement.rsplit('`').next().unwrap_or_default().trim();
            let existing = table
                .columns
                .iter_mut()
                .find(|c| c.name == ids[1])
                .ok_or_else(|| missing("column"))?;
            existing.data_type = definition
                .split_whitespace()
                .next()
                .ok_or_else(|| missing("type"))?
                .to_string();
            existing.is_nullable = !definition.contains("NOT NULL");
            existing.extra = if definition.contains("auto_increment") {
                "auto_increment".to_string()
            } else {
                String::new()
            };
        } else if statement.contains("DROP FOREIGN KEY") {
            table.foreign_keys.retain(|fk| fk.constraint_name != ids[1]);
        } else {
            return Err(missing("ALTER clause"));
        }
        Ok(())
    }
}

#[async_trait]
impl DbClient for FakeDatabase {
    async fn test_connection(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        Ok(self.state.lock().unwrap().tables.keys().cloned().collect())
    }

    async fn table_exists(&self, table_name: &str) -> Result<bool, DbError> {
        Ok(self.state.lock().unwrap().tables.contains_key(table_name))
    }

    async fn describe_table(&self, table_name: &str) -> Result<Vec<ColumnDefinition>, DbError> {
        let columns = self
            .table(table_name)
            .map(|t| t.columns)
            .unwrap_or_default();
        Ok(columns
            .into_iter()
            .enumerate()
            .map(|(i, mut c)| {
                c.ordinal = i as u32 + 1;
                c
            })
            .collect())
    }

    async fn foreign_keys(&self, table_name: &str) -> Result<Vec<ForeignKeyRef>, DbError> {
        Ok(self
            .table(table_name)
            .map(|t| t.foreign_keys)
            .unwrap_or_default())
    }

    async fn index_columns(&self, table_name: &str) -> Result<Vec<IndexColumn>, DbError> {
        Ok(self.table(table_name).map(|t| t.indexes).unwrap_or_default())
    }

    async fn row_count(&self, table_name: &str) -> Result<u64, DbError> {
        Ok(self.table(table_name).map_or(0, |t| t.rows.len() as u64))
    }

    async fn create_table_statement(&self, table_name: &str) -> Result<String, DbError> {
        self.table(table_name)
            .map(|t| t.create_statement(table_name))
            .ok_or_else(|| DbError::General(format!("Table '{}' doesn't exist", table_name)))
    }

    async fn execute(&self, query: &str) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.executed.push(query.to_string());
        Self::apply(&mut state, query)
    }

    async fn execute_many(&self, queries: &[String]) -> Result<(), DbError> {
        for query in queries {
            self.execute(query).await?;
        }
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, DbError> {
        Ok(Box::new(FakeTransaction {
            state: self.state.clone(),
            pending: Vec::new(),
        }))
    }

    async fn truncate_table(&self, table_name: &str) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        let table = state
            .tables
            .get_mut(table_name)
            .ok_or_else(|| DbError::General(format!("Table '{}' doesn't exist", table_name)))?;
        table.rows.clear();
        Ok(())
    }

    async fn fetch_rows(&self, table_name: &str) -> Result<Vec<Vec<SqlValue>>, DbError> {
        Ok(self.table(table_name).map(|t| t.rows).unwrap_or_default())
    }
}

pub struct FakeTransaction {
    state: Arc<Mutex<FakeState>>,
    pending: Vec<(String, Vec<SqlValue>)>,
}

#[async_trait]
impl Transaction for FakeTransaction {
    async fn execute_transaction(&mut self, query: &str) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.executed.push(query.to_string());
        FakeDatabase::apply(&mut state, query)
    }

    async fn execute_bound(&mut self, query: &str, params: &[SqlValue]) -> Result<(), DbError> {
        // Multi-row INSERT: the table, then one identifier per column.
        let mut ids = identifiers(query).into_iter();
        let table = ids
            .next()
            .ok_or_else(|| DbError::General(format!("no table in: {}", query)))?;
        let width = ids.count().max(1);
        for row in params.chunks(width) {
            self.pending.push((table.clone(), row.to_vec()));
        }
        Ok(())
    }

    async fn commit_transaction(self: Box<Self>) -> Result<(), DbError> {
        let FakeTransaction { state, pending } = *self;
        let mut state = state.lock().unwrap();
        let cap = state.row_cap;
        for (table, row) in pending {
            let target = state
                .tables
                .get_mut(&table)
                .ok_or_else(|| DbError::General(format!("Table '{}' doesn't exist", table)))?;
            if cap.map_or(true, |cap| target.rows.len() < cap) {
                target.rows.push(row);
            }
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback_transaction(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}
