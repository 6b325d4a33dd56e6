use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Snapshot of one table as seen at the moment of inspection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnDefinition>,
    pub foreign_keys: Vec<ForeignKeyRef>,
    pub indexes: BTreeMap<String, IndexDefinition>,
    pub row_count: u64,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    /// Raw default as reported by the server; `None` means no default.
    pub default: Option<String>,
    /// Extra clause, e.g. `auto_increment` or `on update CURRENT_TIMESTAMP`.
    pub extra: String,
    /// 1-based position within the owning table.
    pub ordinal: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub constraint_name: String,
}

impl ForeignKeyRef {
    /// Comparison identity. The constraint name is only needed when dropping.
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.column, &self.referenced_table, &self.referenced_column)
    }

    pub fn matches(&self, other: &ForeignKeyRef) -> bool {
        self.key() == other.key()
    }
}

/// One raw metadata row of an index: a composite index yields one row per member.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub index_name: String,
    pub column_name: String,
    pub is_unique: bool,
    pub seq_in_index: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
}

impl IndexDefinition {
    pub const PRIMARY: &'static str = "PRIMARY";

    pub fn is_primary(&self) -> bool {
        self.name == Self::PRIMARY
    }

    /// Groups raw index rows by index name, ordering members by their sequence.
    pub fn group(rows: Vec<IndexColumn>) -> BTreeMap<String, IndexDefinition> {
        let mut grouped: BTreeMap<String, Vec<IndexColumn>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.index_name.clone()).or_default().push(row);
        }

        grouped
            .into_iter()
            .map(|(name, mut members)| {
                members.sort_by_key(|m| m.seq_in_index);
                let is_unique = members.iter().all(|m| m.is_unique);
                let definition = IndexDefinition {
                    name: name.clone(),
                    columns: members.into_iter().map(|m| m.column_name).collect(),
                    is_unique,
                };
                (name, definition)
            })
            .collect()
    }
}
