use serde::{Deserialize, Serialize};

use super::schema::{ColumnDefinition, ForeignKeyRef, IndexDefinition};

/// A single structural mismatch between a source and a target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchemaDifference {
    MissingColumn(ColumnDefinition),
    ExtraColumn(String),
    TypeMismatch {
        column: String,
        source_type: String,
        target_type: String,
    },
    NullabilityMismatch {
        column: String,
        source_nullable: bool,
        target_nullable: bool,
    },
    DefaultMismatch {
        column: String,
        source_default: Option<String>,
        target_default: Option<String>,
    },
    /// Informational only: the executor never reorders columns.
    ColumnOrderMismatch {
        source_order: Vec<String>,
        target_order: Vec<String>,
    },
    MissingForeignKey(ForeignKeyRef),
    ExtraForeignKey(ForeignKeyRef),
    MissingIndex(IndexDefinition),
    ExtraIndex(IndexDefinition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifferenceKind {
    Column,
    ForeignKey,
    Index,
}

impl SchemaDifference {
    pub fn kind(&self) -> DifferenceKind {
        match self {
            SchemaDifference::MissingColumn(_)
            | SchemaDifference::ExtraColumn(_)
            | SchemaDifference::TypeMismatch { .. }
            | SchemaDifference::NullabilityMismatch { .. }
            | SchemaDifference::DefaultMismatch { .. }
            | SchemaDifference::ColumnOrderMismatch { .. } => DifferenceKind::Column,
            SchemaDifference::MissingForeignKey(_) | SchemaDifference::ExtraForeignKey(_) => {
                DifferenceKind::ForeignKey
            }
            SchemaDifference::MissingIndex(_) | SchemaDifference::ExtraIndex(_) => {
                DifferenceKind::Index
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MigrationAction {
    CreateTable,
    AlterColumns(Vec<SchemaDifference>),
    ReconcileForeignKeys(Vec<SchemaDifference>),
    ReconcileIndexes(Vec<SchemaDifference>),
    ReplicateData { source_count: u64, target_count: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStep {
    pub table: String,
    pub actions: Vec<MigrationAction>,
    pub data_maintained: bool,
}

/// Steps in the order the tables were supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn tables_to_create(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.actions.contains(&MigrationAction::CreateTable))
            .map(|s| s.table.clone())
            .collect()
    }

    /// Every `(table, action)` pair, in plan order.
    pub fn actions(&self) -> impl Iterator<Item = (&str, &MigrationAction)> {
        self.steps
            .iter()
            .flat_map(|s| s.actions.iter().map(move |a| (s.table.as_str(), a)))
    }
}

/// Comparison of one table across both environments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableAnalysis {
    pub table: String,
    pub exists_in_source: bool,
    pub exists_in_target: bool,
    pub differences: Vec<SchemaDifference>,
    pub source_count: u64,
    pub target_count: u64,
    pub maintained: bool,
}

impl TableAnalysis {
    pub fn count_of(&self, kind: DifferenceKind) -> usize {
        self.differences.iter().filter(|d| d.kind() == kind).count()
    }

    pub fn has_differences(&self) -> bool {
        if !self.exists_in_source {
            return false;
        }
        !self.exists_in_target
            || !self.differences.is_empty()
            || (self.maintained && self.source_count != self.target_count)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub tables: Vec<TableAnalysis>,
}

impl Analysis {
    pub fn tables_analyzed(&self) -> usize {
        self.tables.len()
    }

    pub fn tables_with_differences(&self) -> usize {
        self.tables.iter().filter(|t| t.has_differences()).count()
    }
}
