//! Applies a migration plan to the target environment.
//!
//! The plan is replayed in phases (create, alter, foreign keys, indexes,
//! reconciliation, data), each phase covering the whole plan before the next
//! one starts. A fatal failure stops the run where it is; statements already
//! applied stay applied.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::{
    db::DbClient,
    errors::DbError,
    models::{
        plan::{MigrationAction, MigrationPlan, SchemaDifference},
        schema::ColumnDefinition,
    },
};

use super::{
    copier::DataCopier,
    ddl::{self, ColumnPosition},
    diff::missing_foreign_keys,
    scheduler,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Create,
    Alter,
    ForeignKeys,
    Indexes,
    Reconcile,
    Data,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Create => "create",
            Phase::Alter => "alter",
            Phase::ForeignKeys => "foreign keys",
            Phase::Indexes => "indexes",
            Phase::Reconcile => "reconciliation",
            Phase::Data => "data",
        };
        f.write_str(name)
    }
}

/// The failure that ended a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseFailure {
    pub table: String,
    pub phase: Phase,
    pub message: String,
}

impl PhaseFailure {
    fn new(table: &str, phase: Phase, err: DbError) -> Self {
        Self {
            table: table.to_string(),
            phase,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} phase failed on {}: {}",
            self.phase, self.table, self.message
        )
    }
}

/// A recoverable event recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Diagnostic {
    /// Created without its foreign keys; restored during reconciliation.
    FkDeferred { table: String },
    CycleBroken { tables: Vec<String> },
    ColumnOrderIgnored { table: String },
    ColumnAttributeIgnored {
        table: String,
        column: String,
        attribute: String,
    },
    ReferencedTableMissing {
        table: String,
        column: String,
        referenced_table: String,
    },
    ForeignKeyDropSkipped { table: String, column: String },
    DataCountMismatch {
        table: String,
        source_count: u64,
        target_count: u64,
    },
    TableSkipped { table: String, reason: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::FkDeferred { table } => {
                write!(f, "{}: created without foreign keys", table)
            }
            Diagnostic::CycleBroken { tables } => {
                write!(f, "foreign key cycle broken at {}", tables.join(", "))
            }
            Diagnostic::ColumnOrderIgnored { table } => {
                write!(f, "{}: column order differs (not changed)", table)
            }
            Diagnostic::ColumnAttributeIgnored {
                table,
                column,
                attribute,
            } => write!(f, "{}.{}: {} differs (not changed)", table, column, attribute),
            Diagnostic::ReferencedTableMissing {
                table,
                column,
                referenced_table,
            } => write!(
                f,
                "{}.{}: referenced table {} does not exist",
                table, column, referenced_table
            ),
            Diagnostic::ForeignKeyDropSkipped { table, column } => write!(
                f,
                "{}.{}: extra foreign key has no resolvable constraint",
                table, column
            ),
            Diagnostic::DataCountMismatch {
                table,
                source_count,
                target_count,
            } => write!(
                f,
                "{}: {} rows in source, {} in target after copy",
                table, source_count, target_count
            ),
            Diagnostic::TableSkipped { table, reason } => write!(f, "{}: skipped ({})", table, reason),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub failure: Option<PhaseFailure>,
    pub diagnostics: Vec<Diagnostic>,
    pub created_tables: Vec<String>,
    pub copied_rows: BTreeMap<String, u64>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn deferred_tables(&self) -> Vec<&str> {
        self.diagnostics
            .iter()
            .filter_map(|d| match d {
                Diagnostic::FkDeferred { table } => Some(table.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn count_mismatches(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::DataCountMismatch { .. }))
            .count()
    }
}

pub struct MigrationExecutor<'a> {
    source: &'a dyn DbClient,
    target: &'a dyn DbClient,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(source: &'a dyn DbClient, target: &'a dyn DbClient) -> Self {
        Self { source, target }
    }

    pub async fn execute(&self, plan: &MigrationPlan) -> ExecutionResult {
        let mut result = ExecutionResult::default();

        if let Err(failure) = self.run_phases(plan, &mut result).await {
            error!("Replication aborted: {}", failure);
            result.failure = Some(failure);
        } else {
            info!(
                "Replication finished: {} tables created, {} tables copied, {} diagnostics",
                result.created_tables.len(),
                result.copied_rows.len(),
                result.diagnostics.len()
            );
        }

        result
    }

    async fn run_phases(
        &self,
        plan: &MigrationPlan,
        result: &mut ExecutionResult,
    ) -> Result<(), PhaseFailure> {
        self.create_tables(plan, result).await?;
        self.alter_tables(plan, result).await?;
        self.reconcile_foreign_keys(plan, result).await?;
        self.reconcile_indexes(plan).await?;
        self.restore_foreign_keys(result).await?;
        self.replicate_data(plan, result).await?;
        Ok(())
    }

    async fn apply(&self, statement: &str) -> Result<(), DbError> {
        debug!("Executing: {}", statement);
        self.target.execute(statement).await
    }

    async fn create_tables(
        &self,
        plan: &MigrationPlan,
        result: &mut ExecutionResult,
    ) -> Result<(), PhaseFailure> {
        let tables = plan.tables_to_create();
        if tables.is_empty() {
            return Ok(());
        }
        info!("Phase {}: {} tables", Phase::Create, tables.len());

        let mut dependencies: HashMap<String, HashSet<String>> = HashMap::new();
        for table in &tables {
            let fks = self
                .source
                .foreign_keys(table)
                .await
                .map_err(|e| PhaseFailure::new(table, Phase::Create, e))?;
            dependencies.insert(
                table.clone(),
                fks.into_iter().map(|fk| fk.referenced_table).collect(),
            );
        }

        let order = scheduler::order(&tables, &dependencies);
        if order.cycle_detected() {
            warn!(
                "Foreign key cycle among new tables, forced: {}",
                order.forced.join(", ")
            );
            result.diagnostics.push(Diagnostic::CycleBroken {
                tables: order.forced.clone(),
            });
        }

        for table in &order.tables {
            self.create_table(table, result)
                .await
                .map_err(|e| PhaseFailure::new(table, Phase::Create, e))?;
            result.created_tables.push(table.clone());
        }

        Ok(())
    }

    async fn create_table(&self, table: &str, result: &mut ExecutionResult) -> Result<(), DbError> {
        let statement = self.source.create_table_statement(table).await?;

        match self.apply(&statement).await {
            Ok(()) => {
                info!("Created table {}", table);
                Ok(())
            }
            Err(e) if e.is_foreign_key_violation() => {
                warn!(
                    "Foreign key error creating {}, retrying without constraints: {}",
                    table, e
                );
                self.apply(&ddl::strip_foreign_keys(&statement)).await?;
                info!("Created table {} without foreign keys", table);
                result.diagnostics.push(Diagnostic::FkDeferred {
                    table: table.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn alter_tables(
        &self,
        plan: &MigrationPlan,
        result: &mut ExecutionResult,
    ) -> Result<(), PhaseFailure> {
        for (table, action) in plan.actions() {
            let MigrationAction::AlterColumns(differences) = action else {
                continue;
            };
            info!("Phase {}: {}", Phase::Alter, table);
            self.alter_columns(table, differences, result)
                .await
                .map_err(|e| PhaseFailure::new(table, Phase::Alter, e))?;
        }
        Ok(())
    }

    async fn alter_columns(
        &self,
        table: &str,
        differences: &[SchemaDifference],
        result: &mut ExecutionResult,
    ) -> Result<(), DbError> {
        let source_order = column_names(self.source, table).await?;
        let target_columns = self.target.describe_table(table).await?;
        let mut target_order: Vec<String> = target_columns.iter().map(|c| c.name.clone()).collect();

        for difference in differences {
            match difference {
                SchemaDifference::MissingColumn(column) => {
                    let position = ddl::resolve_position(&source_order, &target_order, &column.name);
                    self.apply(&ddl::add_column(table, column, position.as_ref()))
                        .await?;

                    match position {
                        Some(ColumnPosition::After(previous)) => {
                            let at = target_order
                                .iter()
                                .position(|c| *c == previous)
                                .map_or(target_order.len(), |i| i + 1);
                            target_order.insert(at, column.name.clone());
                        }
                        Some(ColumnPosition::First) => target_order.insert(0, column.name.clone()),
                        None => target_order.push(column.name.clone()),
                    }
                }
                SchemaDifference::ExtraColumn(name) => {
                    self.apply(&ddl::drop_column(table, name)).await?;
                    target_order.retain(|c| c != name);
                }
                SchemaDifference::TypeMismatch {
                    column,
                    source_type,
                    target_type,
                } => {
                    info!(
                        "Changing {}.{} from {} to {}",
                        table, column, target_type, source_type
                    );
                    // Only the type follows the source; the live column keeps
                    // its nullability, default and extra.
                    let current = target_columns
                        .iter()
                        .find(|c| c.name == *column)
                        .ok_or_else(|| {
                            DbError::General(format!("Column {}.{} not found in target", table, column))
                        })?;
                    let changed = ColumnDefinition {
                        data_type: source_type.clone(),
                        ..current.clone()
                    };
                    self.apply(&ddl::modify_column(table, &changed)).await?;
                }
                SchemaDifference::NullabilityMismatch { column, .. } => {
                    warn!("Nullability of {}.{} differs, not changed", table, column);
                    result.diagnostics.push(Diagnostic::ColumnAttributeIgnored {
                        table: table.to_string(),
                        column: column.clone(),
                        attribute: "nullability".to_string(),
                    });
                }
                SchemaDifference::DefaultMismatch { column, .. } => {
                    warn!("Default of {}.{} differs, not changed", table, column);
                    result.diagnostics.push(Diagnostic::ColumnAttributeIgnored {
                        table: table.to_string(),
                        column: column.clone(),
                        attribute: "default".to_string(),
                    });
                }
                SchemaDifference::ColumnOrderMismatch { .. } => {
                    warn!("Column order of {} differs, not changed", table);
                    result.diagnostics.push(Diagnostic::ColumnOrderIgnored {
                        table: table.to_string(),
                    });
                }
                SchemaDifference::MissingForeignKey(_)
                | SchemaDifference::ExtraForeignKey(_)
                | SchemaDifference::MissingIndex(_)
                | SchemaDifference::ExtraIndex(_) => {
                    debug!("Ignoring non-column difference on {}", table);
                }
            }
        }

        Ok(())
    }

    async fn reconcile_foreign_keys(
        &self,
        plan: &MigrationPlan,
        result: &mut ExecutionResult,
    ) -> Result<(), PhaseFailure> {
        for (table, action) in plan.actions() {
            let MigrationAction::ReconcileForeignKeys(differences) = action else {
                continue;
            };
            info!("Phase {}: {}", Phase::ForeignKeys, table);
            self.apply_foreign_keys(table, differences, result)
                .await
                .map_err(|e| PhaseFailure::new(table, Phase::ForeignKeys, e))?;
        }
        Ok(())
    }

    async fn apply_foreign_keys(
        &self,
        table: &str,
        differences: &[SchemaDifference],
        result: &mut ExecutionResult,
    ) -> Result<(), DbError> {
        let live = self.target.foreign_keys(table).await?;

        for difference in differences {
            match difference {
                SchemaDifference::MissingForeignKey(fk) => {
                    let name = ddl::foreign_key_name(table, fk);
                    self.apply(&ddl::add_foreign_key(table, &name, fk)).await?;
                }
                SchemaDifference::ExtraForeignKey(fk) => {
                    let constraint = live
                        .iter()
                        .find(|l| l.matches(fk) && !l.constraint_name.is_empty());
                    match constraint {
                        Some(existing) => {
                            self.apply(&ddl::drop_foreign_key(table, &existing.constraint_name))
                                .await?;
                        }
                        None => {
                            warn!(
                                "No live constraint found for {}.{} -> {}, not dropped",
                                table, fk.column, fk.referenced_table
                            );
                            result.diagnostics.push(Diagnostic::ForeignKeyDropSkipped {
                                table: table.to_string(),
                                column: fk.column.clone(),
                            });
                        }
                    }
                }
                _ => debug!("Ignoring non-foreign-key difference on {}", table),
            }
        }

        Ok(())
    }

    async fn reconcile_indexes(&self, plan: &MigrationPlan) -> Result<(), PhaseFailure> {
        for (table, action) in plan.actions() {
            let MigrationAction::ReconcileIndexes(differences) = action else {
                continue;
            };
            info!("Phase {}: {}", Phase::Indexes, table);
            self.apply_indexes(table, differences)
                .await
                .map_err(|e| PhaseFailure::new(table, Phase::Indexes, e))?;
        }
        Ok(())
    }

    async fn apply_indexes(
        &self,
        table: &str,
        differences: &[SchemaDifference],
    ) -> Result<(), DbError> {
        for difference in differences {
            match difference {
                SchemaDifference::MissingIndex(index) | SchemaDifference::ExtraIndex(index)
                    if index.is_primary() =>
                {
                    debug!("Skipping PRIMARY index of {}", table);
                }
                SchemaDifference::MissingIndex(index) => {
                    self.apply(&ddl::create_index(table, index)).await?;
                }
                SchemaDifference::ExtraIndex(index) => {
                    self.apply(&ddl::drop_index(table, &index.name)).await?;
                }
                _ => debug!("Ignoring non-index difference on {}", table),
            }
        }
        Ok(())
    }

    /// Adds foreign keys still missing on created tables once every table exists.
    async fn restore_foreign_keys(&self, result: &mut ExecutionResult) -> Result<(), PhaseFailure> {
        if result.created_tables.is_empty() {
            return Ok(());
        }
        info!("Phase {}: {} tables", Phase::Reconcile, result.created_tables.len());

        let created = result.created_tables.clone();
        for table in &created {
            self.restore_table_foreign_keys(table, result)
                .await
                .map_err(|e| PhaseFailure::new(table, Phase::Reconcile, e))?;
        }
        Ok(())
    }

    async fn restore_table_foreign_keys(
        &self,
        table: &str,
        result: &mut ExecutionResult,
    ) -> Result<(), DbError> {
        let source_fks = self.source.foreign_keys(table).await?;
        let target_fks = self.target.foreign_keys(table).await?;

        for fk in missing_foreign_keys(&source_fks, &target_fks) {
            if !self.target.table_exists(&fk.referenced_table).await? {
                warn!(
                    "Referenced table {} does not exist, skipping {}.{}",
                    fk.referenced_table, table, fk.column
                );
                result.diagnostics.push(Diagnostic::ReferencedTableMissing {
                    table: table.to_string(),
                    column: fk.column.clone(),
                    referenced_table: fk.referenced_table.clone(),
                });
                continue;
            }

            let name = ddl::deferred_foreign_key_name(table, fk);
            self.apply(&ddl::add_foreign_key(table, &name, fk)).await?;
            info!(
                "Restored foreign key {}.{} -> {}.{}",
                table, fk.column, fk.referenced_table, fk.referenced_column
            );
        }
        Ok(())
    }

    async fn replicate_data(
        &self,
        plan: &MigrationPlan,
        result: &mut ExecutionResult,
    ) -> Result<(), PhaseFailure> {
        for (table, action) in plan.actions() {
            let MigrationAction::ReplicateData { .. } = action else {
                continue;
            };
            info!("Phase {}: {}", Phase::Data, table);
            self.copy_table(table, result)
                .await
                .map_err(|e| PhaseFailure::new(table, Phase::Data, e))?;
        }
        Ok(())
    }

    async fn copy_table(&self, table: &str, result: &mut ExecutionResult) -> Result<(), DbError> {
        let skip = if !self.source.table_exists(table).await? {
            Some("missing from source")
        } else if !self.target.table_exists(table).await? {
            Some("missing from target")
        } else {
            None
        };
        if let Some(reason) = skip {
            warn!("Table {} {}, data not copied", table, reason);
            result.diagnostics.push(Diagnostic::TableSkipped {
                table: table.to_string(),
                reason: reason.to_string(),
            });
            return Ok(());
        }

        let columns = column_names(self.source, table).await?;
        if columns.is_empty() {
            warn!("Table {} has no columns, data not copied", table);
            result.diagnostics.push(Diagnostic::TableSkipped {
                table: table.to_string(),
                reason: "no columns".to_string(),
            });
            return Ok(());
        }

        let rows = self.source.fetch_rows(table).await?;
        let copied = DataCopier::new(self.target)
            .copy(table, &columns, &rows)
            .await?;
        result.copied_rows.insert(table.to_string(), copied);

        let source_count = rows.len() as u64;
        let target_count = self.target.row_count(table).await?;
        if source_count != target_count {
            warn!(
                "Row count mismatch on {}: source {}, target {}",
                table, source_count, target_count
            );
            result.diagnostics.push(Diagnostic::DataCountMismatch {
                table: table.to_string(),
                source_count,
                target_count,
            });
        }

        Ok(())
    }
}

async fn column_names(client: &dyn DbClient, table: &str) -> Result<Vec<String>, DbError> {
    Ok(client
        .describe_table(table)
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect())
}
