use std::collections::HashSet;

use log::{debug, info};

use crate::{
    db::{inspect_table, DbClient},
    errors::DbError,
    models::plan::{
        Analysis, DifferenceKind, MigrationAction, MigrationPlan, MigrationStep, SchemaDifference,
        TableAnalysis,
    },
};

use super::diff::diff;

/// Compares tables across the source and target environments and turns the
/// comparison into a migration plan.
pub struct MigrationPlanner<'a> {
    source: &'a dyn DbClient,
    target: &'a dyn DbClient,
}

impl<'a> MigrationPlanner<'a> {
    pub fn new(source: &'a dyn DbClient, target: &'a dyn DbClient) -> Self {
        Self { source, target }
    }

    pub async fn analyze_table(
        &self,
        table: &str,
        maintained: bool,
    ) -> Result<TableAnalysis, DbError> {
        let source = inspect_table(self.source, table).await?;
        let target = match source {
            Some(_) => inspect_table(self.target, table).await?,
            None => None,
        };

        let differences = match (&source, &target) {
            (Some(source), Some(target)) => diff(source, target),
            _ => Vec::new(),
        };

        let analysis = TableAnalysis {
            table: table.to_string(),
            exists_in_source: source.is_some(),
            exists_in_target: target.is_some(),
            differences,
            source_count: source.as_ref().map_or(0, |s| s.row_count),
            target_count: target.as_ref().map_or(0, |t| t.row_count),
            maintained,
        };

        debug!(
            "Analyzed {}: source={} target={} differences={}",
            table,
            analysis.exists_in_source,
            analysis.exists_in_target,
            analysis.differences.len()
        );

        Ok(analysis)
    }

    pub async fn analyze(
        &self,
        tables: &[String],
        data_tables: &HashSet<String>,
    ) -> Result<Analysis, DbError> {
        let mut analysis = Analysis::default();
        for table in tables {
            let maintained = data_tables.contains(table);
            analysis.tables.push(self.analyze_table(table, maintained).await?);
        }

        info!(
            "Analysis complete: {} tables, {} with differences",
            analysis.tables_analyzed(),
            analysis.tables_with_differences()
        );
        Ok(analysis)
    }

    pub async fn plan(
        &self,
        tables: &[String],
        data_tables: &HashSet<String>,
    ) -> Result<MigrationPlan, DbError> {
        let analysis = self.analyze(tables, data_tables).await?;
        let plan = plan_from_analysis(&analysis);
        info!("Migration plan has {} steps", plan.steps.len());
        Ok(plan)
    }
}

pub fn plan_from_analysis(analysis: &Analysis) -> MigrationPlan {
    MigrationPlan {
        steps: analysis.tables.iter().filter_map(step_for).collect(),
    }
}

/// The step for one analyzed table, or `None` when there is nothing to do.
pub fn step_for(analysis: &TableAnalysis) -> Option<MigrationStep> {
    if !analysis.exists_in_source {
        return None;
    }

    let mut actions = Vec::new();

    if !analysis.exists_in_target {
        actions.push(MigrationAction::CreateTable);
    } else {
        let columns = of_kind(&analysis.differences, DifferenceKind::Column);
        if !columns.is_empty() {
            actions.push(MigrationAction::AlterColumns(columns));
        }
        let foreign_keys = of_kind(&analysis.differences, DifferenceKind::ForeignKey);
        if !foreign_keys.is_empty() {
            actions.push(MigrationAction::ReconcileForeignKeys(foreign_keys));
        }
        let indexes = of_kind(&analysis.differences, DifferenceKind::Index);
        if !indexes.is_empty() {
            actions.push(MigrationAction::ReconcileIndexes(indexes));
        }
    }

    if analysis.maintained {
        actions.push(MigrationAction::ReplicateData {
            source_count: analysis.source_count,
            target_count: analysis.target_count,
        });
    }

    if actions.is_empty() {
        return None;
    }

    Some(MigrationStep {
        table: analysis.table.clone(),
        actions,
        data_maintained: analysis.maintained,
    })
}

fn of_kind(differences: &[SchemaDifference], kind: DifferenceKind) -> Vec<SchemaDifference> {
    differences
        .iter()
        .filter(|d| d.kind() == kind)
        .cloned()
        .collect()
}
