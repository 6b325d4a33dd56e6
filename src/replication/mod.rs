use std::collections::HashSet;

use log::{error, info};

use crate::{
    backup::BackupManager,
    db::DbClient,
    errors::ReplicationError,
    models::{connections::Environment, plan::Analysis},
};

use self::{executor::ExecutionResult, planner::MigrationPlanner};

pub mod copier;
pub mod ddl;
pub mod diff;
pub mod executor;
pub mod planner;
pub mod scheduler;

/// Brings the target (production) environment in line with the source
/// (development) one.
pub struct Replicator<'a> {
    source: &'a dyn DbClient,
    target: &'a dyn DbClient,
    target_database: String,
}

impl<'a> Replicator<'a> {
    pub fn new(source: &'a dyn DbClient, target: &'a dyn DbClient, target_database: &str) -> Self {
        Self {
            source,
            target,
            target_database: target_database.to_string(),
        }
    }

    pub async fn test_connections(&self) -> Result<(), ReplicationError> {
        for (environment, client) in [
            (Environment::Development, self.source),
            (Environment::Production, self.target),
        ] {
            client.test_connection().await.map_err(|source| {
                error!("Connection to {} failed: {}", environment.name(), source);
                ReplicationError::Connection {
                    environment: environment.name().to_string(),
                    source,
                }
            })?;
        }
        Ok(())
    }

    pub async fn analyze(
        &self,
        tables: &[String],
        data_tables: &HashSet<String>,
    ) -> Result<Analysis, ReplicationError> {
        MigrationPlanner::new(self.source, self.target)
            .analyze(tables, data_tables)
            .await
            .map_err(ReplicationError::Plan)
    }

    /// Checks both connections, optionally snapshots the target, then plans and
    /// applies the migration.
    pub async fn full_replication(
        &self,
        tables: &[String],
        data_tables: &HashSet<String>,
        backup: Option<&BackupManager>,
    ) -> Result<ExecutionResult, ReplicationError> {
        self.test_connections().await?;

        if let Some(manager) = backup {
            let name = manager
                .create_backup(
                    self.target,
                    Environment::Production.name(),
                    &self.target_database,
                    Some(tables),
                )
                .await
                .map_err(ReplicationError::Backup)?;
            info!("Pre-replication backup: {}", name);
        }

        let plan = MigrationPlanner::new(self.source, self.target)
            .plan(tables, data_tables)
            .await
            .map_err(ReplicationError::Plan)?;

        if plan.is_empty() {
            info!("Target is already up to date");
            return Ok(ExecutionResult::default());
        }

        Ok(executor::MigrationExecutor::new(self.source, self.target)
            .execute(&plan)
            .await)
    }
}
