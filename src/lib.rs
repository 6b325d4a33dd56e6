use std::sync::Arc;

use config::AppConfig;
use db::{mysql::MySqlClient, DbClient};
use errors::DbError;
use models::connections::Environment;
use replication::Replicator;

pub mod backup;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod replication;

/// The two environments a replication runs between.
pub struct DbManager {
    source: Arc<dyn DbClient>,
    target: Arc<dyn DbClient>,
    target_database: String,
}

impl DbManager {
    pub fn new(source: Arc<dyn DbClient>, target: Arc<dyn DbClient>, target_database: &str) -> Self {
        DbManager {
            source,
            target,
            target_database: target_database.to_string(),
        }
    }

    /// Builds lazily-connecting MySQL clients for both environments. Nothing
    /// is dialed until the first query.
    pub fn from_config(config: &AppConfig) -> Result<Self, DbError> {
        let development = config.environment(Environment::Development.name())?;
        let production = config.environment(Environment::Production.name())?;

        Ok(Self::new(
            Arc::new(MySqlClient::connect_lazy(development.connect_options())),
            Arc::new(MySqlClient::connect_lazy(production.connect_options())),
            &production.database,
        ))
    }

    pub fn client(&self, environment: Environment) -> &dyn DbClient {
        match environment {
            Environment::Development => self.source.as_ref(),
            Environment::Production => self.target.as_ref(),
        }
    }

    pub fn target_database(&self) -> &str {
        &self.target_database
    }

    pub fn replicator(&self) -> Replicator<'_> {
        Replicator::new(
            self.source.as_ref(),
            self.target.as_ref(),
            &self.target_database,
        )
    }

    /// Tables of the source environment; these drive every replication.
    pub async fn source_tables(&self) -> Result<Vec<String>, DbError> {
        self.source.list_tables().await
    }
}
