use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    errors::DbError,
    models::connections::{ConnectionConfig, ConnectionUpdate},
};

pub const CONFIG_PATH_VAR: &str = "SCHEMASYNC_CONFIG";
pub const BACKUP_DIR_VAR: &str = "SCHEMASYNC_BACKUP_DIR";
pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_BACKUP_DIR: &str = "backups";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ConfigFile {
    database: DatabaseSection,
}

/// The `database` object: one entry per environment plus the `maintain` list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct DatabaseSection {
    #[serde(default)]
    maintain: Vec<String>,
    #[serde(flatten)]
    environments: BTreeMap<String, ConnectionConfig>,
}

/// Application settings backed by a JSON file. Every mutation is written back
/// immediately.
#[derive(Debug, Clone)]
pub struct AppConfig {
    path: PathBuf,
    file: ConfigFile,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        let content = fs::read_to_string(&path).map_err(|e| {
            DbError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let file: ConfigFile = serde_json::from_str(&content).map_err(|e| {
            DbError::Config(format!("invalid JSON in {}: {}", path.display(), e))
        })?;

        info!(
            "Loaded configuration from {} ({} environments)",
            path.display(),
            file.database.environments.len()
        );
        Ok(Self { path, file })
    }

    /// Path from `SCHEMASYNC_CONFIG`, or `config.json`.
    pub fn default_path() -> PathBuf {
        std::env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn backup_dir() -> PathBuf {
        std::env::var(BACKUP_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_BACKUP_DIR))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<(), DbError> {
        let content = serde_json::to_string_pretty(&self.file)
            .map_err(|e| DbError::Config(format!("cannot serialize configuration: {}", e)))?;
        fs::write(&self.path, content).map_err(|e| {
            DbError::Config(format!("cannot write {}: {}", self.path.display(), e))
        })
    }

    /// A validated environment entry.
    pub fn environment(&self, name: &str) -> Result<&ConnectionConfig, DbError> {
        let config = self.file.database.environments.get(name).ok_or_else(|| {
            DbError::Config(format!("environment '{}' not found in configuration", name))
        })?;
        config.validate(name)?;
        Ok(config)
    }

    pub fn environments(&self) -> Vec<String> {
        self.file.database.environments.keys().cloned().collect()
    }

    pub fn maintained_tables(&self) -> &[String] {
        &self.file.database.maintain
    }

    pub fn is_maintained(&self, table: &str) -> bool {
        self.file.database.maintain.iter().any(|t| t == table)
    }

    pub fn set_maintained_tables(&mut self, tables: Vec<String>) -> Result<(), DbError> {
        self.file.database.maintain = tables;
        self.save()
    }

    pub fn add_maintained_table(&mut self, table: &str) -> Result<(), DbError> {
        if self.is_maintained(table) {
            return Ok(());
        }
        self.file.database.maintain.push(table.to_string());
        self.save()
    }

    pub fn remove_maintained_table(&mut self, table: &str) -> Result<(), DbError> {
        if !self.is_maintained(table) {
            return Ok(());
        }
        self.file.database.maintain.retain(|t| t != table);
        self.save()
    }

    /// Flips membership of `table` and returns whether it is now maintained.
    pub fn toggle_maintained_table(&mut self, table: &str) -> Result<bool, DbError> {
        if self.is_maintained(table) {
            self.remove_maintained_table(table)?;
            Ok(false)
        } else {
            self.add_maintained_table(table)?;
            Ok(true)
        }
    }

    /// Merges the non-empty fields of `update` into `name`, creating the entry
    /// if needed.
    pub fn update_environment(&mut self, name: &str, update: &ConnectionUpdate) -> Result<(), DbError> {
        let entry = self
            .file
            .database
            .environments
            .entry(name.to_string())
            .or_default();
        update.apply(entry);
        self.save()
    }
}
