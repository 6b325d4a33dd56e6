use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::Local;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{db::DbClient, errors::DbError, replication::ddl::quote};

const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub timestamp: String,
    pub environment: String,
    pub database: String,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupInfo {
    pub name: String,
    pub path: PathBuf,
    pub metadata: BackupMetadata,
    pub size: u64,
}

/// SQL text snapshots of an environment, one directory per backup.
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, DbError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a snapshot of `tables` (every table when `None`) and returns the
    /// backup name. A failed backup leaves nothing behind.
    pub async fn create_backup(
        &self,
        client: &dyn DbClient,
        environment: &str,
        database: &str,
        tables: Option<&[String]>,
    ) -> Result<String, DbError> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let (name, path) = self.reserve_directory(environment, &timestamp)?;

        match self
            .write_backup(client, &path, environment, database, &timestamp, tables)
            .await
        {
            Ok(count) => {
                info!("Backup {} created with {} tables", name, count);
                Ok(name)
            }
            Err(e) => {
                error!("Backup {} failed: {}", name, e);
                if let Err(cleanup) = fs::remove_dir_all(&path) {
                    warn!("Could not remove incomplete backup {}: {}", name, cleanup);
                }
                Err(e)
            }
        }
    }

    fn reserve_directory(&self, environment: &str, timestamp: &str) -> Result<(String, PathBuf), DbError> {
        let base = format!("backup_{}_{}", environment, timestamp);
        let mut name = base.clone();
        let mut attempt = 1;
        while self.dir.join(&name).exists() {
            attempt += 1;
            name = format!("{}_{}", base, attempt);
        }

        let path = self.dir.join(&name);
        fs::create_dir_all(&path).map_err(|e| io_error(&path, e))?;
        Ok((name, path))
    }

    async fn write_backup(
        &self,
        client: &dyn DbClient,
        path: &Path,
        environment: &str,
        database: &str,
        timestamp: &str,
        tables: Option<&[String]>,
    ) -> Result<usize, DbError> {
        let tables = match tables {
            Some(tables) => tables.to_vec(),
            None => client.list_tables().await?,
        };
        info!("Backing up {} tables of {}", tables.len(), environment);

        let metadata = BackupMetadata {
            timestamp: timestamp.to_string(),
            environment: environment.to_string(),
            database: database.to_string(),
            tables: tables.clone(),
        };
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| DbError::Backup(format!("cannot serialize metadata: {}", e)))?;
        write_file(&path.join(METADATA_FILE), &json)?;

        let mut written = 0;
        for table in &tables {
            if !client.table_exists(table).await? {
                warn!("Table {} does not exist, not backed up", table);
                continue;
            }
            backup_table(client, path, table).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Backups with readable metadata, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, DbError> {
        let mut backups = Vec::new();

        for entry in fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, e))? {
            let entry = entry.map_err(|e| io_error(&self.dir, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let metadata = match read_metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            backups.push(BackupInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: directory_size(&path),
                path,
                metadata,
            });
        }

        backups.sort_by(|a, b| {
            b.metadata
                .timestamp
                .cmp(&a.metadata.timestamp)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(backups)
    }

    /// Returns `false` when no backup of that name exists.
    pub fn delete_backup(&self, name: &str) -> Result<bool, DbError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(DbError::Backup(format!("invalid backup name '{}'", name)));
        }

        let path = self.dir.join(name);
        if !path.is_dir() {
            warn!("Backup {} not found", name);
            return Ok(false);
        }

        fs::remove_dir_all(&path).map_err(|e| io_error(&path, e))?;
        info!("Backup {} removed", name);
        Ok(true)
    }

    /// Deletes all but the `keep` newest backups and returns how many went.
    pub fn cleanup_old_backups(&self, keep: usize) -> Result<usize, DbError> {
        let mut removed = 0;
        for backup in self.list_backups()?.iter().skip(keep) {
            if self.delete_backup(&backup.name)? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Removed {} old backups", removed);
        }
        Ok(removed)
    }
}

async fn backup_table(client: &dyn DbClient, dir: &Path, table: &str) -> Result<(), DbError> {
    let created_at = Local::now().format("%Y-%m-%d %H:%M:%S");

    let create = client.create_table_statement(table).await?;
    let structure = format!(
        "-- Structure of table {}\n-- Backup created at {}\n\nDROP TABLE IF EXISTS {};\n{};\n",
        table,
        created_at,
        quote(table),
        create
    );
    write_file(&dir.join(format!("{}_structure.sql", table)), &structure)?;

    let mut data = format!("-- Data of table {}\n-- Backup created at {}\n\n", table, created_at);
    let columns: Vec<String> = client
        .describe_table(table)
        .await?
        .into_iter()
        .map(|c| quote(&c.name))
        .collect();
    let rows = client.fetch_rows(table).await?;

    if columns.is_empty() {
        data.push_str(&format!("-- Table {} has no columns\n", table));
    } else if rows.is_empty() {
        data.push_str(&format!("-- Table {} has no rows\n", table));
    } else {
        data.push_str("SET FOREIGN_KEY_CHECKS = 0;\n");
        data.push_str(&format!("TRUNCATE TABLE {};\n\n", quote(table)));
        let column_list = columns.join(", ");
        for row in &rows {
            let values: Vec<String> = row.iter().map(|v| v.to_sql_literal()).collect();
            data.push_str(&format!(
                "INSERT INTO {} ({}) VALUES ({});\n",
                quote(table),
                column_list,
                values.join(", ")
            ));
        }
        data.push_str("\nSET FOREIGN_KEY_CHECKS = 1;\n");
    }
    write_file(&dir.join(format!("{}_data.sql", table)), &data)?;

    info!("Backed up table {} ({} rows)", table, rows.len());
    Ok(())
}

fn read_metadata(dir: &Path) -> Result<BackupMetadata, DbError> {
    let path = dir.join(METADATA_FILE);
    let content = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| DbError::Backup(format!("invalid metadata in {}: {}", path.display(), e)))
}

fn directory_size(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                directory_size(&path)
            } else {
                entry.metadata().map(|m| m.len()).unwrap_or(0)
            }
        })
        .sum()
}

fn write_file(path: &Path, content: &str) -> Result<(), DbError> {
    fs::write(path, content).map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, err: std::io::Error) -> DbError {
    DbError::Backup(format!("{}: {}", path.display(), err))
}

/// Human-readable byte count, e.g. `1.5 KB`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{column, MockDbClientMock};
    use crate::models::value::SqlValue;
    use mockall::predicate;
    use tempfile::TempDir;

    fn client() -> MockDbClientMock {
        let mut mock_db = MockDbClientMock::new();
        mock_db
            .expect_table_exists()
            .returning(|name| Ok(name != "ghost"));
        mock_db
            .expect_create_table_statement()
            .with(predicate::eq("users"))
            .returning(|_| Ok("CREATE TABLE `users` (`id` int, `name` varchar(50))".to_string()));
        mock_db.expect_describe_table().returning(|_| {
            Ok(vec![column("id", "int", 1), column("name", "varchar(50)", 2)])
        });
        mock_db.expect_fetch_rows().returning(|_| {
            Ok(vec![
                vec![SqlValue::Int(1), SqlValue::Text("O'Brien".to_string())],
                vec![SqlValue::Int(2), SqlValue::Null],
            ])
        });
        mock_db
    }

    fn write_backup_dir(root: &Path, name: &str, timestamp: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        let metadata = BackupMetadata {
            timestamp: timestamp.to_string(),
            environment: "production".to_string(),
            database: "shop".to_string(),
            tables: vec!["users".to_string()],
        };
        fs::write(
            dir.join(METADATA_FILE),
            serde_json::to_string(&metadata).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_create_backup_writes_sql_files() {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::new(dir.path()).unwrap();
        let tables = vec!["users".to_string(), "ghost".to_string()];

        let name = manager
            .create_backup(&client(), "production", "shop", Some(&tables))
            .await
            .unwrap();
        assert!(name.starts_with("backup_production_"));

        let backup = dir.path().join(&name);
        let structure = fs::read_to_string(backup.join("users_structure.sql")).unwrap();
        assert!(structure.contains("DROP TABLE IF EXISTS `users`;"));
        assert!(structure.contains("CREATE TABLE `users`"));

        let data = fs::read_to_string(backup.join("users_data.sql")).unwrap();
        assert!(data.contains("INSERT INTO `users` (`id`, `name`) VALUES (1, 'O''Brien');"));
        assert!(data.contains("VALUES (2, NULL);"));
        assert!(!backup.join("ghost_structure.sql").exists());

        let listed = manager.list_backups().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metadata.tables, tables);
        assert!(listed[0].size > 0);
    }

    #[tokio::test]
    async fn test_failed_backup_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::new(dir.path()).unwrap();

        let mut mock_db = MockDbClientMock::new();
        mock_db.expect_table_exists().returning(|_| Ok(true));
        mock_db
            .expect_create_table_statement()
            .returning(|_| Err(DbError::General("connection lost".to_string())));

        let result = manager
            .create_backup(&mock_db, "production", "shop", Some(&["users".to_string()]))
            .await;
        assert!(result.is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_list_and_cleanup_keep_newest() {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::new(dir.path()).unwrap();
        write_backup_dir(dir.path(), "backup_production_20240101_000000", "20240101_000000");
        write_backup_dir(dir.path(), "backup_production_20240301_000000", "20240301_000000");
        write_backup_dir(dir.path(), "backup_production_20240201_000000", "20240201_000000");
        fs::create_dir_all(dir.path().join("not_a_backup")).unwrap();

        let names: Vec<String> = manager
            .list_backups()
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "backup_production_20240301_000000",
                "backup_production_20240201_000000",
                "backup_production_20240101_000000",
            ]
        );

        assert_eq!(manager.cleanup_old_backups(1).unwrap(), 2);
        assert_eq!(manager.list_backups().unwrap().len(), 1);
        assert_eq!(manager.cleanup_old_backups(1).unwrap(), 0);
    }

    #[test]
    fn test_delete_backup() {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::new(dir.path()).unwrap();
        write_backup_dir(dir.path(), "backup_development_20240101_000000", "20240101_000000");

        assert!(manager.delete_backup("backup_development_20240101_000000").unwrap());
        assert!(!manager.delete_backup("backup_development_20240101_000000").unwrap());
        assert!(manager.delete_backup("../etc").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
