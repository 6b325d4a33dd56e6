use log::{debug, error, info};

use crate::{db::DbClient, errors::DbError, models::value::SqlValue};

use super::ddl::quote;

pub const BATCH_SIZE: usize = 1000;

/// Upper bound on `?` placeholders in one prepared MySQL statement.
const MAX_PLACEHOLDERS: usize = 65_535;

/// Replaces the content of a target table with a set of source rows.
pub struct DataCopier<'a> {
    target: &'a dyn DbClient,
    batch_size: usize,
}

impl<'a> DataCopier<'a> {
    pub fn new(target: &'a dyn DbClient) -> Self {
        Self {
            target,
            batch_size: BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Clears `table` and inserts `rows`, one transaction per batch.
    ///
    /// A failed batch is rolled back and ends the copy; batches committed before
    /// it stay committed. Returns the number of rows inserted.
    pub async fn copy(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, DbError> {
        self.target.truncate_table(table).await?;

        if rows.is_empty() {
            info!("Table {} cleared, no rows to copy", table);
            return Ok(0);
        }

        if let Some(row) = rows.iter().find(|row| row.len() != columns.len()) {
            return Err(DbError::General(format!(
                "Row has {} values but {} has {} columns",
                row.len(),
                table,
                columns.len()
            )));
        }

        let rows_per_statement = (MAX_PLACEHOLDERS / columns.len().max(1)).clamp(1, self.batch_size);
        let mut inserted = 0u64;

        for (number, batch) in rows.chunks(self.batch_size).enumerate() {
            let mut tx = self.target.begin_transaction().await?;

            let mut outcome = Ok(());
            for group in batch.chunks(rows_per_statement) {
                let statement = insert_statement(table, columns, group.len());
                let params: Vec<SqlValue> = group.iter().flatten().cloned().collect();
                if let Err(e) = tx.execute_bound(&statement, &params).await {
                    outcome = Err(e);
                    break;
                }
            }

            match outcome {
                Ok(()) => tx.commit_transaction().await?,
                Err(e) => {
                    error!("Batch {} of {} failed: {}", number + 1, table, e);
                    if let Err(rollback_err) = tx.rollback_transaction().await {
                        error!("Rollback of batch {} failed: {}", number + 1, rollback_err);
                    }
                    return Err(e);
                }
            }

            inserted += batch.len() as u64;
            debug!("Committed batch {} of {} ({} rows)", number + 1, table, batch.len());
        }

        info!("Copied {} rows into {}", inserted, table);
        Ok(inserted)
    }
}

/// `INSERT INTO t (a, b) VALUES (?, ?), (?, ?)` for `row_count` rows.
pub fn insert_statement(table: &str, columns: &[String], row_count: usize) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let row = format!("({})", vec!["?"; columns.len()].join(", "));
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote(table),
        names.join(", "),
        vec![row; row_count.max(1)].join(", ")
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{tests::MockDbClientMock, Transaction};
    use async_trait::async_trait;
    use mockall::predicate;
    use std::sync::{Arc, Mutex};

    /// Transaction double recording what happens to it.
    pub struct RecordingTransaction {
        pub log: Arc<Mutex<Vec<String>>>,
        pub fail_on_value: Option<SqlValue>,
    }

    #[async_trait]
    impl Transaction for RecordingTransaction {
        async fn execute_transaction(&mut self, query: &str) -> Result<(), DbError> {
            self.log.lock().unwrap().push(query.to_string());
            Ok(())
        }

        async fn execute_bound(&mut self, query: &str, params: &[SqlValue]) -> Result<(), DbError> {
            if self.fail_on_value.as_ref().is_some_and(|v| params.contains(v)) {
                return Err(DbError::General("Duplicate entry".to_string()));
            }
            let rows = query.matches("(?").count();
            self.log.lock().unwrap().push(format!("insert {}", rows));
            Ok(())
        }

        async fn commit_transaction(self: Box<Self>) -> Result<(), DbError> {
            self.log.lock().unwrap().push("commit".to_string());
            Ok(())
        }

        async fn rollback_transaction(self: Box<Self>) -> Result<(), DbError> {
            self.log.lock().unwrap().push("rollback".to_string());
            Ok(())
        }
    }

    fn rows(count: i64) -> Vec<Vec<SqlValue>> {
        (1..=count)
            .map(|id| vec![SqlValue::Int(id), SqlValue::Text(format!("user{}", id))])
            .collect()
    }

    fn columns() -> Vec<String> {
        vec!["id".to_string(), "name".to_string()]
    }

    fn target_with_log(
        log: Arc<Mutex<Vec<String>>>,
        fail_on_value: Option<SqlValue>,
    ) -> MockDbClientMock {
        let mut mock_db = MockDbClientMock::new();
        mock_db
            .expect_truncate_table()
            .with(predicate::eq("users"))
            .times(1)
            .returning(|_| Ok(()));
        mock_db.expect_begin_transaction().returning(move || {
            let tx: Box<dyn Transaction> = Box::new(RecordingTransaction {
                log: log.clone(),
                fail_on_value: fail_on_value.clone(),
            });
            Ok(tx)
        });
        mock_db
    }

    #[test]
    fn test_insert_statement() {
        assert_eq!(
            insert_statement("users", &columns(), 1),
            "INSERT INTO `users` (`id`, `name`) VALUES (?, ?)"
        );
        assert_eq!(
            insert_statement("users", &columns(), 3),
            "INSERT INTO `users` (`id`, `name`) VALUES (?, ?), (?, ?), (?, ?)"
        );
    }

    #[tokio::test]
    async fn test_copy_in_batches() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mock_db = target_with_log(log.clone(), None);

        let copied = DataCopier::new(&mock_db)
            .with_batch_size(2)
            .copy("users", &columns(), &rows(5))
            .await
            .unwrap();

        assert_eq!(copied, 5);
        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec!["insert 2", "commit", "insert 2", "commit", "insert 1", "commit"]
        );
    }

    #[tokio::test]
    async fn test_wide_rows_split_under_placeholder_limit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mock_db = target_with_log(log.clone(), None);
        let columns: Vec<String> = (0..100).map(|i| format!("c{}", i)).collect();
        let rows: Vec<Vec<SqlValue>> = (0..1000)
            .map(|id| (0..100).map(|c| SqlValue::Int(id * 100 + c)).collect())
            .collect();

        let copied = DataCopier::new(&mock_db)
            .copy("users", &columns, &rows)
            .await
            .unwrap();

        assert_eq!(copied, 1000);
        // 655 rows of 100 columns fit under 65535 placeholders.
        assert_eq!(*log.lock().unwrap(), vec!["insert 655", "insert 345", "commit"]);
    }

    #[tokio::test]
    async fn test_mismatched_row_is_rejected_before_inserting() {
        let mut mock_db = MockDbClientMock::new();
        mock_db.expect_truncate_table().returning(|_| Ok(()));
        mock_db.expect_begin_transaction().never();

        let result = DataCopier::new(&mock_db)
            .copy("users", &columns(), &[vec![SqlValue::Int(1)]])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_copy_empty_source_only_clears() {
        let mut mock_db = MockDbClientMock::new();
        mock_db
            .expect_truncate_table()
            .times(1)
            .returning(|_| Ok(()));
        mock_db.expect_begin_transaction().never();

        let copied = DataCopier::new(&mock_db)
            .copy("users", &columns(), &[])
            .await
            .unwrap();
        assert_eq!(copied, 0);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back_and_keeps_earlier_batches() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mock_db = target_with_log(log.clone(), Some(SqlValue::Int(4)));

        let result = DataCopier::new(&mock_db)
            .with_batch_size(3)
            .copy("users", &columns(), &rows(6))
            .await;

        assert!(result.is_err());
        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["insert 3", "commit", "rollback"]);
    }

    #[tokio::test]
    async fn test_clear_failure_stops_the_copy() {
        let mut mock_db = MockDbClientMock::new();
        mock_db
            .expect_truncate_table()
            .returning(|_| Err(DbError::General("locked".to_string())));
        mock_db.expect_begin_transaction().never();

        let result = DataCopier::new(&mock_db)
            .copy("users", &columns(), &rows(2))
            .await;
        assert!(result.is_err());
    }
}
