use thiserror::Error;

/// MySQL error numbers that signal a foreign-key problem: a referenced table or
/// index that does not exist yet, or a row that violates a reference.
const FOREIGN_KEY_ERROR_CODES: [u16; 9] = [1215, 1216, 1217, 1451, 1452, 1822, 1824, 3734, 6125];

/// Custom error type for database operations.
#[derive(Error, Debug)]
pub enum DbError {
    /// Error that occurs during database interactions (e.g., SQL query failure).
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// The server rejected a statement because of a foreign-key constraint.
    #[error("Foreign key constraint error ({code}): {message}")]
    ForeignKeyConstraint { code: u16, message: String },
    /// A value could not be decoded from a result row.
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Backup error: {0}")]
    Backup(String),
    /// Configuration error (e.g., invalid database URL or missing parameters).
    #[error("Configuration error: {0}")]
    Config(String),
    /// Transaction error (e.g., failed to commit or rollback a transaction).
    #[error("Transaction error: {0}")]
    Transaction(String),
    /// Connection error (e.g., issues with network or database connection).
    #[error("Connection error: {0}")]
    Connection(String),
    /// General error with a custom message.
    #[error("Error: {0}")]
    General(String),
}

impl DbError {
    /// Classifies a driver error by its vendor error number.
    pub fn classify(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db| db.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>())
            .map(|mysql| mysql.number());

        match code {
            Some(code) if FOREIGN_KEY_ERROR_CODES.contains(&code) => {
                DbError::ForeignKeyConstraint {
                    code,
                    message: err.to_string(),
                }
            }
            _ => DbError::Sqlx(err),
        }
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, DbError::ForeignKeyConstraint { .. })
    }
}

/// Run-level failure of a replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("Cannot reach the {environment} database: {source}")]
    Connection {
        environment: String,
        #[source]
        source: DbError,
    },
    #[error("Failed to build the migration plan: {0}")]
    Plan(#[source] DbError),
    #[error("Backup before replication failed: {0}")]
    Backup(#[source] DbError),
}
