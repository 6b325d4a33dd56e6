use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlConnectOptions;

use crate::errors::DbError;

pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Source and target roles of the two configured environments.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn name(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ConnectionConfig {
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ConnectionConfig {
    pub fn validate(&self, environment: &str) -> Result<(), DbError> {
        let missing: Vec<&str> = [
            ("server", &self.server),
            ("database", &self.database),
            ("user", &self.user),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| *field)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DbError::Config(format!(
                "environment '{}' is missing: {}",
                environment,
                missing.join(", ")
            )))
        }
    }

    /// `server` may carry an explicit `host:port`.
    pub fn host_and_port(&self) -> (String, u16) {
        if let Some((host, port)) = self.server.rsplit_once(':') {
            if let Ok(port) = port.parse::<u16>() {
                return (host.to_string(), port);
            }
        }
        (
            self.server.clone(),
            self.port.unwrap_or(DEFAULT_MYSQL_PORT),
        )
    }

    pub fn connect_options(&self) -> MySqlConnectOptions {
        let (host, port) = self.host_and_port();
        MySqlConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .charset("utf8mb4")
    }

    /// Connection URL with the password masked, for display.
    pub fn redacted_url(&self) -> String {
        let (host, port) = self.host_and_port();
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user,
            "*".repeat(self.password.len()),
            host,
            port,
            self.database
        )
    }
}

/// Patch applied by `AppConfig::update_environment`; empty fields are kept.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub server: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectionUpdate {
    pub fn apply(&self, config: &mut ConnectionConfig) {
        let fields = [
            (&self.server, &mut config.server),
            (&self.database, &mut config.database),
            (&self.user, &mut config.user),
            (&self.password, &mut config.password),
        ];
        for (update, current) in fields {
            if let Some(value) = update.as_ref().filter(|v| !v.is_empty()) {
                *current = value.clone();
            }
        }
    }
}
