//! MySQL password rotation

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};
use sqlx::{ConnectOptions, Connection, Executor};
use std::time::Duration;
use tracing::debug;

use super::{DatabaseError, PasswordChange, PasswordUpdater};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs `ALTER USER` and `FLUSH PRIVILEGES` as the admin user
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlUpdater;

/// Single-quote a literal, doubling quotes and escaping backslashes
#[must_use]
pub fn quote_literal_mysql(literal: &str) -> String {
    format!("'{}'", literal.replace('\'', "''").replace('\\', "\\\\"))
}

fn alter_user_sql(change: &PasswordChange) -> String {
    format!(
        "ALTER USER {}@{} IDENTIFIED BY {}",
        quote_literal_mysql(&change.username),
        quote_literal_mysql(&change.user_host),
        quote_literal_mysql(&change.password)
    )
}

#[async_trait]
impl PasswordUpdater for MysqlUpdater {
    async fn update_on_host(&self, change: &PasswordChange, host: &str) -> Result<(), DatabaseError> {
        let options = MySqlConnectOptions::new()
            .host(host)
            .port(change.port)
            .username(&change.login_username)
            .password(&change.login_password)
            .database("mysql")
            .ssl_mode(MySqlSslMode::Preferred);

        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, options.connect())
            .await
            .map_err(|_| DatabaseError::Connection {
                host: host.to_string(),
                message: format!("timed out after {}s", CONNECT_TIMEOUT.as_secs()),
            })?
            .map_err(|e| DatabaseError::Connection {
                host: host.to_string(),
                message: e.to_string(),
            })?;

        debug!(host = %host, user = %change.username, "Altering MySQL user");
        let mut result = conn
            .execute(sqlx::raw_sql(&alter_user_sql(change)))
            .await
            .map(|_| ());
        if result.is_ok() {
            result = conn
                .execute(sqlx::raw_sql("FLUSH PRIVILEGES"))
                .await
                .map(|_| ());
        }

        if let Err(e) = conn.close().await {
            debug!(host = %host, error = %e, "Error closing MySQL connection");
        }
        result.map_err(|source| DatabaseError::Query {
            host: host.to_string(),
            source,
        })
    }
}
