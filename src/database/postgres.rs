//! PostgreSQL password rotation

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{ConnectOptions, Connection, Executor};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use super::{DatabaseError, PasswordChange, PasswordUpdater};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs `ALTER ROLE` as the admin user
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresUpdater;

/// `PGSSLMODE`, `disable` when unset or unparsable
fn ssl_mode() -> PgSslMode {
    let mode = std::env::var("PGSSLMODE").unwrap_or_else(|_| "disable".to_string());
    PgSslMode::from_str(&mode).unwrap_or_else(|_| {
        warn!(mode = %mode, "Unknown PGSSLMODE, using disable");
        PgSslMode::Disable
    })
}

/// Quote an identifier with double quotes
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    // identifiers end at the first NUL
    let name = name.split('\0').next().unwrap_or_default();
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal; backslashes switch to the `E'...'` escape form
#[must_use]
pub fn quote_literal(literal: &str) -> String {
    let quoted = literal.replace('\'', "''");
    if quoted.contains('\\') {
        format!(" E'{}'", quoted.replace('\\', "\\\\"))
    } else {
        format!("'{quoted}'")
    }
}

fn alter_role_sql(change: &PasswordChange) -> String {
    format!(
        "ALTER ROLE {} WITH PASSWORD {}",
        quote_identifier(&change.username),
        quote_literal(&change.password)
    )
}

#[async_trait]
impl PasswordUpdater for PostgresUpdater {
    async fn update_on_host(&self, change: &PasswordChange, host: &str) -> Result<(), DatabaseError> {
        let options = PgConnectOptions::new()
            .host(host)
            .port(change.port)
            .username(&change.login_username)
            .password(&change.login_password)
            .database("postgres")
            .ssl_mode(ssl_mode());

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

        debug!(host = %host, user = %change.username, "Altering PostgreSQL role");
        let result = conn
            .execute(sqlx::raw_sql(&alter_role_sql(change)))
            .await
            .map(|_| ())
            .map_err(|source| DatabaseError::Query {
                host: host.to_string(),
                source,
            });

        if let Err(e) = conn.close().await {
            debug!(host = %host, error = %e, "Error closing PostgreSQL connection");
        }
        result
    }
}
