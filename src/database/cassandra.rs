//! Cassandra password rotation over CQL

use async_trait::async_trait;
use scylla::client::session_builder::SessionBuilder;
use scylla::statement::unprepared::Statement;
use scylla::statement::Consistency;
use std::time::Duration;
use tracing::debug;

use super::{DatabaseError, PasswordChange, PasswordUpdater};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs `ALTER ROLE` at quorum consistency
#[derive(Debug, Clone, Copy, Default)]
pub struct CassandraUpdater;

/// Quote a CQL identifier with double quotes
#[must_use]
pub fn quote_identifier_cql(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a CQL string literal with single quotes
#[must_use]
pub fn quote_literal_cql(literal: &str) -> String {
    format!("'{}'", literal.replace('\'', "''"))
}

fn alter_role_cql(change: &PasswordChange) -> String {
    format!(
        "ALTER ROLE {} WITH PASSWORD = {}",
        quote_identifier_cql(&change.username),
        quote_literal_cql(&change.password)
    )
}

#[async_trait]
impl PasswordUpdater for CassandraUpdater {
    async fn update_on_host(&self, change: &PasswordChange, host: &str) -> Result<(), DatabaseError> {
        let mut builder = SessionBuilder::new()
            .known_node(format!("{host}:{}", change.port))
            .connection_timeout(CONNECT_TIMEOUT);
        // clusters without authentication take no credentials
        if !change.login_password.is_empty() {
            builder = builder.user(&change.login_username, &change.login_password);
        }

        let session = builder.build().await.map_err(|e| DatabaseError::Connection {
            host: host.to_string(),
            message: e.to_string(),
        })?;

        let mut statement = Statement::new(alter_role_cql(change));
        statement.set_consistency(Consistency::Quorum);

        debug!(host = %host, user = %change.username, "Altering Cassandra role");
        session
            .query_unpaged(statement, ())
            .await
            .map(|_| ())
            .map_err(|e| DatabaseError::Statement {
                host: host.to_string(),
                message: e.to_string(),
            })
    }
}
