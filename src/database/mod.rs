//! # Database Password Rotation
//!
//! Keeps a database user's password in step with a value managed by a
//! ManagedStaticSecret.
//!
//! Each engine knows how to change one user's password on one host. The
//! host list is tried in order and the first host that accepts the change
//! wins; when every host fails the last error is returned.
//!
//! ## Module Structure
//!
//! - `postgres.rs` - `ALTER ROLE ... WITH PASSWORD`
//! - `mysql.rs` - `ALTER USER ... IDENTIFIED BY` followed by `FLUSH PRIVILEGES`
//! - `elastic.rs` - Elasticsearch `_security/user/{user}/_password` API
//! - `cassandra.rs` - CQL `ALTER ROLE ... WITH PASSWORD =`

mod cassandra;
mod elastic;
mod mysql;
mod postgres;

use async_trait::async_trait;
use std::fmt;
use tracing::{error, info};

pub use cassandra::{quote_identifier_cql, quote_literal_cql, CassandraUpdater};
pub use elastic::ElasticUpdater;
pub use mysql::{quote_literal_mysql, MysqlUpdater};
pub use postgres::{quote_identifier, quote_literal, PostgresUpdater};

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseEngine {
    Postgres,
    Mysql,
    Elastic,
    Cassandra,
}

/// Driver names accepted in `databases[].driver`
const ENGINES: &[(&str, DatabaseEngine)] = &[
    ("postgres", DatabaseEngine::Postgres),
    ("mysql", DatabaseEngine::Mysql),
    ("elastic", DatabaseEngine::Elastic),
    ("cassandra", DatabaseEngine::Cassandra),
];

impl DatabaseEngine {
    /// Look up an engine by driver name
    #[must_use]
    pub fn from_driver(driver: &str) -> Option<Self> {
        ENGINES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(driver.trim()))
            .map(|(_, engine)| *engine)
    }

    /// Admin user used when the login Secret does not name one
    #[must_use]
    pub fn default_login(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "root",
            Self::Elastic => "elastic",
            Self::Cassandra => "cassandra",
        }
    }

    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Mysql => 3306,
            Self::Elastic => 9200,
            Self::Cassandra => 9042,
        }
    }

    fn updater(self) -> &'static dyn PasswordUpdater {
        match self {
            Self::Postgres => &PostgresUpdater,
            Self::Mysql => &MysqlUpdater,
            Self::Elastic => &ElasticUpdater,
            Self::Cassandra => &CassandraUpdater,
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = ENGINES
            .iter()
            .find(|(_, engine)| engine == self)
            .map_or("unknown", |(name, _)| name);
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("unknown database driver {0:?}")]
    UnknownDriver(String),
    #[error("no hosts configured")]
    NoHosts,
    #[error("cannot connect to {host}: {message}")]
    Connection { host: String, message: String },
    #[error("query failed on {host}: {source}")]
    Query {
        host: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("statement failed on {host}: {message}")]
    Statement { host: String, message: String },
    #[error("invalid URL for {host}: {message}")]
    InvalidUrl { host: String, message: String },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Everything needed to change one user's password
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordChange {
    pub username: String,
    pub password: String,
    /// MySQL account host part
    pub user_host: String,
    pub login_username: String,
    pub login_password: String,
    pub hosts: Vec<String>,
    pub port: u16,
}

impl fmt::Debug for PasswordChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordChange")
            .field("username", &self.username)
            .field("user_host", &self.user_host)
            .field("login_username", &self.login_username)
            .field("hosts", &self.hosts)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl PasswordChange {
    /// Fill in the engine's admin user, port and MySQL host part where unset
    #[must_use]
    pub fn with_engine_defaults(mut self, engine: DatabaseEngine) -> Self {
        if self.login_username.is_empty() {
            self.login_username = engine.default_login().to_string();
        }
        if self.port == 0 {
            self.port = engine.default_port();
        }
        if self.user_host.is_empty() {
            self.user_host = "%".to_string();
        }
        self
    }
}

/// Changes a password on a single host
#[async_trait]
pub trait PasswordUpdater: Send + Sync {
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    async fn update_on_host(&self, change: &PasswordChange, host: &str) -> Result<(), DatabaseError>;
}

/// Entry point used by the static secret reconciler
#[async_trait]
pub trait DatabaseRotator: Send + Sync {
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    async fn rotate(&self, driver: &str, change: PasswordChange) -> Result<(), DatabaseError>;
}

/// [`DatabaseRotator`] dispatching to the built-in engines
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineRotator;

#[async_trait]
impl DatabaseRotator for EngineRotator {
    async fn rotate(&self, driver: &str, change: PasswordChange) -> Result<(), DatabaseError> {
        update_user_password(driver, change).await
    }
}

/// Change the password on the first host that accepts it
#[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
pub async fn update_user_password(driver: &str, change: PasswordChange) -> Result<(), DatabaseError> {
    let engine = DatabaseEngine::from_driver(driver)
        .ok_or_else(|| DatabaseError::UnknownDriver(driver.to_string()))?;
    let updater = engine.updater();
    let change = change.with_engine_defaults(engine);

    update_with(updater, engine, &change).await
}

async fn update_with(
    updater: &dyn PasswordUpdater,
    engine: DatabaseEngine,
    change: &PasswordChange,
) -> Result<(), DatabaseError> {
    let mut last_error = DatabaseError::NoHosts;
    for host in &change.hosts {
        match updater.update_on_host(change, host).await {
            Ok(()) => {
                info!(engine = %engine, host = %host, user = %change.username, "✅ Database password updated");
                return Ok(());
            }
            Err(e) => {
                error!(engine = %engine, host = %host, error = %e, "Cannot update password on host");
                last_error = e;
            }
        }
    }

    error!(engine = %engine, user = %change.username, "Password not updated");
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedUpdater {
        accept: Vec<&'static str>,
        tried: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PasswordUpdater for ScriptedUpdater {
        async fn update_on_host(&self, _change: &PasswordChange, host: &str) -> Result<(), DatabaseError> {
            self.tried.lock().unwrap().push(host.to_string());
            if self.accept.contains(&host) {
                Ok(())
            } else {
                Err(DatabaseError::Connection {
                    host: host.to_string(),
                    message: "refused".to_string(),
                })
            }
        }
    }

    fn change(hosts: &[&str]) -> PasswordChange {
        PasswordChange {
            username: "app".to_string(),
            password: "secret".to_string(),
            user_host: String::new(),
            login_username: String::new(),
            login_password: "admin".to_string(),
            hosts: hosts.iter().map(|h| (*h).to_string()).collect(),
            port: 0,
        }
    }

    #[test]
    fn test_engine_lookup() {
        assert_eq!(DatabaseEngine::from_driver("postgres"), Some(DatabaseEngine::Postgres));
        assert_eq!(DatabaseEngine::from_driver("MySQL"), Some(DatabaseEngine::Mysql));
        assert_eq!(DatabaseEngine::from_driver("elastic"), Some(DatabaseEngine::Elastic));
        assert_eq!(
            DatabaseEngine::from_driver(" cassandra "),
            Some(DatabaseEngine::Cassandra)
        );
        assert_eq!(DatabaseEngine::from_driver("oracle"), None);
        assert_eq!(DatabaseEngine::Mysql.to_string(), "mysql");
    }

    #[test]
    fn test_engine_defaults() {
        let pg = change(&["db"]).with_engine_defaults(DatabaseEngine::Postgres);
        assert_eq!(pg.login_username, "postgres");
        assert_eq!(pg.port, 5432);

        let my = change(&["db"]).with_engine_defaults(DatabaseEngine::Mysql);
        assert_eq!(my.login_username, "root");
        assert_eq!(my.port, 3306);
        assert_eq!(my.user_host, "%");

        let mut explicit = change(&["db"]);
        explicit.login_username = "admin".to_string();
        explicit.port = 6432;
        let explicit = explicit.with_engine_defaults(DatabaseEngine::Postgres);
        assert_eq!(explicit.login_username, "admin");
        assert_eq!(explicit.port, 6432);

        let cql = change(&["c1"]).with_engine_defaults(DatabaseEngine::Cassandra);
        assert_eq!(cql.login_username, "cassandra");
        assert_eq!(cql.port, 9042);
    }

    #[tokio::test]
    async fn test_first_successful_host_wins() {
        let updater = ScriptedUpdater {
            accept: vec!["b", "c"],
            ..Default::default()
        };
        update_with(&updater, DatabaseEngine::Postgres, &change(&["a", "b", "c"]))
            .await
            .expect("second host accepts");
        assert_eq!(*updater.tried.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_all_hosts_failing_returns_last_error() {
        let updater = ScriptedUpdater::default();
        let err = update_with(&updater, DatabaseEngine::Mysql, &change(&["a", "b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Connection { host, .. } if host == "b"));
    }

    #[tokio::test]
    async fn test_no_hosts() {
        let updater = ScriptedUpdater::default();
        let err = update_with(&updater, DatabaseEngine::Mysql, &change(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NoHosts));
    }

    #[tokio::test]
    async fn test_unknown_driver() {
        let err = update_user_password("mongo", change(&["m1"])).await.unwrap_err();
        assert!(matches!(err, DatabaseError::UnknownDriver(d) if d == "mongo"));
    }
}
