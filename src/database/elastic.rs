//! Elasticsearch password rotation through the security API

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use super::{DatabaseError, PasswordChange, PasswordUpdater};

/// Calls `POST /_security/user/{user}/_password` with basic auth
#[derive(Debug, Clone, Copy, Default)]
pub struct ElasticUpdater;

/// Hosts with a scheme are used as-is, bare hosts get `http://` and the port
///
/// The username is appended as a single percent-encoded path segment.
fn password_url(host: &str, port: u16, username: &str) -> Result<Url, DatabaseError> {
    let invalid = |message: String| DatabaseError::InvalidUrl {
        host: host.to_string(),
        message,
    };
    // dot segments would be dropped from the path
    if username.is_empty() || username == "." || username == ".." {
        return Err(invalid(format!("invalid username {username:?}")));
    }

    let base = if host.starts_with("https://") || host.starts_with("http://") {
        host.to_string()
    } else {
        format!("http://{host}:{port}")
    };
    let mut url = Url::parse(&base).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("host cannot carry a path".to_string()))?
        .pop_if_empty()
        .extend(["_security", "user", username, "_password"]);
    Ok(url)
}

#[async_trait]
impl PasswordUpdater for ElasticUpdater {
    async fn update_on_host(&self, change: &PasswordChange, host: &str) -> Result<(), DatabaseError> {
        let url = password_url(host, change.port, &change.username)?;
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(url.scheme() == "https")
            .build()
            .map_err(|source| DatabaseError::Http {
                url: url.to_string(),
                source,
            })?;

        debug!(url = %url, user = %change.username, "Updating Elasticsearch password");
        let response = client
            .post(url.clone())
            .basic_auth(&change.login_username, Some(&change.login_password))
            .json(&serde_json::json!({ "password": change.password }))
            .send()
            .await
            .map_err(|source| DatabaseError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status().as_u16();
        if status == 200 {
            Ok(())
        } else {
            Err(DatabaseError::Status {
                url: url.to_string(),
                status,
            })
        }
    }
}
