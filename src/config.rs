//! Configuration manager for mailgate.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_USERS_NAMESPACE: &str = "org.couchdb.user";
const DEFAULT_LOOKUP_VIEW: &str = "fastspring-by-id";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Domain name of current instance.
    pub url: String,
    support: Option<String>,
    #[serde(default)]
    version: String,
    /// Related to the account document store.
    #[serde(skip_serializing)]
    pub store: Option<Store>,
    /// Related to the mail delivery queue.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
}

/// Document store holding user accounts.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Store {
    /// Base URL of the CouchDB instance.
    pub address: String,
    /// Admin username, used for lookup-view queries only.
    pub username: String,
    /// Admin password, used for lookup-view queries only.
    pub password: String,
    /// Namespace prefixing account document ids.
    #[serde(default = "default_users_namespace")]
    pub users_namespace: String,
    /// View mapping external user ids to account documents.
    #[serde(default = "default_lookup_view")]
    pub lookup_view: String,
}

fn default_users_namespace() -> String {
    DEFAULT_USERS_NAMESPACE.to_owned()
}

fn default_lookup_view() -> String {
    DEFAULT_LOOKUP_VIEW.to_owned()
}

/// Delivery queue configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// Hostname:(?port) for RabbitMQ instance.
    pub address: String,
    /// RabbitMQ default vhost.
    pub vhost: Option<String>,
    /// RabbitMQ username to access queue.
    pub username: String,
    /// RabbitMQ password to access queue.
    pub password: String,
    /// Max channel connections.
    pub pool: Option<u16>,
    /// Queue name to send mailing events.
    pub queue: String,
    /// Encryption layer.
    pub tls: Option<bool>,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the default location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        match File::open(Path::new(DEFAULT_CONFIG_PATH)) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Ok(Arc::new(self.error(err)));
                        },
                    };

                // set app version.
                config.version = VERSION.to_owned();

                // normalize URLs.
                config.url = self.normalize_url(&config.url)?;
                config.support = config
                    .support
                    .map(|s| self.normalize_url(&s))
                    .transpose()?;

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        let config = Configuration::default();

        assert_eq!(
            config.normalize_url("relay.example.com").unwrap(),
            "https://relay.example.com/"
        );
        assert_eq!(
            config.normalize_url("http://127.0.0.1:5984").unwrap(),
            "http://127.0.0.1:5984/"
        );
        assert!(config.normalize_url("https://").is_err());
    }
}
