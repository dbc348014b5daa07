//! HTTP routes for the relay.

pub mod send;
pub mod status;

use axum::http::{HeaderMap, header};

const BEARER: &str = "Bearer ";

/// Token following the `Bearer ` prefix, if any.
///
/// Header name lookup is case-insensitive by construction of [`HeaderMap`].
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER))
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
pub(crate) fn state(
    store_address: &str,
    mail: std::sync::Arc<dyn crate::mail::Dispatcher>,
) -> crate::AppState {
    let mut config = crate::config::Configuration::default();
    config.name = "mailgate-test".to_owned();
    config.url = "http://localhost".to_owned();

    let store = crate::store::AccountStore::new(&crate::config::Store {
        address: store_address.to_owned(),
        username: "admin".to_owned(),
        password: "secret".to_owned(),
        users_namespace: "org.couchdb.user".to_owned(),
        lookup_view: "fastspring-by-id".to_owned(),
    })
    .expect("cannot build account store");

    crate::AppState {
        config: std::sync::Arc::new(config),
        store,
        mail,
    }
}
