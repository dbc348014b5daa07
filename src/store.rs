//! Account verification against the document store.
//!
//! Two strictly sequential round-trips. The lookup view maps an external
//! user id to its account document; the document is then fetched with the
//! caller's session token as credential. Only the second step proves the
//! token belongs to the resolved account, so a forged token gains nothing
//! from the external id alone.

use reqwest::{StatusCode, header};
use serde::Deserialize;
use url::Url;

use crate::config::Store;
use crate::error::{Result, ServerError};

const USERS_DATABASE: &str = "_users";

/// Outcome of the two-step credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Session token authenticated against the resolved account.
    Valid,
    /// Lookup view knows no account for the external id.
    AccountNotFound,
    /// Account exists but the store refused the session token.
    SessionInvalid,
}

// expected view body:
// {"total_rows":8,"offset":0,"rows":[{"id":"org.couchdb.user:casper","key":"2w72y1c","value":null}]}
#[derive(Debug, Default, Deserialize)]
struct ViewResponse {
    rows: Option<Vec<ViewRow>>,
}

#[derive(Debug, Deserialize)]
struct ViewRow {
    id: String,
}

/// Client for the document store holding user accounts.
#[derive(Debug, Clone)]
pub struct AccountStore {
    client: reqwest::Client,
    base: Url,
    username: String,
    password: String,
    namespace: String,
    lookup_view: String,
}

impl AccountStore {
    /// Create a new [`AccountStore`].
    pub fn new(config: &Store) -> Result<Self> {
        let base = Url::parse(&config.address)?;
        if base.cannot_be_a_base() {
            return Err(ServerError::StoreUrl);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base,
            username: config.username.clone(),
            password: config.password.clone(),
            namespace: config.users_namespace.clone(),
            lookup_view: config.lookup_view.clone(),
        })
    }

    fn users_url<I>(&self, segments: I) -> Result<Url>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ServerError::StoreUrl)?
            .pop_if_empty()
            .push(USERS_DATABASE)
            .extend(segments);
        Ok(url)
    }

    /// Map an external user id to its account document id.
    ///
    /// Admin-authenticated: this resolves the lookup key, it authorizes
    /// nothing on behalf of the caller.
    pub async fn resolve_account(
        &self,
        external_id: &str,
    ) -> Result<Option<String>> {
        let mut url = self.users_url([
            "_design",
            "views",
            "_view",
            self.lookup_view.as_str(),
        ])?;
        url.query_pairs_mut()
            .append_pair("key", &format!("\"{external_id}\""));

        let body = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?
            .text()
            .await?;

        // bodies without a `rows` field, store error bodies included,
        // mean no account.
        let view: ViewResponse =
            serde_json::from_str(&body).unwrap_or_default();
        let Some(rows) = view.rows else {
            return Ok(None);
        };

        // first row wins by store order.
        Ok(rows.first().map(|row| document_local_id(&row.id).to_owned()))
    }

    /// Fetch the account document with the session token as credential.
    ///
    /// A 200 proves the token is a live session for that account; any
    /// other status means the store refused it.
    pub async fn validate_session(
        &self,
        account_id: &str,
        token: &str,
    ) -> Result<bool> {
        let document_id = format!("{}:{account_id}", self.namespace);
        let url = self.users_url([document_id.as_str()])?;

        let response = self
            .client
            .get(url)
            .header(header::COOKIE, format!("AuthSession={token}"))
            .send()
            .await?;

        Ok(response.status() == StatusCode::OK)
    }

    /// Run both verification steps, stopping at the first failure.
    pub async fn verify(
        &self,
        external_id: &str,
        token: &str,
    ) -> Result<Verification> {
        let Some(account_id) = self.resolve_account(external_id).await? else {
            return Ok(Verification::AccountNotFound);
        };

        if self.validate_session(&account_id, token).await? {
            Ok(Verification::Valid)
        } else {
            Ok(Verification::SessionInvalid)
        }
    }
}

/// Segment after the last `:` of a document id.
fn document_local_id(id: &str) -> &str {
    id.rsplit(':').next().unwrap_or(id)
}
