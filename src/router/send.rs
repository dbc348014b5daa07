//! Relay an email document after credential verification.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::email::EmailPayload;
use crate::error::{Result, ServerError};
use crate::store::Verification;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Sent {
    pub ok: bool,
}

/// Handler to relay an email.
///
/// Gates run in order: payload, token, account lookup, session check.
/// The first failing gate answers the request; the dispatcher only ever
/// runs once every gate passed.
pub async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Sent>> {
    let Some(email) = EmailPayload::from_slice(&body) else {
        tracing::warn!("email rejected: no body found");
        return Err(ServerError::NoBody);
    };

    let Some(token) = super::bearer_token(&headers) else {
        tracing::warn!(
            subject = email.subject(),
            meeting_id = email.meeting_id(),
            user_id = email.external_user_id(),
            "email rejected: no session token"
        );
        return Err(ServerError::Unauthenticated);
    };

    let verification =
        match state.store.verify(email.external_user_id(), token).await {
            Ok(verification) => verification,
            Err(err) => {
                tracing::warn!(
                    subject = email.subject(),
                    meeting_id = email.meeting_id(),
                    user_id = email.external_user_id(),
                    error = %err,
                    "email verification unreachable"
                );
                return Err(err);
            },
        };

    match verification {
        Verification::Valid => (),
        Verification::AccountNotFound => {
            tracing::warn!(
                subject = email.subject(),
                meeting_id = email.meeting_id(),
                user_id = email.external_user_id(),
                "email rejected: account not found"
            );
            return Err(ServerError::Unauthenticated);
        },
        Verification::SessionInvalid => {
            tracing::warn!(
                subject = email.subject(),
                meeting_id = email.meeting_id(),
                user_id = email.external_user_id(),
                "email rejected: session invalid"
            );
            return Err(ServerError::Unauthenticated);
        },
    }

    if let Err(err) = state.mail.send(&email).await {
        tracing::error!(
            subject = email.subject(),
            meeting_id = email.meeting_id(),
            user_id = email.external_user_id(),
            error = %err,
            "sending email failed"
        );
        return Err(err.into());
    }

    tracing::info!(
        subject = email.subject(),
        meeting_id = email.meeting_id(),
        user_id = email.external_user_id(),
        "email relayed"
    );

    Ok(Json(Sent { ok: true }))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;
    use wiremock::matchers::{any, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::mail::{DispatchError, Dispatcher};
    use crate::{app, make_request, router};

    const UNAUTHENTICATED: &str = "sending email failed: unauthenticated";
    const TOKEN: &str = "Bearer s3ss10n";

    #[derive(Debug, Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<EmailPayload>>,
        refusal: Option<String>,
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn send(
            &self,
            email: &EmailPayload,
        ) -> std::result::Result<(), DispatchError> {
            self.sent.lock().unwrap().push(email.clone());
            match &self.refusal {
                Some(reason) => Err(DispatchError::Rejected(reason.clone())),
                None => Ok(()),
            }
        }
    }

    fn payload() -> serde_json::Value {
        json!({
            "from": "foo@bar.com",
            "subject": "weekly minutes",
            "headers": {
                "X-MC-Metadata": {
                    "meeting_id": "m-42",
                    "user_id": "2w72y1c",
                },
            },
        })
    }

    fn view_body() -> serde_json::Value {
        json!({
            "total_rows": 1,
            "offset": 0,
            "rows": [
                {"id": "org.couchdb.user:casper", "key": "2w72y1c", "value": null},
            ],
        })
    }

    async fn body_string(
        response: axum::http::Response<axum::body::Body>,
    ) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    /// Store that must not receive a single request.
    async fn untouchable_store() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_send_without_body() {
        let server = untouchable_store().await;
        let mail = Arc::new(RecordingDispatcher::default());
        let app = app(router::state(&server.uri(), mail.clone()));

        let response =
            make_request(app, Method::POST, "/send", Some(TOKEN), String::new())
                .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "no body found");
        assert!(mail.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_with_null_body() {
        let server = untouchable_store().await;
        let mail = Arc::new(RecordingDispatcher::default());
        let app = app(router::state(&server.uri(), mail.clone()));

        let response = make_request(
            app,
            Method::POST,
            "/send",
            Some(TOKEN),
            "null".to_owned(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "no body found");
    }

    #[tokio::test]
    async fn test_send_without_token() {
        let server = untouchable_store().await;
        let mail = Arc::new(RecordingDispatcher::default());
        let app = app(router::state(&server.uri(), mail.clone()));

        let response = make_request(
            app,
            Method::POST,
            "/send",
            None,
            payload().to_string(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(response).await, UNAUTHENTICATED);
        assert!(mail.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_with_malformed_token() {
        let server = untouchable_store().await;
        let mail = Arc::new(RecordingDispatcher::default());
        let app = app(router::state(&server.uri(), mail.clone()));

        let response = make_request(
            app,
            Method::POST,
            "/send",
            Some("Basic s3ss10n"),
            payload().to_string(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(response).await, UNAUTHENTICATED);
    }

    #[tokio::test]
    async fn test_send_with_unknown_account() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"rows": []})),
            )
            .mount(&server)
            .await;

        let mail = Arc::new(RecordingDispatcher::default());
        let app = app(router::state(&server.uri(), mail.clone()));

        let response = make_request(
            app,
            Method::POST,
            "/send",
            Some(TOKEN),
            payload().to_string(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(response).await, UNAUTHENTICATED);
        // the session validator never ran.
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert!(mail.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_with_lookup_missing_rows_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"error": "not_found"})),
            )
            .mount(&server)
            .await;

        let mail = Arc::new(RecordingDispatcher::default());
        let app = app(router::state(&server.uri(), mail.clone()));

        let response = make_request(
            app,
            Method::POST,
            "/send",
            Some(TOKEN),
            payload().to_string(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(response).await, UNAUTHENTICATED);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_with_invalid_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_users/_design/views/_view/fastspring-by-id"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(view_body()),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_users/org.couchdb.user:casper"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let mail = Arc::new(RecordingDispatcher::default());
        let app = app(router::state(&server.uri(), mail.clone()));

        let response = make_request(
            app,
            Method::POST,
            "/send",
            Some(TOKEN),
            payload().to_string(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(response).await, UNAUTHENTICATED);
        assert!(mail.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_relays_email() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_users/_design/views/_view/fastspring-by-id"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(view_body()),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_users/org.couchdb.user:casper"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mail = Arc::new(RecordingDispatcher::default());
        let app = app(router::state(&server.uri(), mail.clone()));

        let response = make_request(
            app,
            Method::POST,
            "/send",
            Some(TOKEN),
            payload().to_string(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: Sent =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body, Sent { ok: true });

        // the dispatcher got exactly the original document, exactly once.
        let sent = mail.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(serde_json::to_value(&sent[0]).unwrap(), payload());
    }

    #[tokio::test]
    async fn test_send_with_refused_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_users/_design/views/_view/fastspring-by-id"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(view_body()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_users/org.couchdb.user:casper"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mail = Arc::new(RecordingDispatcher {
            refusal: Some("sending email failed because of foo".to_owned()),
            ..Default::default()
        });
        let app = app(router::state(&server.uri(), mail.clone()));

        let response = make_request(
            app,
            Method::POST,
            "/send",
            Some(TOKEN),
            payload().to_string(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            body_string(response).await,
            "sending email failed: \"sending email failed because of foo\""
        );
    }

    #[tokio::test]
    async fn test_send_with_unreachable_store() {
        let mail = Arc::new(RecordingDispatcher::default());
        // nothing listens there.
        let app =
            app(router::state("http://127.0.0.1:1", mail.clone()));

        let response = make_request(
            app,
            Method::POST,
            "/send",
            Some(TOKEN),
            payload().to_string(),
        )
        .await;

        // raw transport error, not the generic unauthenticated message.
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_string(response).await;
        assert!(!body.is_empty());
        assert_ne!(body, UNAUTHENTICATED);
        assert!(mail.sent.lock().unwrap().is_empty());
    }
}
