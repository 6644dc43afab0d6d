use crate::ports::{IdentityResolver, PushSender};
use crate::state;
use crate::types::notification::{ApnsRequest, DispatchError, FcmRequest};

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::routing::post;
use thiserror::Error;

mod caller;
mod register;
mod send;

/// Request failures as the HTTP client sees them.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The peer could not be mapped to a tailnet identity.
    #[error("{0}")]
    Unresolved(String),
    #[error("{0}")]
    BadRequest(String),
    /// At least one provider could not be reached during fan-out.
    #[error("{0}")]
    Transport(String),
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unresolved(_) | ApiError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

pub fn app<R, A, F>(state: state::AppState<R, A, F>) -> Router
where
    R: IdentityResolver,
    A: PushSender<Request = ApnsRequest>,
    F: PushSender<Request = FcmRequest>,
{
    Router::new()
        .route("/register", post(register::register_apns::<R, A, F>))
        .route("/registerFCM", post(register::register_fcm::<R, A, F>))
        .route(
            "/send",
            get(send::send_simple::<R, A, F>).post(send::send_form::<R, A, F>),
        )
        .route("/sendJSON", post(send::send_json::<R, A, F>))
        .route("/health", get(health))
        .with_state(state)
}

pub(crate) async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
#[allow(non_snake_case)]
pub(crate) mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::dispatch::Dispatcher;
    use crate::dispatch::tests::{FakeReply, FakeSender};
    use crate::ports::{Caller, ResolveError};
    use crate::registry::DeviceRegistry;
    use axum::body::Body;
    use axum::body::to_bytes;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use axum::http::header::CONTENT_TYPE;
    use std::future::Future;
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::sync::Arc;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct FakeResolver {
        caller: Option<Caller>,
    }

    impl IdentityResolver for FakeResolver {
        type Fut<'a>
            = Pin<Box<dyn Future<Output = Result<Caller, ResolveError>> + Send + 'a>>
        where
            Self: 'a;

        fn whois<'a>(&'a self, addr: SocketAddr) -> Self::Fut<'a> {
            let caller = self.caller.clone();
            Box::pin(async move {
                caller.ok_or(ResolveError::Unknown {
                    addr,
                    reason: "peer not found".to_string(),
                })
            })
        }
    }

    struct TestApp {
        router: Router,
        registry: Arc<DeviceRegistry>,
        apns: FakeSender<ApnsRequest>,
        fcm: FakeSender<FcmRequest>,
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([100, 64, 0, 2], 51234))
    }

    fn phone() -> Caller {
        Caller {
            user: "u1".into(),
            user_name: "alice@example.com".to_string(),
            device: "D1".into(),
            device_name: "phone".to_string(),
        }
    }

    fn test_app(caller: Option<Caller>) -> TestApp {
        test_app_with(caller, FakeSender::new(), FakeSender::new())
    }

    fn test_app_with(
        caller: Option<Caller>,
        apns: FakeSender<ApnsRequest>,
        fcm: FakeSender<FcmRequest>,
    ) -> TestApp {
        let registry = Arc::new(DeviceRegistry::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            apns.clone(),
            fcm.clone(),
            DispatchConfig::default(),
        );
        let state = state::AppState {
            registry: Arc::clone(&registry),
            resolver: FakeResolver { caller },
            dispatcher,
        };
        TestApp {
            router: app(state).layer(MockConnectInfo(peer())),
            registry,
            apns,
            fcm,
        }
    }

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, String::from_utf8_lossy(&body).to_string())
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn post_form(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/send")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn app__should_return_ok_on_health_endpoint() {
        // Given
        let test = test_app(None);

        // When
        let (status, body) = call(&test.router, get("/health")).await;

        // Then
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn register__should_fan_out_to_both_providers_for_one_device() {
        // Given
        let test = test_app(Some(phone()));

        // When
        let (apns_status, _) = call(&test.router, post("/register", "tok-apns-1")).await;
        let (fcm_status, _) = call(&test.router, post("/registerFCM", "tok-fcm-1\n")).await;
        let (send_status, body) =
            call(&test.router, post("/sendJSON", r#"{"title":"Hi"}"#)).await;

        // Then
        assert_eq!(apns_status, StatusCode::OK);
        assert_eq!(fcm_status, StatusCode::OK);
        assert_eq!(send_status, StatusCode::OK);
        assert!(body.is_empty());
        let apns_sent = test.apns.sent();
        let fcm_sent = test.fcm.sent();
        assert_eq!(apns_sent.len(), 1);
        assert_eq!(apns_sent[0].device_token, "tok-apns-1");
        assert_eq!(apns_sent[0].title, "Hi");
        assert_eq!(fcm_sent.len(), 1);
        assert_eq!(fcm_sent[0].token, "tok-fcm-1");
        let devices = test.registry.devices_for(&"u1".into());
        assert_eq!(devices.apns[0].device.0, "D1");
        assert_eq!(devices.fcm[0].device.0, "D1");
    }

    #[tokio::test]
    async fn register__should_reject_other_methods() {
        // Given
        let test = test_app(Some(phone()));

        // When
        let (register, _) = call(&test.router, get("/register")).await;
        let (register_fcm, _) = call(&test.router, get("/registerFCM")).await;
        let (send_json, _) = call(&test.router, get("/sendJSON")).await;
        let (send, _) = call(
            &test.router,
            Request::builder()
                .method("PUT")
                .uri("/send")
                .body(Body::empty())
                .expect("request"),
        )
        .await;

        // Then
        assert_eq!(register, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(register_fcm, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(send_json, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(send, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn app__should_fail_every_caller_route_when_caller_is_unresolved() {
        // Given
        let test = test_app(None);
        let requests = [
            post("/register", "tok"),
            post("/registerFCM", "tok"),
            get("/send"),
            post_form("title=Hi"),
            post("/sendJSON", r#"{"title":"Hi"}"#),
        ];

        for request in requests {
            let uri = request.uri().to_string();

            // When
            let (status, body) = call(&test.router, request).await;

            // Then
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
            assert_eq!(body, "no identity for 100.64.0.2:51234: peer not found", "{uri}");
        }
        assert_eq!(test.registry.user_count(), 0);
        assert!(test.apns.sent().is_empty());
        assert!(test.fcm.sent().is_empty());
    }

    #[tokio::test]
    async fn send__should_name_triggering_device_on_get() {
        // Given
        let test = test_app(Some(phone()));
        call(&test.router, post("/register", "tok-apns-1")).await;

        // When
        let (status, _) = call(&test.router, get("/send")).await;

        // Then
        assert_eq!(status, StatusCode::OK);
        let sent = test.apns.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "Notification triggered by phone");
        assert!(sent[0].title.is_empty());
    }

    #[tokio::test]
    async fn send__should_pass_form_fields_through() {
        // Given
        let test = test_app(Some(phone()));
        call(&test.router, post("/register", "tok-apns-1")).await;

        // When
        let (status, _) = call(
            &test.router,
            post_form("title=Build&subtitle=main&body=passed"),
        )
        .await;

        // Then
        assert_eq!(status, StatusCode::OK);
        let sent = test.apns.sent();
        assert_eq!(sent[0].title, "Build");
        assert_eq!(sent[0].subtitle, "main");
        assert_eq!(sent[0].body, "passed");
    }

    #[tokio::test]
    async fn send__should_reject_form_without_content() {
        // Given
        let test = test_app(Some(phone()));
        call(&test.router, post("/register", "tok-apns-1")).await;

        // When
        let (status, body) = call(&test.router, post_form("subtitle=only")).await;

        // Then
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Notification must have content");
        assert!(test.apns.sent().is_empty());
    }

    #[tokio::test]
    async fn send_json__should_reject_invalid_json() {
        // Given
        let test = test_app(Some(phone()));

        // When
        let (status, _) = call(&test.router, post("/sendJSON", "{not json")).await;
        let (empty_status, empty_body) = call(&test.router, post("/sendJSON", "{}")).await;

        // Then
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(empty_status, StatusCode::BAD_REQUEST);
        assert_eq!(empty_body, "Notification must have content");
    }

    #[tokio::test]
    async fn send__should_succeed_for_user_without_devices() {
        // Given
        let test = test_app(Some(phone()));

        // When
        let (status, _) = call(&test.router, post("/sendJSON", r#"{"body":"ping"}"#)).await;

        // Then
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn send__should_report_transport_errors_but_not_rejections() {
        // Given
        let apns = FakeSender::new()
            .reply("tok-stale", FakeReply::Reject("Unregistered"))
            .reply("tok-down", FakeReply::Transport("connection refused"));
        let test = test_app_with(Some(phone()), apns, FakeSender::new());
        call(&test.router, post("/register", "tok-stale")).await;

        // When
        let (rejected_status, _) =
            call(&test.router, post("/sendJSON", r#"{"body":"ping"}"#)).await;
        call(&test.router, post("/register", "tok-down")).await;
        let (transport_status, transport_body) =
            call(&test.router, post("/sendJSON", r#"{"body":"ping"}"#)).await;

        // Then
        assert_eq!(rejected_status, StatusCode::OK);
        assert_eq!(transport_status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(transport_body, "connection refused");
    }
}
