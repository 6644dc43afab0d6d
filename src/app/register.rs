use crate::ports::{Caller, IdentityResolver, PushSender};
use crate::state::AppState;
use crate::types::devices::{DeviceEndpoint, Provider};
use crate::types::notification::{ApnsRequest, FcmRequest};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use time::OffsetDateTime;

pub(crate) async fn register_apns<R, A, F>(
    State(state): State<AppState<R, A, F>>,
    caller: Caller,
    body: Bytes,
) -> StatusCode
where
    R: IdentityResolver,
    A: PushSender<Request = ApnsRequest>,
    F: PushSender<Request = FcmRequest>,
{
    register(&state, caller, Provider::Apns, &body);
    StatusCode::OK
}

pub(crate) async fn register_fcm<R, A, F>(
    State(state): State<AppState<R, A, F>>,
    caller: Caller,
    body: Bytes,
) -> StatusCode
where
    R: IdentityResolver,
    A: PushSender<Request = ApnsRequest>,
    F: PushSender<Request = FcmRequest>,
{
    register(&state, caller, Provider::Fcm, &body);
    StatusCode::OK
}

fn register<R, A, F>(state: &AppState<R, A, F>, caller: Caller, provider: Provider, body: &[u8]) {
    let token = String::from_utf8_lossy(body).trim().to_string();
    let endpoint = DeviceEndpoint {
        provider,
        token,
        display_name: caller.device_name,
        registered_at: OffsetDateTime::now_utc(),
    };
    tracing::info!(
        user = %caller.user_name,
        device = %endpoint.display_name,
        %provider,
        token = endpoint.token_hint(),
        "registering device"
    );
    state
        .registry
        .register(caller.user, caller.user_name, caller.device, endpoint);
}
