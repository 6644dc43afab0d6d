use super::ApiError;
use crate::ports::{Caller, IdentityResolver, PushSender};
use crate::state::AppState;
use crate::types::notification::{ApnsRequest, FcmRequest, NotificationContent};

use axum::body::Bytes;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct SendRequest {
    pub(crate) title: String,
    pub(crate) subtitle: String,
    pub(crate) body: String,
}

impl SendRequest {
    fn into_content(self) -> Result<NotificationContent, ApiError> {
        NotificationContent::new(self.title, self.subtitle, self.body).map_err(|err| {
            tracing::info!("notification has neither title nor body");
            ApiError::from(err)
        })
    }
}

pub(crate) async fn send_simple<R, A, F>(
    State(state): State<AppState<R, A, F>>,
    caller: Caller,
) -> Result<StatusCode, ApiError>
where
    R: IdentityResolver,
    A: PushSender<Request = ApnsRequest>,
    F: PushSender<Request = FcmRequest>,
{
    tracing::info!(user = %caller.user_name, "request to send simple notification");
    let content =
        NotificationContent::body_only(format!("Notification triggered by {}", caller.device_name))?;
    send_notification(&state, &caller, &content).await
}

pub(crate) async fn send_form<R, A, F>(
    State(state): State<AppState<R, A, F>>,
    caller: Caller,
    form: Result<Form<SendRequest>, FormRejection>,
) -> Result<StatusCode, ApiError>
where
    R: IdentityResolver,
    A: PushSender<Request = ApnsRequest>,
    F: PushSender<Request = FcmRequest>,
{
    tracing::info!(user = %caller.user_name, "request to send notification with form data");
    let Form(request) = form.map_err(|err| ApiError::BadRequest(err.body_text()))?;
    let content = request.into_content()?;
    send_notification(&state, &caller, &content).await
}

pub(crate) async fn send_json<R, A, F>(
    State(state): State<AppState<R, A, F>>,
    caller: Caller,
    body: Bytes,
) -> Result<StatusCode, ApiError>
where
    R: IdentityResolver,
    A: PushSender<Request = ApnsRequest>,
    F: PushSender<Request = FcmRequest>,
{
    tracing::info!(user = %caller.user_name, "request to send notification with JSON");
    let request: SendRequest = serde_json::from_slice(&body).map_err(|err| {
        tracing::info!(error = %err, "invalid JSON");
        ApiError::BadRequest(err.to_string())
    })?;
    let content = request.into_content()?;
    send_notification(&state, &caller, &content).await
}

async fn send_notification<R, A, F>(
    state: &AppState<R, A, F>,
    caller: &Caller,
    content: &NotificationContent,
) -> Result<StatusCode, ApiError>
where
    R: IdentityResolver,
    A: PushSender<Request = ApnsRequest>,
    F: PushSender<Request = FcmRequest>,
{
    let report = state.dispatcher.dispatch(&caller.user, content).await?;
    match report.first_transport_error() {
        Some(detail) => Err(ApiError::Transport(detail.to_string())),
        None => Ok(StatusCode::OK),
    }
}
