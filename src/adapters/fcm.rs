use super::{HttpsClient, https_client, read_body};
use crate::ports::{DeliveryError, PushSender};
use crate::types::notification::{AndroidPriority, FcmRequest};

use http_body_util::Full;
use hyper::body::Bytes;
use jwt_simple::prelude::{Claims, Duration as JwtDuration, RS256KeyPair, RSAKeyPairLike};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ACCESS_TOKEN_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum FcmSetupError {
    #[error("failed to read FCM credentials {path}: {source}")]
    ReadCredentials {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid FCM credentials: {0}")]
    InvalidCredentials(String),
    #[error("failed to load TLS roots: {0}")]
    Tls(std::io::Error),
}

/// The parts of a Google service-account key file this sender needs.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ServiceAccount {
    pub(crate) project_id: String,
    pub(crate) private_key: String,
    pub(crate) client_email: String,
    #[serde(default = "default_token_uri")]
    pub(crate) token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Clone)]
pub struct FcmSender {
    inner: Arc<Inner>,
}

struct Inner {
    client: HttpsClient,
    key: RS256KeyPair,
    account: ServiceAccount,
    send_url: String,
    access_token: tokio::sync::Mutex<Option<AccessToken>>,
}

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Serialize, Deserialize)]
struct ScopeClaim {
    scope: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

impl FcmSender {
    pub fn from_credentials_file(path: &Path) -> Result<Self, FcmSetupError> {
        let raw = std::fs::read(path).map_err(|source| FcmSetupError::ReadCredentials {
            path: path.to_path_buf(),
            source,
        })?;
        let account: ServiceAccount = serde_json::from_slice(&raw)
            .map_err(|err| FcmSetupError::InvalidCredentials(err.to_string()))?;
        Self::new(account)
    }

    pub(crate) fn new(account: ServiceAccount) -> Result<Self, FcmSetupError> {
        if account.project_id.trim().is_empty() {
            return Err(FcmSetupError::InvalidCredentials(
                "project_id is empty".to_string(),
            ));
        }
        let key = RS256KeyPair::from_pem(&account.private_key)
            .map_err(|err| FcmSetupError::InvalidCredentials(err.to_string()))?;
        let client = https_client(false).map_err(FcmSetupError::Tls)?;
        let send_url = format!(
            "https://fcm.googleapis.com/v1/projects/{}/messages:send",
            account.project_id
        );
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                key,
                account,
                send_url,
                access_token: tokio::sync::Mutex::new(None),
            }),
        })
    }

    async fn access_token(&self) -> Result<String, DeliveryError> {
        let mut cached = self.inner.access_token.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        let account = &self.inner.account;
        let claims = Claims::with_custom_claims(
            ScopeClaim {
                scope: FCM_SCOPE.to_string(),
            },
            JwtDuration::from_hours(1),
        )
        .with_issuer(&account.client_email)
        .with_audience(&account.token_uri);
        let assertion = self
            .inner
            .key
            .sign(claims)
            .map_err(|err| DeliveryError::Transport(format!("failed to sign FCM assertion: {err}")))?;
        let form = format!(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer&assertion={assertion}"
        );
        let request = hyper::Request::builder()
            .method(hyper::Method::POST)
            .uri(&account.token_uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Full::new(Bytes::from(form)))
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;
        let response = self
            .inner
            .client
            .request(request)
            .await
            .map_err(|err| DeliveryError::Transport(format!("FCM token exchange failed: {err}")))?;
        let status = response.status();
        let body = read_body(response.into_body()).await;
        if !status.is_success() {
            return Err(DeliveryError::Transport(format!(
                "FCM token exchange returned {status}"
            )));
        }
        let token: TokenResponse = serde_json::from_slice(&body).map_err(|err| {
            DeliveryError::Transport(format!("invalid FCM token response: {err}"))
        })?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(ACCESS_TOKEN_MARGIN);
        *cached = Some(AccessToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn push(&self, request: &FcmRequest) -> Result<(), DeliveryError> {
        let access_token = self.access_token().await?;
        let body = serde_json::to_vec(&SendRequest::from(request))
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;
        let http_request = hyper::Request::builder()
            .method(hyper::Method::POST)
            .uri(&self.inner.send_url)
            .header("authorization", format!("Bearer {access_token}"))
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;
        let response = self
            .inner
            .client
            .request(http_request)
            .await
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == hyper::StatusCode::UNAUTHORIZED {
            *self.inner.access_token.lock().await = None;
        }
        let body = read_body(response.into_body()).await;
        Err(DeliveryError::Rejected(rejection_reason(status, &body)))
    }
}

impl PushSender for FcmSender {
    type Request = FcmRequest;
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + 'a>>
    where
        Self: 'a;

    fn send<'a>(&'a self, request: &'a FcmRequest) -> Self::Fut<'a> {
        Box::pin(self.push(request))
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    message: Message<'a>,
}

#[derive(Serialize)]
struct Message<'a> {
    token: &'a str,
    notification: Notification<'a>,
    android: AndroidConfig,
}

#[derive(Serialize)]
struct Notification<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
}

#[derive(Serialize)]
struct AndroidConfig {
    priority: AndroidPriority,
}

impl<'a> From<&'a FcmRequest> for SendRequest<'a> {
    fn from(request: &'a FcmRequest) -> Self {
        Self {
            message: Message {
                token: &request.token,
                notification: Notification {
                    title: (!request.title.is_empty()).then_some(request.title.as_str()),
                    body: (!request.body.is_empty()).then_some(request.body.as_str()),
                },
                android: AndroidConfig {
                    priority: request.priority,
                },
            },
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
}

fn rejection_reason(status: hyper::StatusCode, body: &[u8]) -> String {
    let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) else {
        return status.to_string();
    };
    envelope
        .error
        .details
        .into_iter()
        .find_map(|detail| detail.error_code)
        .or(envelope.error.status)
        .unwrap_or_else(|| status.to_string())
}
