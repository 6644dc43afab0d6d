use super::{HttpsClient, https_client, read_body};
use crate::config::{ApnsConfig, ApnsEnvironment};
use crate::ports::{DeliveryError, PushSender};
use crate::types::notification::{ApnsRequest, InterruptionLevel};

use http_body_util::Full;
use hyper::body::Bytes;
use jwt_simple::prelude::{Claims, Duration as JwtDuration, ECDSAP256KeyPairLike, ES256KeyPair};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

const PRODUCTION_URL: &str = "https://api.push.apple.com";
const DEVELOPMENT_URL: &str = "https://api.sandbox.push.apple.com";
// APNs refuses provider tokens older than an hour and throttles frequent refreshes.
const TOKEN_REFRESH: Duration = Duration::from_secs(50 * 60);

#[derive(Debug, Error)]
pub enum ApnsSetupError {
    #[error("failed to read APNs key {path}: {source}")]
    ReadKey {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid APNs key: {0}")]
    InvalidKey(String),
    #[error("failed to load TLS roots: {0}")]
    Tls(std::io::Error),
}

#[derive(Clone)]
pub struct ApnsSender {
    inner: Arc<Inner>,
}

struct Inner {
    client: HttpsClient,
    key: ES256KeyPair,
    team_id: String,
    topic: String,
    base_url: &'static str,
    token: Mutex<Option<ProviderToken>>,
}

struct ProviderToken {
    value: String,
    minted_at: Instant,
}

impl ApnsSender {
    pub fn new(config: &ApnsConfig) -> Result<Self, ApnsSetupError> {
        let pem = std::fs::read_to_string(&config.key_path).map_err(|source| {
            ApnsSetupError::ReadKey {
                path: config.key_path.clone(),
                source,
            }
        })?;
        let key = ES256KeyPair::from_pem(&pem)
            .map_err(|err| ApnsSetupError::InvalidKey(err.to_string()))?
            .with_key_id(&config.key_id);
        let client = https_client(true).map_err(ApnsSetupError::Tls)?;
        let base_url = match config.environment {
            ApnsEnvironment::Production => PRODUCTION_URL,
            ApnsEnvironment::Development => DEVELOPMENT_URL,
        };
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                key,
                team_id: config.team_id.clone(),
                topic: config.bundle_id.clone(),
                base_url,
                token: Mutex::new(None),
            }),
        })
    }

    fn provider_token(&self) -> Result<String, DeliveryError> {
        let mut cached = self
            .inner
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cached.as_ref()
            && token.minted_at.elapsed() < TOKEN_REFRESH
        {
            return Ok(token.value.clone());
        }
        let claims = Claims::create(JwtDuration::from_hours(1)).with_issuer(&self.inner.team_id);
        let value = self
            .inner
            .key
            .sign(claims)
            .map_err(|err| DeliveryError::Transport(format!("failed to sign APNs token: {err}")))?;
        *cached = Some(ProviderToken {
            value: value.clone(),
            minted_at: Instant::now(),
        });
        Ok(value)
    }

    fn forget_provider_token(&self) {
        *self
            .inner
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    async fn push(&self, request: &ApnsRequest) -> Result<(), DeliveryError> {
        let uri = device_uri(self.inner.base_url, &request.device_token)?;
        let token = self.provider_token()?;
        let body = serde_json::to_vec(&ApnsPayload::from(request))
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;
        let http_request = hyper::Request::builder()
            .method(hyper::Method::POST)
            .uri(uri)
            .header("authorization", format!("bearer {token}"))
            .header("apns-topic", &self.inner.topic)
            .header("apns-push-type", "alert")
            .header("apns-priority", "10")
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|err| DeliveryError::Transport(format!("invalid APNs request: {err}")))?;

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
        let body = read_body(response.into_body()).await;
        let reason = rejection_reason(status, &body);
        if reason == "ExpiredProviderToken" {
            self.forget_provider_token();
        }
        Err(DeliveryError::Rejected(reason))
    }
}

impl PushSender for ApnsSender {
    type Request = ApnsRequest;
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + 'a>>
    where
        Self: 'a;

    fn send<'a>(&'a self, request: &'a ApnsRequest) -> Self::Fut<'a> {
        Box::pin(self.push(request))
    }
}

#[derive(Serialize)]
struct ApnsPayload<'a> {
    aps: Aps<'a>,
}

#[derive(Serialize)]
struct Aps<'a> {
    alert: Alert<'a>,
    sound: &'a str,
    #[serde(rename = "interruption-level")]
    interruption_level: InterruptionLevel,
}

#[derive(Serialize)]
struct Alert<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtitle: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
}

impl<'a> From<&'a ApnsRequest> for ApnsPayload<'a> {
    fn from(request: &'a ApnsRequest) -> Self {
        Self {
            aps: Aps {
                alert: Alert {
                    title: non_empty(&request.title),
                    subtitle: non_empty(&request.subtitle),
                    body: non_empty(&request.body),
                },
                sound: request.sound,
                interruption_level: request.interruption_level,
            },
        }
    }
}

/// APNs device tokens are hex; anything else would change the request path.
fn device_uri(base_url: &str, device_token: &str) -> Result<String, DeliveryError> {
    if device_token.is_empty() || !device_token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DeliveryError::Rejected("BadDeviceToken".to_string()));
    }
    Ok(format!("{base_url}/3/device/{device_token}"))
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

#[derive(Deserialize)]
struct ErrorBody {
    reason: String,
}

fn rejection_reason(status: hyper::StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .map(|error| error.reason)
        .unwrap_or_else(|_| status.to_string())
}
