use super::read_body;
use crate::ports::{Caller, IdentityResolver, ResolveError};
use crate::types::devices::{DeviceId, UserId};

use http_body_util::Empty;
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;

const LOCAL_API_HOST: &str = "local-tailscaled.sock";

/// Resolves tailnet peers through the local tailscaled LocalAPI.
#[derive(Debug, Clone)]
pub struct TailscaleResolver {
    socket: Arc<PathBuf>,
    timeout: Duration,
}

impl TailscaleResolver {
    pub fn new(socket: &Path, timeout: Duration) -> Self {
        Self {
            socket: Arc::new(socket.to_path_buf()),
            timeout,
        }
    }

    /// Covers connect, handshake, request and body read as one deadline.
    async fn lookup_with_deadline(&self, addr: SocketAddr) -> Result<Caller, ResolveError> {
        match tokio::time::timeout(self.timeout, self.lookup(addr)).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Unavailable(format!(
                "tailscaled did not answer within {}s",
                self.timeout.as_secs_f32()
            ))),
        }
    }

    async fn lookup(&self, addr: SocketAddr) -> Result<Caller, ResolveError> {
        let stream = UnixStream::connect(self.socket.as_path())
            .await
            .map_err(|err| {
                ResolveError::Unavailable(format!("{}: {err}", self.socket.display()))
            })?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|err| ResolveError::Unavailable(err.to_string()))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::debug!(error = %err, "tailscaled connection closed");
            }
        });

        let request = hyper::Request::builder()
            .uri(whois_path(addr))
            .header(hyper::header::HOST, LOCAL_API_HOST)
            .body(Empty::<Bytes>::new())
            .map_err(|err| ResolveError::Unavailable(err.to_string()))?;
        let response = sender
            .send_request(request)
            .await
            .map_err(|err| ResolveError::Unavailable(err.to_string()))?;
        let status = response.status();
        let body = read_body(response.into_body()).await;
        if !status.is_success() {
            return Err(ResolveError::Unknown {
                addr,
                reason: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }
        caller_from_whois(&body)
    }
}

impl IdentityResolver for TailscaleResolver {
    type Fut<'a>
        = Pin<Box<dyn Future<Output = Result<Caller, ResolveError>> + Send + 'a>>
    where
        Self: 'a;

    fn whois<'a>(&'a self, addr: SocketAddr) -> Self::Fut<'a> {
        Box::pin(self.lookup_with_deadline(addr))
    }
}

fn whois_path(addr: SocketAddr) -> String {
    let addr = addr.to_string().replace('[', "%5B").replace(']', "%5D");
    format!("/localapi/v0/whois?addr={addr}")
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WhoIsResponse {
    node: WhoIsNode,
    user_profile: WhoIsUser,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WhoIsNode {
    #[serde(rename = "StableID")]
    stable_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    computed_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WhoIsUser {
    #[serde(rename = "ID")]
    id: i64,
    login_name: String,
}

impl WhoIsNode {
    fn display_name(&self) -> String {
        if !self.computed_name.is_empty() {
            return self.computed_name.clone();
        }
        self.name
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

fn caller_from_whois(body: &[u8]) -> Result<Caller, ResolveError> {
    let whois: WhoIsResponse = serde_json::from_slice(body)
        .map_err(|err| ResolveError::InvalidResponse(err.to_string()))?;
    if whois.node.stable_id.is_empty() {
        return Err(ResolveError::InvalidResponse(
            "node has no stable id".to_string(),
        ));
    }
    Ok(Caller {
        user: UserId(whois.user_profile.id.to_string()),
        user_name: whois.user_profile.login_name,
        device_name: whois.node.display_name(),
        device: DeviceId(whois.node.stable_id),
    })
}
