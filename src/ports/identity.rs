use crate::types::devices::{DeviceId, UserId};

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to reach identity service: {0}")]
    Unavailable(String),
    #[error("no identity for {addr}: {reason}")]
    Unknown { addr: SocketAddr, reason: String },
    #[error("invalid identity response: {0}")]
    InvalidResponse(String),
}

/// The verified tailnet identity behind a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user: UserId,
    pub user_name: String,
    pub device: DeviceId,
    pub device_name: String,
}

pub trait IdentityResolver: Clone + Send + Sync + 'static {
    type Fut<'a>: Future<Output = Result<Caller, ResolveError>> + Send + 'a
    where
        Self: 'a;

    fn whois<'a>(&'a self, addr: SocketAddr) -> Self::Fut<'a>;
}
