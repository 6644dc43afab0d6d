use super::ApiError;
use crate::ports::{Caller, IdentityResolver, PushSender};
use crate::state::AppState;
use crate::types::notification::{ApnsRequest, FcmRequest};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use std::net::SocketAddr;

/// Identity always comes from the peer address, never from the request itself.
impl<R, A, F> FromRequestParts<AppState<R, A, F>> for Caller
where
    R: IdentityResolver,
    A: PushSender<Request = ApnsRequest>,
    F: PushSender<Request = FcmRequest>,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState<R, A, F>,
    ) -> Result<Self, Self::Rejection> {
        let ConnectInfo(addr) = ConnectInfo::<SocketAddr>::from_request_parts(parts, state)
            .await
            .map_err(|err| ApiError::Unresolved(err.to_string()))?;
        state.resolver.whois(addr).await.map_err(|err| {
            tracing::warn!(%addr, error = %err, "rejecting unresolved caller");
            ApiError::Unresolved(err.to_string())
        })
    }
}
