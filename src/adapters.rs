use std::time::Duration;

use crate::ports;

pub mod apns;
pub mod fcm;
pub mod tailscale;

pub use apns::{ApnsSender, ApnsSetupError};
pub use fcm::{FcmSender, FcmSetupError};
pub use tailscale::TailscaleResolver;

type HttpsClient = hyper_util::client::legacy::Client<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    http_body_util::Full<hyper::body::Bytes>,
>;

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimeProvider;

impl ports::TimeProvider for TokioTimeProvider {
    type Sleep<'a>
        = tokio::time::Sleep
    where
        Self: 'a;

    fn sleep<'a>(&'a self, duration: Duration) -> Self::Sleep<'a> {
        tokio::time::sleep(duration)
    }
}

fn https_client(http2_only: bool) -> std::io::Result<HttpsClient> {
    let builder = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()?
        .https_only();
    let connector = if http2_only {
        builder.enable_http2().build()
    } else {
        builder.enable_http1().enable_http2().build()
    };
    let mut client = hyper_util::client::legacy::Client::builder(
        hyper_util::rt::TokioExecutor::new(),
    );
    client.http2_only(http2_only);
    Ok(client.build(connector))
}

async fn read_body(body: hyper::body::Incoming) -> Vec<u8> {
    use http_body_util::BodyExt;

    match body.collect().await {
        Ok(collected) => collected.to_bytes().to_vec(),
        Err(err) => {
            tracing::debug!(error = %err, "failed to read provider response body");
            Vec::new()
        }
    }
}
