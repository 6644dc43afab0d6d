use thiserror::Error;

/// Why a single provider delivery did not go through.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The provider answered and declined this device, e.g. a stale token.
    #[error("provider rejected notification: {0}")]
    Rejected(String),
    /// The provider could not be reached or did not answer in time.
    #[error("{0}")]
    Transport(String),
}

pub trait PushSender: Clone + Send + Sync + 'static {
    type Request: Send + Sync;
    type Fut<'a>: Future<Output = Result<(), DeliveryError>> + Send + 'a
    where
        Self: 'a;

    fn send<'a>(&'a self, request: &'a Self::Request) -> Self::Fut<'a>;
}
