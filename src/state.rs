use crate::dispatch::Dispatcher;
use crate::registry::DeviceRegistry;

use std::sync::Arc;

#[derive(Clone)]
pub struct AppState<R, A, F> {
    pub registry: Arc<DeviceRegistry>,
    pub resolver: R,
    pub dispatcher: Dispatcher<A, F>,
}
