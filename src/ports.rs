pub mod identity;
pub mod push;
pub mod time;

pub use identity::{Caller, IdentityResolver, ResolveError};
pub use push::{DeliveryError, PushSender};
pub use time::TimeProvider;
