use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

/// Stable identifier of a tailnet user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Stable identifier of one node on the tailnet, unique within a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Apns,
    Fcm,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Apns => f.write_str("APNs"),
            Provider::Fcm => f.write_str("FCM"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    pub provider: Provider,
    pub token: String,
    pub display_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
}

impl DeviceEndpoint {
    /// Token prefix that is safe to put in logs.
    pub fn token_hint(&self) -> &str {
        let end = self
            .token
            .char_indices()
            .nth(8)
            .map_or(self.token.len(), |(idx, _)| idx);
        &self.token[..end]
    }
}

/// Everything registered for one user.
///
/// Records are replaced wholesale in the registry, never edited in place, so a
/// reader always sees a display name and device maps from the same write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub identity: UserId,
    pub display_name: String,
    #[serde(default)]
    pub apns: BTreeMap<DeviceId, DeviceEndpoint>,
    #[serde(default)]
    pub fcm: BTreeMap<DeviceId, DeviceEndpoint>,
}

impl UserRecord {
    pub fn new(identity: UserId, display_name: String) -> Self {
        Self {
            identity,
            display_name,
            apns: BTreeMap::new(),
            fcm: BTreeMap::new(),
        }
    }

    pub fn endpoints(&self, provider: Provider) -> &BTreeMap<DeviceId, DeviceEndpoint> {
        match provider {
            Provider::Apns => &self.apns,
            Provider::Fcm => &self.fcm,
        }
    }

    /// Returns a copy of this record with `endpoint` stored for `device`.
    pub fn with_endpoint(
        &self,
        display_name: String,
        device: DeviceId,
        endpoint: DeviceEndpoint,
    ) -> Self {
        let mut next = self.clone();
        next.display_name = display_name;
        match endpoint.provider {
            Provider::Apns => next.apns.insert(device, endpoint),
            Provider::Fcm => next.fcm.insert(device, endpoint),
        };
        next
    }

    pub fn device_count(&self) -> usize {
        self.apns.len() + self.fcm.len()
    }
}

/// A single device endpoint as handed out to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredDevice {
    pub device: DeviceId,
    pub endpoint: DeviceEndpoint,
}

/// Copy of a user's endpoints, taken under the registry lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDevices {
    pub apns: Vec<RegisteredDevice>,
    pub fcm: Vec<RegisteredDevice>,
}

impl UserDevices {
    pub fn is_empty(&self) -> bool {
        self.apns.is_empty() && self.fcm.is_empty()
    }
}
