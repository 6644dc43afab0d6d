use crate::types::devices::{
    DeviceEndpoint, DeviceId, Provider, RegisteredDevice, UserDevices, UserId, UserRecord,
};

mod flusher;
mod snapshot;

pub use flusher::{FlusherHandle, SnapshotFlusher};
pub use snapshot::SnapshotError;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Which devices belong to which tailnet user.
///
/// All reads and writes go through one mutex. A critical section never spans a
/// network call: dispatch copies the endpoints out with [`DeviceRegistry::devices_for`]
/// and talks to the providers after the guard is dropped.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    inner: Mutex<Inner>,
    // Held across snapshot-then-rename so an older save can never land after a newer one.
    save_lock: Mutex<()>,
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<UserId, UserRecord>,
    revision: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_records(records: impl IntoIterator<Item = UserRecord>) -> Self {
        let users = records
            .into_iter()
            .map(|record| (record.identity.clone(), record))
            .collect();
        Self {
            inner: Mutex::new(Inner { users, revision: 0 }),
            save_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section swaps whole records, so a poisoned map is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `endpoint` for `device`, replacing whatever that device had for
    /// the same provider, and refreshes the user's display name.
    pub fn register(
        &self,
        identity: UserId,
        display_name: String,
        device: DeviceId,
        endpoint: DeviceEndpoint,
    ) {
        let provider = endpoint.provider;
        let device_name = endpoint.display_name.clone();
        let mut inner = self.lock();
        let next = match inner.users.get(&identity) {
            Some(current) => current.with_endpoint(display_name, device.clone(), endpoint),
            None => UserRecord::new(identity.clone(), display_name.clone()).with_endpoint(
                display_name,
                device.clone(),
                endpoint,
            ),
        };
        inner.users.insert(identity.clone(), next);
        inner.revision += 1;
        drop(inner);

        tracing::info!(
            user = %identity,
            device = %device,
            device_name = %device_name,
            %provider,
            "registered device"
        );
    }

    /// Copies out every endpoint registered for `identity`. Unknown users have none.
    pub fn devices_for(&self, identity: &UserId) -> UserDevices {
        let inner = self.lock();
        let Some(record) = inner.users.get(identity) else {
            return UserDevices::default();
        };
        UserDevices {
            apns: collect_devices(record, Provider::Apns),
            fcm: collect_devices(record, Provider::Fcm),
        }
    }

    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    pub fn device_count(&self) -> usize {
        self.lock().users.values().map(UserRecord::device_count).sum()
    }

    /// Monotonic counter bumped by every registration.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    pub(crate) fn records(&self) -> Vec<UserRecord> {
        let mut records: Vec<UserRecord> = self.lock().users.values().cloned().collect();
        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        records
    }

    pub(crate) fn log_contents(&self) {
        for record in self.records() {
            tracing::info!(user = %record.identity, name = %record.display_name, "loaded user");
            for (device, endpoint) in record.apns.iter().chain(record.fcm.iter()) {
                tracing::debug!(
                    user = %record.identity,
                    device = %device,
                    device_name = %endpoint.display_name,
                    provider = %endpoint.provider,
                    "loaded device"
                );
            }
        }
    }
}

fn collect_devices(record: &UserRecord, provider: Provider) -> Vec<RegisteredDevice> {
    record
        .endpoints(provider)
        .iter()
        .map(|(device, endpoint)| RegisteredDevice {
            device: device.clone(),
            endpoint: endpoint.clone(),
        })
        .collect()
}
