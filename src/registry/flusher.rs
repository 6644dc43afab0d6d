use super::DeviceRegistry;
use crate::ports;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct FlusherHandle {
    handle: JoinHandle<()>,
}

impl FlusherHandle {
    /// Cancels the task and waits until it has stopped. A save already on the
    /// blocking pool still completes, but it holds the registry's save lock, so a
    /// later save always writes the newer state.
    pub async fn stop(self) {
        self.handle.abort();
        if let Err(err) = self.handle.await
            && !err.is_cancelled()
        {
            tracing::error!(error = %err, "snapshot flusher failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Saves the registry on a fixed interval, skipping rounds with no new registrations.
#[derive(Debug, Clone)]
pub struct SnapshotFlusher<T> {
    time: T,
    interval: Duration,
    path: PathBuf,
}

impl<T> SnapshotFlusher<T>
where
    T: ports::TimeProvider,
{
    pub fn new(time: T, interval: Duration, path: PathBuf) -> Self {
        Self {
            time,
            interval,
            path,
        }
    }

    pub fn spawn(self, registry: Arc<DeviceRegistry>) -> FlusherHandle {
        let handle = tokio::spawn(async move {
            self.run(registry).await;
        });
        FlusherHandle { handle }
    }

    async fn run(self, registry: Arc<DeviceRegistry>) {
        let mut saved_revision = registry.revision();
        loop {
            self.time.sleep(self.interval).await;
            let revision = registry.revision();
            if revision == saved_revision {
                continue;
            }
            let saving = Arc::clone(&registry);
            let path = self.path.clone();
            match tokio::task::spawn_blocking(move || saving.save_snapshot(&path)).await {
                Ok(Ok(())) => {
                    tracing::debug!(path = %self.path.display(), revision, "saved periodic snapshot");
                    saved_revision = revision;
                }
                Ok(Err(err)) => {
                    tracing::error!(path = %self.path.display(), error = %err, "periodic snapshot failed");
                }
                Err(err) => {
                    tracing::error!(error = %err, "periodic snapshot task failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::adapters::TokioTimeProvider;
    use crate::registry::snapshot::tests::create_temp_root;
    use crate::registry::tests::endpoint;
    use crate::types::devices::Provider;

    #[tokio::test(start_paused = true)]
    async fn snapshot_flusher__should_save_only_after_changes() {
        // Given
        let root = create_temp_root("flusher");
        let path = root.join("devices.json");
        let registry = Arc::new(DeviceRegistry::new());
        let interval = Duration::from_secs(60);
        let handle =
            SnapshotFlusher::new(TokioTimeProvider, interval, path.clone()).spawn(Arc::clone(&registry));

        // When
        tokio::time::sleep(interval + Duration::from_secs(1)).await;
        let saved_before_change = path.exists();
        registry.register(
            "u1".into(),
            "user".to_string(),
            "d1".into(),
            endpoint(Provider::Apns, "tok", "phone"),
        );
        tokio::time::sleep(interval).await;

        // Then
        assert!(!saved_before_change);
        let loaded = DeviceRegistry::load_snapshot(&path).expect("load snapshot");
        assert_eq!(loaded.device_count(), 1);
        assert!(!handle.is_finished());

        handle.stop().await;
        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[tokio::test]
    async fn flusher_handle__should_leave_final_save_with_latest_state() {
        // Given
        let root = create_temp_root("flusher-stop");
        let path = root.join("devices.json");
        let registry = Arc::new(DeviceRegistry::new());
        let handle = SnapshotFlusher::new(TokioTimeProvider, Duration::from_millis(1), path.clone())
            .spawn(Arc::clone(&registry));
        for n in 0..20 {
            registry.register(
                "u1".into(),
                "user".to_string(),
                crate::types::devices::DeviceId(format!("d{n}")),
                endpoint(Provider::Apns, "tok", "phone"),
            );
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // When
        handle.stop().await;
        registry.register(
            "u1".into(),
            "user".to_string(),
            "last".into(),
            endpoint(Provider::Fcm, "tok-last", "tablet"),
        );
        registry.save_snapshot(&path).expect("final save");
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Then
        let loaded = DeviceRegistry::load_snapshot(&path).expect("load snapshot");
        assert_eq!(loaded.device_count(), 21);
        std::fs::remove_dir_all(&root).expect("cleanup");
    }
}
