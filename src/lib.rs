//! Push notification fan-out for devices on one tailnet.
//!
//! Devices register their APNs or FCM token over the tailnet; the caller's
//! identity comes from tailscaled, never from the request. A send from any
//! device is delivered to every device registered by the same tailnet user.

pub mod adapters;
pub mod app;
pub mod config;
pub mod dispatch;
pub mod ports;
pub mod registry;
pub mod state;
pub mod types;

use adapters::{
    ApnsSender, ApnsSetupError, FcmSender, FcmSetupError, TailscaleResolver, TokioTimeProvider,
};
use dispatch::Dispatcher;
use registry::{DeviceRegistry, FlusherHandle, SnapshotFlusher};

use axum::Router;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Notify;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to create APNs client: {0}")]
    Apns(#[from] ApnsSetupError),
    #[error("failed to create FCM client: {0}")]
    Fcm(#[from] FcmSetupError),
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Runs the service until SIGINT/SIGTERM, then writes the registry snapshot.
pub async fn serve(config: config::AppConfig) -> Result<(), ServeError> {
    tracing::info!("[1/5] Creating push clients");
    let apns = ApnsSender::new(&config.apns)?;
    let fcm = FcmSender::from_credentials_file(&config.fcm_credentials)?;
    if config.apns.environment == config::ApnsEnvironment::Development {
        tracing::info!("APNs notifications go to the development environment");
    }

    tracing::info!(hostname = %config.hostname, listen = %config.listen, "[2/5] Binding tailnet listener");
    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .map_err(|source| ServeError::Bind {
            addr: config.listen.clone(),
            source,
        })?;
    let resolver = TailscaleResolver::new(&config.tailscaled_socket, config.whois_timeout);

    tracing::info!(path = %config.snapshot_path.display(), "[3/5] Loading registered devices");
    let registry = Arc::new(DeviceRegistry::load_or_empty(&config.snapshot_path));
    registry.log_contents();
    let flusher = config.snapshot_interval.map(|interval| {
        SnapshotFlusher::new(TokioTimeProvider, interval, config.snapshot_path.clone())
            .spawn(Arc::clone(&registry))
    });

    tracing::info!("[4/5] Creating routes");
    let dispatcher = Dispatcher::new(Arc::clone(&registry), apns, fcm, config.dispatch);
    let router = app::app(state::AppState {
        registry: Arc::clone(&registry),
        resolver,
        dispatcher,
    });

    tracing::info!("[5/5] Launching server");
    run_until_shutdown(
        listener,
        router,
        &registry,
        flusher,
        &config.snapshot_path,
        shutdown_signal(),
        config.shutdown_grace,
    )
    .await
}

/// Serves until `shutdown` resolves, then gives in-flight requests at most
/// `grace` to finish. The flusher is stopped and the final snapshot written
/// whether or not they did; requests still running after that are dropped.
async fn run_until_shutdown<S>(
    listener: TcpListener,
    router: Router,
    registry: &DeviceRegistry,
    flusher: Option<FlusherHandle>,
    snapshot_path: &Path,
    shutdown: S,
    grace: Duration,
) -> Result<(), ServeError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let signalled = Arc::new(Notify::new());
    let notify = Arc::clone(&signalled);
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        notify.notify_one();
    })
    .into_future();
    let drain_deadline = async {
        signalled.notified().await;
        tokio::time::sleep(grace).await;
    };

    let served = tokio::select! {
        result = server => result.map_err(ServeError::Serve),
        () = drain_deadline => {
            tracing::warn!(grace = ?grace, "requests still in flight, saving without them");
            Ok(())
        }
    };

    if let Some(flusher) = flusher {
        flusher.stop().await;
    }
    save_on_exit(registry, snapshot_path);
    served
}

fn save_on_exit(registry: &DeviceRegistry, path: &Path) {
    match registry.save_snapshot(path) {
        Ok(()) => tracing::info!(
            path = %path.display(),
            users = registry.user_count(),
            devices = registry.device_count(),
            "saved registry"
        ),
        // Nothing left to retry with; the registrations since the last save are gone.
        Err(err) => tracing::error!(path = %path.display(), error = %err, "failed to save registry"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown requested");
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::registry::tests::endpoint;
    use crate::types::devices::Provider;
    use axum::routing::get;
    use std::path::PathBuf;
    use tokio::io::AsyncWriteExt;

    fn create_temp_root(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        let root = std::env::temp_dir().join(format!("tailpush-{name}-{nanos}"));
        std::fs::create_dir_all(&root).expect("create temp dir");
        root
    }

    fn registry_with_one_device() -> Arc<DeviceRegistry> {
        let registry = Arc::new(DeviceRegistry::new());
        registry.register(
            "u1".into(),
            "alice@example.com".to_string(),
            "d1".into(),
            endpoint(Provider::Apns, "tok-apns-1", "phone"),
        );
        registry
    }

    #[tokio::test]
    async fn run_until_shutdown__should_save_even_when_a_request_hangs() {
        // Given
        let root = create_temp_root("shutdown-hang");
        let path = root.join("devices.json");
        let registry = registry_with_one_device();
        let entered = Arc::new(Notify::new());
        let router = Router::new().route(
            "/hang",
            get({
                let entered = Arc::clone(&entered);
                move || {
                    let entered = Arc::clone(&entered);
                    async move {
                        entered.notify_one();
                        std::future::pending::<&'static str>().await
                    }
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn({
            let registry = Arc::clone(&registry);
            let path = path.clone();
            async move {
                let shutdown = async move {
                    let _ = stop_rx.await;
                };
                run_until_shutdown(
                    listener,
                    router,
                    &registry,
                    None,
                    &path,
                    shutdown,
                    Duration::from_millis(200),
                )
                .await
            }
        });
        let mut client = tokio::net::TcpStream::connect(addr).await.expect("connect");
        client
            .write_all(b"GET /hang HTTP/1.1\r\nHost: tailpush\r\n\r\n")
            .await
            .expect("send request");
        entered.notified().await;

        // When
        stop_tx.send(()).expect("signal shutdown");
        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("shutdown should not wait on the hung request")
            .expect("server task");

        // Then
        assert!(result.is_ok());
        let loaded = DeviceRegistry::load_snapshot(&path).expect("load snapshot");
        assert_eq!(loaded.device_count(), 1);
        drop(client);
        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[tokio::test]
    async fn run_until_shutdown__should_stop_flusher_before_final_save() {
        // Given
        let root = create_temp_root("shutdown-flusher");
        let path = root.join("devices.json");
        let registry = registry_with_one_device();
        let flusher = SnapshotFlusher::new(TokioTimeProvider, Duration::from_millis(1), path.clone())
            .spawn(Arc::clone(&registry));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        registry.register(
            "u1".into(),
            "alice@example.com".to_string(),
            "d2".into(),
            endpoint(Provider::Fcm, "tok-fcm-2", "tablet"),
        );

        // When
        let result = run_until_shutdown(
            listener,
            Router::new(),
            &registry,
            Some(flusher),
            &path,
            async {},
            Duration::from_secs(1),
        )
        .await;

        // Then
        assert!(result.is_ok());
        let loaded = DeviceRegistry::load_snapshot(&path).expect("load snapshot");
        assert_eq!(loaded.device_count(), 2);
        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[tokio::test]
    async fn run_until_shutdown__should_exit_cleanly_when_final_save_fails() {
        // Given
        let root = create_temp_root("shutdown-unwritable");
        let path = root.join("missing-dir").join("devices.json");
        let registry = registry_with_one_device();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");

        // When
        let result = run_until_shutdown(
            listener,
            Router::new(),
            &registry,
            None,
            &path,
            async {},
            Duration::from_secs(1),
        )
        .await;

        // Then
        assert!(result.is_ok());
        assert!(!path.exists());
        std::fs::remove_dir_all(&root).expect("cleanup");
    }
}
