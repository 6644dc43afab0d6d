use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApnsEnvironment {
    #[default]
    Production,
    Development,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnsConfig {
    pub key_path: PathBuf,
    pub key_id: String,
    pub team_id: String,
    pub bundle_id: String,
    pub environment: ApnsEnvironment,
}

/// What the dispatcher does after a device fails at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Attempt every device and report each outcome.
    #[default]
    Continue,
    /// Stop the fan-out at the first transport error.
    AbortOnTransportError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub provider_timeout: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(10),
            failure_policy: FailurePolicy::Continue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub hostname: String,
    pub listen: String,
    pub tailscaled_socket: PathBuf,
    /// Upper bound on one tailscaled `whois` round trip.
    pub whois_timeout: Duration,
    pub apns: ApnsConfig,
    pub fcm_credentials: PathBuf,
    pub snapshot_path: PathBuf,
    pub snapshot_interval: Option<Duration>,
    pub dispatch: DispatchConfig,
    /// How long in-flight requests may run after a shutdown signal before the
    /// final snapshot is written regardless.
    pub shutdown_grace: Duration,
}

#[cfg(test)]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            hostname: "tailpush".to_string(),
            listen: "tailpush:80".to_string(),
            tailscaled_socket: "/var/run/tailscale/tailscaled.sock".into(),
            whois_timeout: Duration::from_secs(5),
            apns: ApnsConfig {
                key_path: "AuthKey.p8".into(),
                key_id: "KEYID".to_string(),
                team_id: "TEAMID".to_string(),
                bundle_id: "com.example.app".to_string(),
                environment: ApnsEnvironment::Production,
            },
            fcm_credentials: "service-account.json".into(),
            snapshot_path: "devices.json".into(),
            snapshot_interval: None,
            dispatch: DispatchConfig::default(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}
