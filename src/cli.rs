use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tailpush::config::{
    ApnsConfig, ApnsEnvironment, AppConfig, DispatchConfig, FailurePolicy,
};

const DEFAULT_TAILSCALED_SOCKET: &str = "/var/run/tailscale/tailscaled.sock";
const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WHOIS_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub(crate) enum RunOutcome {
    Serve(AppConfig),
    Exit(u8),
}

pub(crate) fn run() -> RunOutcome {
    let cli = Cli::parse();
    match resolve_config(&cli) {
        Ok(config) => RunOutcome::Serve(config),
        Err(err) => {
            eprintln!("error: {err}");
            RunOutcome::Exit(2)
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "tailpush",
    version,
    about = "Push notifications to every device of a tailnet user"
)]
struct Cli {
    /// Hostname of this node on the tailnet.
    #[arg(long, env = "TAILPUSH_HOSTNAME", default_value = "tailpush")]
    hostname: String,
    /// Address to listen on; defaults to port 80 on the tailnet hostname.
    #[arg(long, env = "TAILPUSH_LISTEN")]
    listen: Option<String>,
    #[arg(long, env = "TAILPUSH_TAILSCALED_SOCKET", default_value = DEFAULT_TAILSCALED_SOCKET)]
    tailscaled_socket: PathBuf,
    /// Give up on a tailscaled identity lookup after this long, e.g. 5s.
    #[arg(long, env = "TAILPUSH_WHOIS_TIMEOUT")]
    whois_timeout: Option<String>,
    /// Path to the APNs token signing key (.p8).
    #[arg(long, env = "TAILPUSH_APNS_KEY_PATH")]
    apns_key: Option<PathBuf>,
    #[arg(long, env = "TAILPUSH_APNS_KEY_ID")]
    key_id: Option<String>,
    #[arg(long, env = "TAILPUSH_APNS_TEAM_ID")]
    team_id: Option<String>,
    /// Bundle ID of the app receiving notifications.
    #[arg(long, env = "TAILPUSH_APP_BUNDLE_ID")]
    bundle_id: Option<String>,
    /// Send APNs notifications to the development environment.
    #[arg(long, env = "TAILPUSH_APNS_DEVELOPMENT")]
    development: bool,
    /// Firebase service account key file.
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    fcm_credentials: Option<PathBuf>,
    #[arg(long, env = "TAILPUSH_SNAPSHOT_PATH", default_value = "devices.json")]
    snapshot_path: PathBuf,
    /// Also save the registry on this interval, e.g. 5m.
    #[arg(long, env = "TAILPUSH_SNAPSHOT_INTERVAL")]
    snapshot_interval: Option<String>,
    #[arg(long, env = "TAILPUSH_PROVIDER_TIMEOUT")]
    provider_timeout: Option<String>,
    /// Stop sending to a user's remaining devices after a transport error.
    #[arg(long, env = "TAILPUSH_ABORT_ON_TRANSPORT_ERROR")]
    abort_on_transport_error: bool,
    /// How long in-flight requests may run after a shutdown signal.
    #[arg(long, env = "TAILPUSH_SHUTDOWN_GRACE")]
    shutdown_grace: Option<String>,
}

fn resolve_config(cli: &Cli) -> Result<AppConfig, String> {
    let hostname = cli.hostname.trim();
    if hostname.is_empty() {
        return Err("hostname cannot be empty".to_string());
    }

    let apns = ApnsConfig {
        key_path: required_path(
            cli.apns_key.as_ref(),
            "must provide a path to the APNs key file (--apns-key or TAILPUSH_APNS_KEY_PATH)",
        )?,
        key_id: required(
            cli.key_id.as_deref(),
            "must provide the ID of the APNs key (--key-id or TAILPUSH_APNS_KEY_ID)",
        )?,
        team_id: required(
            cli.team_id.as_deref(),
            "must provide the ID of the team signing the app (--team-id or TAILPUSH_APNS_TEAM_ID)",
        )?,
        bundle_id: required(
            cli.bundle_id.as_deref(),
            "must provide the bundle ID of the app receiving notifications (--bundle-id or TAILPUSH_APP_BUNDLE_ID)",
        )?,
        environment: if cli.development {
            ApnsEnvironment::Development
        } else {
            ApnsEnvironment::Production
        },
    };
    let fcm_credentials = required_path(
        cli.fcm_credentials.as_ref(),
        "must provide the Firebase service account file (--fcm-credentials or GOOGLE_APPLICATION_CREDENTIALS)",
    )?;

    let listen = match cli.listen.as_deref().map(str::trim) {
        Some("") => return Err("listen address cannot be empty".to_string()),
        Some(listen) => listen.to_string(),
        None => format!("{hostname}:80"),
    };
    let snapshot_interval = cli
        .snapshot_interval
        .as_deref()
        .map(|raw| parse_duration(raw, "snapshot interval"))
        .transpose()?;
    let provider_timeout =
        optional_duration(cli.provider_timeout.as_deref(), "provider timeout", DEFAULT_PROVIDER_TIMEOUT)?;
    let whois_timeout =
        optional_duration(cli.whois_timeout.as_deref(), "whois timeout", DEFAULT_WHOIS_TIMEOUT)?;
    let shutdown_grace =
        optional_duration(cli.shutdown_grace.as_deref(), "shutdown grace", DEFAULT_SHUTDOWN_GRACE)?;

    Ok(AppConfig {
        hostname: hostname.to_string(),
        listen,
        tailscaled_socket: cli.tailscaled_socket.clone(),
        whois_timeout,
        apns,
        fcm_credentials,
        snapshot_path: cli.snapshot_path.clone(),
        snapshot_interval,
        dispatch: DispatchConfig {
            provider_timeout,
            failure_policy: if cli.abort_on_transport_error {
                FailurePolicy::AbortOnTransportError
            } else {
                FailurePolicy::Continue
            },
        },
        shutdown_grace,
    })
}

fn required(value: Option<&str>, message: &str) -> Result<String, String> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(message.to_string()),
    }
}

fn required_path(value: Option<&PathBuf>, message: &str) -> Result<PathBuf, String> {
    match value {
        Some(path) if !path.as_os_str().is_empty() => Ok(path.clone()),
        _ => Err(message.to_string()),
    }
}

fn optional_duration(raw: Option<&str>, what: &str, default: Duration) -> Result<Duration, String> {
    match raw {
        Some(raw) => parse_duration(raw, what),
        None => Ok(default),
    }
}

fn parse_duration(raw: &str, what: &str) -> Result<Duration, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(format!("{what} cannot be empty"));
    }

    let (amount, unit) = match value.chars().last() {
        Some(ch) if ch.is_ascii_alphabetic() => {
            (&value[..value.len() - 1], ch.to_ascii_lowercase())
        }
        _ => (value, 's'),
    };

    let amount: u64 = amount
        .parse()
        .map_err(|_| format!("invalid {what} '{value}'; expected <number>[s|m|h]"))?;

    if amount == 0 {
        return Err(format!("{what} must be greater than 0"));
    }

    let multiplier: u64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        _ => {
            return Err(format!(
                "invalid {what} '{value}'; expected <number>[s|m|h]"
            ));
        }
    };
    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("invalid {what} '{value}'; expected <number>[s|m|h]"))
}
