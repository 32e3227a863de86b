//! Client configuration parsed from environment variables or built in code.
//!
//! TIMEOUT TIERS
//! =============
//! Most bridge commands answer in seconds; installs, syncs and pipeline runs
//! take minutes. Commands the classifier marks long-running wait on the long
//! tier, everything else on the short tier. An explicit per-call override
//! beats both.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3333;
pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;
pub const DEFAULT_LONG_TIMEOUT_SECS: f64 = 180.0;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: f64 = 10.0;

/// Commands routed to the long tier unless the caller configures otherwise.
pub const DEFAULT_LONG_RUNNING_COMMANDS: &[&str] = &[
    "launch_jupyter",
    "stop_jupyter",
    "reset_jupyter",
    "launch_session_jupyter",
    "stop_session_jupyter",
    "reset_session_jupyter",
    "sync_messages",
    "sync_messages_with_failures",
    "refresh_messages_batched",
    "install_dependencies",
    "install_dependency",
    "install_brew",
    "install_command_line_tools",
    "import_pipeline_with_deps",
    "run_pipeline",
    "syftbox_upload_action",
];

// =============================================================================
// TIMEOUT POLICY
// =============================================================================

#[derive(Clone)]
enum Classifier {
    Set(HashSet<String>),
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

/// Two-tier timeout policy keyed on command name.
#[derive(Clone)]
pub struct TimeoutPolicy {
    pub short: Duration,
    pub long: Duration,
    classifier: Classifier,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            short: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            long: Duration::from_secs_f64(DEFAULT_LONG_TIMEOUT_SECS),
            classifier: Classifier::Set(
                DEFAULT_LONG_RUNNING_COMMANDS
                    .iter()
                    .map(|cmd| (*cmd).to_owned())
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("TimeoutPolicy");
        s.field("short", &self.short).field("long", &self.long);
        match &self.classifier {
            Classifier::Set(commands) => s.field("long_running", commands),
            Classifier::Custom(_) => s.field("long_running", &"<custom>"),
        };
        s.finish()
    }
}

impl TimeoutPolicy {
    #[must_use]
    pub fn new(short: Duration, long: Duration) -> Self {
        Self {
            short,
            long,
            ..Self::default()
        }
    }

    /// Replace the long-running set.
    #[must_use]
    pub fn with_long_running<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classifier = Classifier::Set(commands.into_iter().map(Into::into).collect());
        self
    }

    /// Classify long-running commands with a custom predicate.
    #[must_use]
    pub fn with_classifier<F>(mut self, classify: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.classifier = Classifier::Custom(Arc::new(classify));
        self
    }

    #[must_use]
    pub fn is_long_running(&self, command: &str) -> bool {
        match &self.classifier {
            Classifier::Set(commands) => commands.contains(command),
            Classifier::Custom(classify) => classify(command),
        }
    }

    /// Effective timeout for one call.
    #[must_use]
    pub fn timeout_for(&self, command: &str, override_timeout: Option<Duration>) -> Duration {
        if let Some(timeout) = override_timeout {
            return timeout;
        }
        if self.is_long_running(command) {
            self.long
        } else {
            self.short
        }
    }
}

// =============================================================================
// CLIENT CONFIG
// =============================================================================

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket URL of the bridge.
    pub url: String,
    /// Opaque credential attached to every request as `token`.
    pub token: Option<String>,
    pub timeouts: TimeoutPolicy,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(bridge_url(DEFAULT_HOST, DEFAULT_PORT))
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            timeouts: TimeoutPolicy::default(),
            connect_timeout: Duration::from_secs_f64(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `AGENT_BRIDGE_URL`: full WebSocket URL, wins over host/port
    /// - `AGENT_BRIDGE_HOST`: default `127.0.0.1`
    /// - `AGENT_BRIDGE_PORT`: default 3333
    /// - `AGENT_BRIDGE_TOKEN`: credential; empty means none
    /// - `AGENT_BRIDGE_TIMEOUT_SECS`: short tier, default 30
    /// - `AGENT_BRIDGE_LONG_TIMEOUT_SECS`: long tier, default 180
    /// - `AGENT_BRIDGE_CONNECT_TIMEOUT_SECS`: default 10
    /// - `AGENT_BRIDGE_LONG_RUNNING`: comma-separated command names
    #[must_use]
    pub fn from_env() -> Self {
        let url = env_string("AGENT_BRIDGE_URL").unwrap_or_else(|| {
            let host = env_string("AGENT_BRIDGE_HOST").unwrap_or_else(|| DEFAULT_HOST.to_owned());
            let port = env_parse("AGENT_BRIDGE_PORT", DEFAULT_PORT);
            bridge_url(&host, port)
        });

        let mut timeouts = TimeoutPolicy::new(
            env_secs("AGENT_BRIDGE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS),
            env_secs("AGENT_BRIDGE_LONG_TIMEOUT_SECS", DEFAULT_LONG_TIMEOUT_SECS),
        );
        if let Some(raw) = env_string("AGENT_BRIDGE_LONG_RUNNING") {
            timeouts = timeouts.with_long_running(parse_command_list(&raw));
        }

        Self {
            url,
            token: env_string("AGENT_BRIDGE_TOKEN"),
            timeouts,
            connect_timeout: env_secs(
                "AGENT_BRIDGE_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            ),
        }
    }
}

#[must_use]
pub fn bridge_url(host: &str, port: u16) -> String {
    format!("ws://{host}:{port}")
}

/// Parse fractional seconds, rejecting negative, NaN and overflowing values.
#[must_use]
pub fn parse_secs(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn parse_command_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|cmd| !cmd.is_empty())
        .map(str::to_owned)
        .collect()
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default_secs: f64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_secs(&v))
        .unwrap_or_else(|| Duration::from_secs_f64(default_secs))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
