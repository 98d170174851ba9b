use serde::{Deserialize, Serialize};

/// Root configuration — maps to `agency.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgencyConfig {
    pub agency: AgencySection,
    pub directory: DirectoryConfig,
    pub logger: LoggerServiceConfig,
    pub df: DfConfig,
    pub server: ServerConfig,
    pub routing: RoutingConfig,
    pub logging: LoggingConfig,
}

// ── Agency ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgencySection {
    /// Host name override; the OS host name is used when unset.
    pub hostname: Option<String>,
    /// MAS id override (otherwise parsed from the host name).
    pub mas_id: Option<i32>,
    /// Image group id override.
    pub instance_id: Option<i32>,
    /// Agency id override.
    pub agency_id: Option<i32>,
    /// Pause between starting the roster and opening the control API.
    pub startup_delay_ms: u64,
    /// Behaviour used for agents whose descriptor names no known type.
    pub default_behavior: String,
    /// Where agents execute: "process" (one child process each) or
    /// "thread" (one OS thread each, inside the agency process).
    pub isolation: String,
}

impl Default for AgencySection {
    fn default() -> Self {
        Self {
            hostname: None,
            mas_id: None,
            instance_id: None,
            agency_id: None,
            startup_delay_ms: 0,
            default_behavior: String::new(),
            isolation: "process".into(),
        }
    }
}

// ── Directory ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Base URL of the directory (agent management) service.
    pub url: String,
    /// Timeout for a single lookup.
    pub timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: "http://ams:9000".into(),
            timeout_secs: 5,
        }
    }
}

// ── Platform logger ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerServiceConfig {
    /// Base URL of the central logger.
    pub url: String,
    /// Forward records to the logger (`true`) or print them locally (`false`).
    pub enabled: bool,
    /// Capacity of the log and time-series queues.
    pub queue_capacity: usize,
    /// Interval between time-series flushes.
    pub timeseries_flush_secs: u64,
}

impl Default for LoggerServiceConfig {
    fn default() -> Self {
        Self {
            url: "http://logger:11000".into(),
            enabled: false,
            queue_capacity: 1000,
            timeseries_flush_secs: 5,
        }
    }
}

// ── Service registry ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DfConfig {
    /// Base URL of the service registry (DF).
    pub url: String,
    /// Use the remote registry (`true`) or an in-process one (`false`).
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for DfConfig {
    fn default() -> Self {
        Self {
            url: "http://df:12000".into(),
            enabled: false,
            timeout_secs: 5,
        }
    }
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Control API listen address.
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:10000".into(),
        }
    }
}

// ── Routing ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Capacity of each agent's inbound channel.
    pub inbox_capacity: usize,
    /// Capacity of the global outbound queue.
    pub outbound_capacity: usize,
    /// Capacity of each remote agency's delivery queue.
    pub remote_queue_capacity: usize,
    /// Port the peer agencies serve their control API on.
    pub remote_port: u16,
    /// Timeout for a single remote POST.
    pub delivery_timeout_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 100,
            outbound_capacity: 1000,
            remote_queue_capacity: 1000,
            remote_port: 10000,
            delivery_timeout_secs: 10,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "error".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{}: {}: {}", tag, self.field, self.message)
    }
}

impl AgencyConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();
        let mut error = |field: &str, message: String| {
            warnings.push(ConfigWarning {
                field: field.into(),
                message,
                severity: WarningSeverity::Error,
            });
        };

        // ── Capacities ───
        let capacities = [
            ("routing.inbox_capacity", self.routing.inbox_capacity),
            ("routing.outbound_capacity", self.routing.outbound_capacity),
            ("routing.remote_queue_capacity", self.routing.remote_queue_capacity),
            ("logger.queue_capacity", self.logger.queue_capacity),
        ];
        for (field, value) in capacities {
            if value == 0 {
                error(field, "capacity must be at least 1".into());
            }
        }
        if self.routing.remote_port == 0 {
            error("routing.remote_port", "port must not be 0".into());
        }

        // ── Listen address ───
        if self.server.listen.is_empty() {
            error("server.listen", "listen address is empty".into());
        }

        // ── Service URLs ───
        for (field, url) in [
            ("directory.url", &self.directory.url),
            ("logger.url", &self.logger.url),
            ("df.url", &self.df.url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                error(field, format!("'{url}' is not an http(s) URL"));
            }
        }

        if !["process", "thread"].contains(&self.agency.isolation.as_str()) {
            error(
                "agency.isolation",
                format!("'{}' is neither 'process' nor 'thread'", self.agency.isolation),
            );
        }

        // ── Logging ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
            });
        }
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
