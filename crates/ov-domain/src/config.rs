use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tenant: TenantConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub sse: SseConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Overlay environment variables recognized by §10.4 on top of a
    /// file-loaded config. File values win only where the env var is unset.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MULTI_TENANT_SCHEMAS") {
            self.tenant.multi_tenant = parse_bool(&v).unwrap_or(self.tenant.multi_tenant);
        }
        if let Ok(v) = std::env::var("DEFAULT_SUPERVISOR_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.supervisor.default_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("WORKER_DISPATCH_TICK_MS") {
            if let Ok(n) = v.parse() {
                self.worker.dispatch_tick_ms = n;
            }
        }
        if let Ok(v) = std::env::var("WORKER_MAX_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.worker.max_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("SSE_HEARTBEAT_SECS") {
            if let Ok(n) = v.parse() {
                self.sse.heartbeat_secs = n;
            }
        }
        if let Ok(v) = std::env::var("IDEMPOTENCY_TTL_SECS") {
            if let Ok(n) = v.parse() {
                self.idempotency.ttl_secs = n;
            }
        }
        if let Ok(v) = std::env::var("IDEMPOTENCY_MAX_SIZE") {
            if let Ok(n) = v.parse() {
                self.idempotency.max_size = n;
            }
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.storage.database_url = Some(v);
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Env var holding the bearer token required on protected routes.
    /// If the env var is unset, the server runs unauthenticated (dev mode).
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            cors: CorsConfig::default(),
            rate_limit: None,
            api_token_env: d_api_token_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

fn d_port() -> u16 {
    3210
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
fn d_api_token_env() -> String {
    "OVERSEER_API_TOKEN".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tenant routing (§4.A)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    #[serde(default)]
    pub multi_tenant: bool,
    #[serde(default = "d_tenant_header")]
    pub header_name: String,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            multi_tenant: false,
            header_name: d_tenant_header(),
        }
    }
}

fn d_tenant_header() -> String {
    "X-Test-Worker".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervisor (§4.H)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "d_supervisor_timeout")]
    pub default_timeout_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: d_supervisor_timeout(),
        }
    }
}

fn d_supervisor_timeout() -> u64 {
    120
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker dispatcher (§4.E / §4.F / §10.1)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "d_dispatch_tick_ms")]
    pub dispatch_tick_ms: u64,
    #[serde(default = "d_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "d_job_timeout_secs")]
    pub job_timeout_secs: u64,
    #[serde(default = "d_claim_batch")]
    pub claim_batch: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dispatch_tick_ms: d_dispatch_tick_ms(),
            max_concurrency: d_max_concurrency(),
            job_timeout_secs: d_job_timeout_secs(),
            claim_batch: d_claim_batch(),
        }
    }
}

fn d_dispatch_tick_ms() -> u64 {
    1000
}
fn d_max_concurrency() -> usize {
    5
}
fn d_job_timeout_secs() -> u64 {
    300
}
fn d_claim_batch() -> usize {
    5
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE (§4.J)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    #[serde(default = "d_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "d_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: d_heartbeat_secs(),
            queue_capacity: d_queue_capacity(),
        }
    }
}

fn d_heartbeat_secs() -> u64 {
    30
}
fn d_queue_capacity() -> usize {
    256
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Idempotency (§4.H)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default = "d_idempotency_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "d_idempotency_max_size")]
    pub max_size: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: d_idempotency_ttl(),
            max_size: d_idempotency_max_size(),
        }
    }
}

fn d_idempotency_ttl() -> u64 {
    600
}
fn d_idempotency_max_size() -> usize {
    1000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "d_state_dir")]
    pub state_dir: String,
    /// Recognized per §6.5 but unused by the core itself (no relational
    /// driver ships in this crate's dependency stack); kept so deployments
    /// that front this service with a real database can still read it back
    /// out of the effective config.
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: d_state_dir(),
            database_url: None,
        }
    }
}

fn d_state_dir() -> String {
    "./data".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues. `serve`
    /// refuses to start if any issue has `Error` severity.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }
        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.requests_per_second".into(),
                    message: "requests_per_second must be greater than 0".into(),
                });
            }
            if rl.burst_size == 0 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.burst_size".into(),
                    message: "burst_size must be greater than 0".into(),
                });
            }
        }

        if self.tenant.multi_tenant && self.tenant.header_name.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "tenant.header_name".into(),
                message: "header_name must not be empty when multi_tenant is enabled".into(),
            });
        }

        if self.supervisor.default_timeout_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "supervisor.default_timeout_secs".into(),
                message: "default_timeout_secs must be greater than 0".into(),
            });
        }

        if self.worker.max_concurrency == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "worker.max_concurrency".into(),
                message: "max_concurrency must be greater than 0".into(),
            });
        }
        if self.worker.dispatch_tick_ms == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "worker.dispatch_tick_ms".into(),
                message: "dispatch_tick_ms must be greater than 0".into(),
            });
        }
        if self.worker.job_timeout_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "worker.job_timeout_secs".into(),
                message: "job_timeout_secs must be greater than 0".into(),
            });
        }

        if self.idempotency.max_size == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "idempotency.max_size".into(),
                message: "max_size of 0 disables the idempotency cache entirely".into(),
            });
        }

        if self.storage.state_dir.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "storage.state_dir".into(),
                message: "state_dir must not be empty".into(),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find_issue<'a>(issues: &'a [ConfigIssue], field: &str) -> Option<&'a ConfigIssue> {
        issues.iter().find(|e| e.field == field)
    }

    #[test]
    fn default_config_has_no_errors() {
        let issues = Config::default().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn zero_port_is_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "server.port").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn empty_host_is_error() {
        let mut cfg = Config::default();
        cfg.server.host = String::new();
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "server.host").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn cors_wildcard_is_warning_only() {
        let mut cfg = Config::default();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "server.cors.allowed_origins")
                .unwrap()
                .severity,
            ConfigSeverity::Warning
        );
    }

    #[test]
    fn multi_tenant_without_header_name_is_error() {
        let mut cfg = Config::default();
        cfg.tenant.multi_tenant = true;
        cfg.tenant.header_name = String::new();
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "tenant.header_name").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn single_tenant_without_header_name_is_fine() {
        let mut cfg = Config::default();
        cfg.tenant.multi_tenant = false;
        cfg.tenant.header_name = String::new();
        let issues = cfg.validate();
        assert!(find_issue(&issues, "tenant.header_name").is_none());
    }

    #[test]
    fn zero_worker_concurrency_is_error() {
        let mut cfg = Config::default();
        cfg.worker.max_concurrency = 0;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "worker.max_concurrency")
                .unwrap()
                .severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn zero_idempotency_max_size_is_warning_not_error() {
        let mut cfg = Config::default();
        cfg.idempotency.max_size = 0;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "idempotency.max_size")
                .unwrap()
                .severity,
            ConfigSeverity::Warning
        );
    }

    #[test]
    fn rate_limit_zero_values_are_errors() {
        let mut cfg = Config::default();
        cfg.server.rate_limit = Some(RateLimitConfig {
            requests_per_second: 0,
            burst_size: 0,
        });
        let issues = cfg.validate();
        assert!(find_issue(&issues, "server.rate_limit.requests_per_second").is_some());
        assert!(find_issue(&issues, "server.rate_limit.burst_size").is_some());
    }

    #[test]
    fn env_overrides_apply_over_defaults() {
        std::env::set_var("WORKER_MAX_CONCURRENCY", "9");
        std::env::set_var("MULTI_TENANT_SCHEMAS", "true");
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.worker.max_concurrency, 9);
        assert!(cfg.tenant.multi_tenant);
        std::env::remove_var("WORKER_MAX_CONCURRENCY");
        std::env::remove_var("MULTI_TENANT_SCHEMAS");
    }

    #[test]
    fn toml_round_trip_parses_sections() {
        let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8080

[worker]
max_concurrency = 10
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.worker.max_concurrency, 10);
        // Unspecified sections fall back to defaults.
        assert_eq!(cfg.supervisor.default_timeout_secs, 120);
    }

    #[test]
    fn config_issue_display_format() {
        let issue = ConfigIssue {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(
            format!("{issue}"),
            "[ERROR] server.port: port must be greater than 0"
        );
    }
}
