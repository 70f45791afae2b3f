use domain::models::{RateLimitRule, RetryPolicy};
use domain::services::EngineSettings;
use serde::Deserialize;
use shared::jwt::{JwtConfig, JwtError};
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub jwt: JwtAuthConfig,
    pub invitations: InvitationsConfig,
    pub rate_limit: RateLimitConfig,
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub onboarding: OnboardingConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.to_pool_config(), f)
    }
}

impl DatabaseConfig {
    pub fn to_pool_config(&self) -> persistence::db::DatabaseConfig {
        persistence::db::DatabaseConfig {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            connect_timeout_secs: self.connect_timeout_secs,
            idle_timeout_secs: self.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` or `pretty`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Shared secret the mail provider signs delivery callbacks with.
    /// Callbacks are rejected while unset.
    #[serde(default)]
    pub delivery_callback_secret: String,

    #[serde(default)]
    pub hsts_enabled: bool,

    /// Take the client address from the last `X-Forwarded-For` hop. Enable
    /// only behind a proxy that appends the peer address to that header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("cors_origins", &self.cors_origins)
            .field("delivery_callback_secret", &"[REDACTED]")
            .field("hsts_enabled", &self.hsts_enabled)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct JwtAuthConfig {
    /// `RS256` (public/private PEM keys) or `HS256` (shared secret).
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,

    /// RSA public key in PEM format for verifying tokens.
    #[serde(default)]
    pub public_key: String,

    /// RSA private key in PEM format. Only needed to mint tokens.
    #[serde(default)]
    pub private_key: String,

    /// HS256 shared secret.
    #[serde(default)]
    pub secret: String,

    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry_secs: i64,

    /// Leeway in seconds for clock skew tolerance.
    #[serde(default = "default_jwt_leeway")]
    pub leeway_secs: u64,
}

impl std::fmt::Debug for JwtAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthConfig")
            .field("algorithm", &self.algorithm)
            .field("access_token_expiry_secs", &self.access_token_expiry_secs)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl JwtAuthConfig {
    /// Builds the token validator for the configured algorithm.
    pub fn to_jwt_config(&self) -> Result<JwtConfig, JwtError> {
        let mut jwt = match self.algorithm.to_ascii_uppercase().as_str() {
            "HS256" => JwtConfig::from_secret(&self.secret, self.leeway_secs)?,
            "RS256" => {
                let private_key = Some(self.private_key.as_str()).filter(|k| !k.is_empty());
                JwtConfig::from_rsa_pem(&self.public_key, private_key, self.leeway_secs)?
            }
            other => {
                return Err(JwtError::InvalidKey(format!(
                    "Unsupported JWT algorithm: {}",
                    other
                )))
            }
        };
        jwt.access_token_expiry_secs = self.access_token_expiry_secs;
        Ok(jwt)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvitationsConfig {
    #[serde(default = "default_expiry_days")]
    pub expiry_days: i64,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_token_attempts")]
    pub token_attempts: u32,

    /// Hours after a decline before the same tuple may be re-invited. Zero disables.
    #[serde(default)]
    pub reinvite_cooldown_hours: i64,

    /// Recipient-facing site; invitation links are `{invite_base_url}/invitations/{token}`.
    #[serde(default = "default_invite_base_url")]
    pub invite_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// `memory` (per instance) or `postgres` (shared across instances).
    #[serde(default = "default_rate_limit_backend")]
    pub backend: String,

    #[serde(default = "default_per_actor")]
    pub per_actor: u32,

    #[serde(default = "default_per_address")]
    pub per_address: u32,

    #[serde(default = "default_rate_window")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    #[serde(default = "default_retry_base")]
    pub retry_base_secs: i64,

    #[serde(default = "default_retry_cap")]
    pub retry_cap_secs: i64,

    #[serde(default = "default_retry_batch_size")]
    pub retry_batch_size: i64,
}

#[derive(Clone, Deserialize)]
pub struct MailConfig {
    /// `console` (log only) or `http` (JSON POST to `api_url`).
    #[serde(default = "default_mail_provider")]
    pub provider: String,

    #[serde(default)]
    pub api_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_template_id")]
    pub template_id: String,

    #[serde(default = "default_sender_email")]
    pub sender_email: String,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("template_id", &self.template_id)
            .field("sender_email", &self.sender_email)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            provider: default_mail_provider(),
            api_url: String::new(),
            api_key: String::new(),
            template_id: default_template_id(),
            sender_email: default_sender_email(),
            timeout_secs: default_http_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnboardingConfig {
    /// `log` or `http`.
    #[serde(default = "default_onboarding_provider")]
    pub provider: String,

    #[serde(default)]
    pub url: String,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            provider: default_onboarding_provider(),
            url: String::new(),
            timeout_secs: default_http_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_expiry_sweep_minutes")]
    pub expiry_sweep_minutes: u64,

    #[serde(default = "default_delivery_retry_secs")]
    pub delivery_retry_secs: u64,

    #[serde(default = "default_onboarding_dispatch_secs")]
    pub onboarding_dispatch_secs: u64,

    #[serde(default = "default_rate_limit_cleanup_minutes")]
    pub rate_limit_cleanup_minutes: u64,

    /// Rows handled per job run.
    #[serde(default = "default_job_batch_size")]
    pub batch_size: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expiry_sweep_minutes: default_expiry_sweep_minutes(),
            delivery_retry_secs: default_delivery_retry_secs(),
            onboarding_dispatch_secs: default_onboarding_dispatch_secs(),
            rate_limit_cleanup_minutes: default_rate_limit_cleanup_minutes(),
            batch_size: default_job_batch_size(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_body_size() -> usize {
    1_048_576
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_true() -> bool {
    true
}
fn default_jwt_algorithm() -> String {
    "RS256".to_string()
}
fn default_access_token_expiry() -> i64 {
    3600
}
fn default_jwt_leeway() -> u64 {
    shared::jwt::DEFAULT_LEEWAY_SECS
}
fn default_expiry_days() -> i64 {
    domain::models::invitation::DEFAULT_EXPIRATION_DAYS
}
fn default_max_batch_size() -> usize {
    domain::models::batch::DEFAULT_MAX_BATCH_SIZE
}
fn default_token_attempts() -> u32 {
    domain::services::token::DEFAULT_TOKEN_ATTEMPTS
}
fn default_invite_base_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_rate_limit_backend() -> String {
    "memory".to_string()
}
fn default_per_actor() -> u32 {
    domain::services::rate_limiter::DEFAULT_PER_ACTOR_PER_HOUR
}
fn default_per_address() -> u32 {
    domain::services::rate_limiter::DEFAULT_PER_ADDRESS_PER_HOUR
}
fn default_rate_window() -> u64 {
    3600
}
fn default_max_attempts() -> i32 {
    RetryPolicy::default().max_attempts
}
fn default_retry_base() -> i64 {
    RetryPolicy::default().base_secs
}
fn default_retry_cap() -> i64 {
    RetryPolicy::default().cap_secs
}
fn default_retry_batch_size() -> i64 {
    50
}
fn default_mail_provider() -> String {
    "console".to_string()
}
fn default_template_id() -> String {
    domain::services::delivery::DEFAULT_TEMPLATE_ID.to_string()
}
fn default_sender_email() -> String {
    "invitations@tutoring.example".to_string()
}
fn default_http_timeout() -> u64 {
    10
}
fn default_onboarding_provider() -> String {
    "log".to_string()
}
fn default_expiry_sweep_minutes() -> u64 {
    15
}
fn default_delivery_retry_secs() -> u64 {
    60
}
fn default_onboarding_dispatch_secs() -> u64 {
    30
}
fn default_rate_limit_cleanup_minutes() -> u64 {
    60
}
fn default_job_batch_size() -> i64 {
    100
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with SI__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("SI")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("security.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for tests from embedded defaults plus overrides,
    /// without touching the filesystem.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "127.0.0.1"
            port = 8080
            request_timeout_secs = 30
            max_body_size = 1048576

            [database]
            url = ""

            [logging]
            level = "info"
            format = "json"

            [security]
            cors_origins = []
            delivery_callback_secret = "test-callback-secret"

            [jwt]
            algorithm = "HS256"
            secret = "test-secret-at-least-16-bytes"
            leeway_secs = 0

            [invitations]
            expiry_days = 7
            max_batch_size = 100
            token_attempts = 3
            reinvite_cooldown_hours = 0
            invite_base_url = "https://tutors.example"

            [rate_limit]
            backend = "memory"
            per_actor = 100
            per_address = 200
            window_secs = 3600

            [delivery]
            max_attempts = 5
            retry_base_secs = 60
            retry_cap_secs = 3600
            retry_batch_size = 50

            [mail]
            provider = "console"

            [onboarding]
            provider = "log"

            [jobs]
            enabled = false
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        // Validation is skipped so tests can build partial configs.
        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "SI__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        let inv = &self.invitations;
        if !(domain::models::invitation::MIN_EXPIRATION_DAYS
            ..=domain::models::invitation::MAX_EXPIRATION_DAYS)
            .contains(&inv.expiry_days)
        {
            return Err(ConfigValidationError::InvalidValue(
                "invitations.expiry_days must be between 1 and 30".to_string(),
            ));
        }
        if inv.max_batch_size == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "invitations.max_batch_size must be positive".to_string(),
            ));
        }
        if inv.token_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "invitations.token_attempts must be positive".to_string(),
            ));
        }
        if inv.reinvite_cooldown_hours < 0 {
            return Err(ConfigValidationError::InvalidValue(
                "invitations.reinvite_cooldown_hours cannot be negative".to_string(),
            ));
        }

        if !matches!(self.rate_limit.backend.as_str(), "memory" | "postgres") {
            return Err(ConfigValidationError::InvalidValue(format!(
                "rate_limit.backend must be memory or postgres, got {}",
                self.rate_limit.backend
            )));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "rate_limit.window_secs must be positive".to_string(),
            ));
        }

        let delivery = &self.delivery;
        if delivery.max_attempts < 1 || delivery.retry_base_secs < 1 {
            return Err(ConfigValidationError::InvalidValue(
                "delivery.max_attempts and delivery.retry_base_secs must be positive".to_string(),
            ));
        }
        if delivery.retry_cap_secs < delivery.retry_base_secs {
            return Err(ConfigValidationError::InvalidValue(
                "delivery.retry_cap_secs cannot be below delivery.retry_base_secs".to_string(),
            ));
        }

        match self.mail.provider.as_str() {
            "console" => {}
            "http" if !self.mail.api_url.is_empty() => {}
            "http" => {
                return Err(ConfigValidationError::MissingRequired(
                    "mail.api_url is required for the http mail provider".to_string(),
                ))
            }
            other => {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "mail.provider must be console or http, got {}",
                    other
                )))
            }
        }

        match self.onboarding.provider.as_str() {
            "log" => {}
            "http" if !self.onboarding.url.is_empty() => {}
            "http" => {
                return Err(ConfigValidationError::MissingRequired(
                    "onboarding.url is required for the http onboarding provider".to_string(),
                ))
            }
            other => {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "onboarding.provider must be log or http, got {}",
                    other
                )))
            }
        }

        self.jwt
            .to_jwt_config()
            .map_err(|e| ConfigValidationError::InvalidValue(format!("jwt: {}", e)))?;

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }

    /// Engine tunables derived from the invitation, rate limit, delivery, and mail sections.
    pub fn engine_settings(&self) -> EngineSettings {
        let window_secs = self.rate_limit.window_secs;
        EngineSettings {
            expiry_days: self.invitations.expiry_days,
            max_batch_size: self.invitations.max_batch_size,
            token_attempts: self.invitations.token_attempts,
            reinvite_cooldown_hours: self.invitations.reinvite_cooldown_hours,
            per_actor: RateLimitRule {
                ceiling: self.rate_limit.per_actor,
                window_secs,
            },
            per_address: RateLimitRule {
                ceiling: self.rate_limit.per_address,
                window_secs,
            },
            retry_policy: RetryPolicy {
                max_attempts: self.delivery.max_attempts,
                base_secs: self.delivery.retry_base_secs,
                cap_secs: self.delivery.retry_cap_secs,
            },
            invite_base_url: self.invitations.invite_base_url.clone(),
            mail_template_id: self.mail.template_id.clone(),
        }
    }
}
