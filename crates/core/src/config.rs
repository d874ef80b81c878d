use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::retry::{BackoffPolicy, ExternalCallPolicy};
use crate::scheduling::PracticeClock;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub practice: PracticeConfig,
    pub session: SessionConfig,
    pub notification: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PracticeConfig {
    pub name: String,
    pub default_provider_id: String,
    pub utc_offset_minutes: i32,
    pub timezone_label: String,
    pub emergency_line: String,
    pub staff_line: String,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub max_verification_attempts: u32,
    pub tool_timeout_ms: u64,
    pub tool_retries: u32,
    pub max_tool_rounds: u32,
    pub audit_max_attempts: u32,
    pub audit_base_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub server_port: Option<u16>,
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://frontdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            practice: PracticeConfig {
                name: "Valley Family Medicine".to_string(),
                default_provider_id: "valley-family".to_string(),
                utc_offset_minutes: -300,
                timezone_label: "Eastern Time".to_string(),
                emergency_line: "911".to_string(),
                staff_line: "+15558675309".to_string(),
            },
            session: SessionConfig {
                idle_timeout_secs: 30,
                max_verification_attempts: 3,
                tool_timeout_ms: 5_000,
                tool_retries: 1,
                max_tool_rounds: 4,
                audit_max_attempts: 3,
                audit_base_delay_ms: 25,
            },
            notification: NotificationConfig { enabled: false, webhook_url: None, timeout_secs: 5 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn external_call_policy(&self) -> ExternalCallPolicy {
        ExternalCallPolicy {
            timeout: Duration::from_millis(self.tool_timeout_ms),
            retries: self.tool_retries,
        }
    }

    pub fn audit_backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.audit_max_attempts,
            base_delay_ms: self.audit_base_delay_ms,
            ..BackoffPolicy::default()
        }
    }
}

impl PracticeConfig {
    pub fn clock(&self) -> PracticeClock {
        PracticeClock::from_offset_minutes(self.utc_offset_minutes, self.timezone_label.clone())
            .unwrap_or_default()
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("frontdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Effective configuration with secrets masked, for operator display.
    pub fn redacted_view(&self) -> Value {
        json!({
            "database": {
                "url": self.database.url,
                "max_connections": self.database.max_connections,
                "timeout_secs": self.database.timeout_secs,
            },
            "llm": {
                "provider": self.llm.provider,
                "api_key": self.llm.api_key.as_ref().map(|_| "[redacted]"),
                "base_url": self.llm.base_url,
                "model": self.llm.model,
                "timeout_secs": self.llm.timeout_secs,
                "max_retries": self.llm.max_retries,
            },
            "server": {
                "bind_address": self.server.bind_address,
                "port": self.server.port,
                "graceful_shutdown_secs": self.server.graceful_shutdown_secs,
            },
            "practice": {
                "name": self.practice.name,
                "default_provider_id": self.practice.default_provider_id,
                "utc_offset_minutes": self.practice.utc_offset_minutes,
                "timezone_label": self.practice.timezone_label,
                "emergency_line": self.practice.emergency_line,
                "staff_line": self.practice.staff_line,
            },
            "session": {
                "idle_timeout_secs": self.session.idle_timeout_secs,
                "max_verification_attempts": self.session.max_verification_attempts,
                "tool_timeout_ms": self.session.tool_timeout_ms,
                "tool_retries": self.session.tool_retries,
                "max_tool_rounds": self.session.max_tool_rounds,
                "audit_max_attempts": self.session.audit_max_attempts,
                "audit_base_delay_ms": self.session.audit_base_delay_ms,
            },
            "notification": {
                "enabled": self.notification.enabled,
                "webhook_url": self.notification.webhook_url,
                "timeout_secs": self.notification.timeout_secs,
            },
            "logging": {
                "level": self.logging.level,
                "format": self.logging.format,
            },
        })
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(practice) = patch.practice {
            if let Some(name) = practice.name {
                self.practice.name = name;
            }
            if let Some(default_provider_id) = practice.default_provider_id {
                self.practice.default_provider_id = default_provider_id;
            }
            if let Some(utc_offset_minutes) = practice.utc_offset_minutes {
                self.practice.utc_offset_minutes = utc_offset_minutes;
            }
            if let Some(timezone_label) = practice.timezone_label {
                self.practice.timezone_label = timezone_label;
            }
            if let Some(emergency_line) = practice.emergency_line {
                self.practice.emergency_line = emergency_line;
            }
            if let Some(staff_line) = practice.staff_line {
                self.practice.staff_line = staff_line;
            }
        }

        if let Some(session) = patch.session {
            if let Some(idle_timeout_secs) = session.idle_timeout_secs {
                self.session.idle_timeout_secs = idle_timeout_secs;
            }
            if let Some(max_verification_attempts) = session.max_verification_attempts {
                self.session.max_verification_attempts = max_verification_attempts;
            }
            if let Some(tool_timeout_ms) = session.tool_timeout_ms {
                self.session.tool_timeout_ms = tool_timeout_ms;
            }
            if let Some(tool_retries) = session.tool_retries {
                self.session.tool_retries = tool_retries;
            }
            if let Some(max_tool_rounds) = session.max_tool_rounds {
                self.session.max_tool_rounds = max_tool_rounds;
            }
            if let Some(audit_max_attempts) = session.audit_max_attempts {
                self.session.audit_max_attempts = audit_max_attempts;
            }
            if let Some(audit_base_delay_ms) = session.audit_base_delay_ms {
                self.session.audit_base_delay_ms = audit_base_delay_ms;
            }
        }

        if let Some(notification) = patch.notification {
            if let Some(enabled) = notification.enabled {
                self.notification.enabled = enabled;
            }
            if let Some(webhook_url) = notification.webhook_url {
                self.notification.webhook_url = Some(webhook_url);
            }
            if let Some(timeout_secs) = notification.timeout_secs {
                self.notification.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FRONTDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FRONTDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("FRONTDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("FRONTDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("FRONTDESK_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("FRONTDESK_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("FRONTDESK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("FRONTDESK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("FRONTDESK_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("FRONTDESK_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FRONTDESK_SERVER_PORT") {
            self.server.port = parse_u16("FRONTDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("FRONTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_PRACTICE_NAME") {
            self.practice.name = value;
        }
        if let Some(value) = read_env("FRONTDESK_PRACTICE_UTC_OFFSET_MINUTES") {
            self.practice.utc_offset_minutes =
                parse_i32("FRONTDESK_PRACTICE_UTC_OFFSET_MINUTES", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_PRACTICE_TIMEZONE_LABEL") {
            self.practice.timezone_label = value;
        }
        if let Some(value) = read_env("FRONTDESK_PRACTICE_EMERGENCY_LINE") {
            self.practice.emergency_line = value;
        }
        if let Some(value) = read_env("FRONTDESK_PRACTICE_STAFF_LINE") {
            self.practice.staff_line = value;
        }

        if let Some(value) = read_env("FRONTDESK_SESSION_IDLE_TIMEOUT_SECS") {
            self.session.idle_timeout_secs =
                parse_u64("FRONTDESK_SESSION_IDLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_SESSION_MAX_VERIFICATION_ATTEMPTS") {
            self.session.max_verification_attempts =
                parse_u32("FRONTDESK_SESSION_MAX_VERIFICATION_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_SESSION_TOOL_TIMEOUT_MS") {
            self.session.tool_timeout_ms = parse_u64("FRONTDESK_SESSION_TOOL_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("FRONTDESK_NOTIFICATION_ENABLED") {
            self.notification.enabled = parse_bool("FRONTDESK_NOTIFICATION_ENABLED", &value)?;
        }
        if let Some(value) = read_env("FRONTDESK_NOTIFICATION_WEBHOOK_URL") {
            self.notification.webhook_url = Some(value);
        }

        let log_level =
            read_env("FRONTDESK_LOGGING_LEVEL").or_else(|| read_env("FRONTDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FRONTDESK_LOGGING_FORMAT").or_else(|| read_env("FRONTDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(idle_timeout_secs) = overrides.idle_timeout_secs {
            self.session.idle_timeout_secs = idle_timeout_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_practice(&self.practice)?;
        validate_session(&self.session)?;
        validate_notification(&self.notification)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("frontdesk.toml"), PathBuf::from("config/frontdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_practice(practice: &PracticeConfig) -> Result<(), ConfigError> {
    if !(-14 * 60..=14 * 60).contains(&practice.utc_offset_minutes) {
        return Err(ConfigError::Validation(
            "practice.utc_offset_minutes must be within -840..=840".to_string(),
        ));
    }
    if practice.emergency_line.trim().is_empty() {
        return Err(ConfigError::Validation(
            "practice.emergency_line is required; emergency calls must have a destination"
                .to_string(),
        ));
    }
    if practice.staff_line.trim().is_empty() {
        return Err(ConfigError::Validation("practice.staff_line is required".to_string()));
    }
    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.idle_timeout_secs == 0 || session.idle_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "session.idle_timeout_secs must be in range 1..=600".to_string(),
        ));
    }
    if session.max_verification_attempts == 0 || session.max_verification_attempts > 5 {
        return Err(ConfigError::Validation(
            "session.max_verification_attempts must be in range 1..=5".to_string(),
        ));
    }
    if session.tool_timeout_ms == 0 || session.tool_timeout_ms > 60_000 {
        return Err(ConfigError::Validation(
            "session.tool_timeout_ms must be in range 1..=60000".to_string(),
        ));
    }
    if session.tool_retries > 1 {
        return Err(ConfigError::Validation(
            "session.tool_retries allows at most a single retry".to_string(),
        ));
    }
    if session.max_tool_rounds == 0 {
        return Err(ConfigError::Validation(
            "session.max_tool_rounds must be greater than zero".to_string(),
        ));
    }
    if session.audit_max_attempts == 0 {
        return Err(ConfigError::Validation(
            "session.audit_max_attempts must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_notification(notification: &NotificationConfig) -> Result<(), ConfigError> {
    if let Some(url) = &notification.webhook_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "notification.webhook_url must start with http:// or https://".to_string(),
            ));
        }
    }
    if notification.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "notification.timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i32(key: &str, value: &str) -> Result<i32, ConfigError> {
    value.parse::<i32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    practice: Option<PracticePatch>,
    session: Option<SessionPatch>,
    notification: Option<NotificationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PracticePatch {
    name: Option<String>,
    default_provider_id: Option<String>,
    utc_offset_minutes: Option<i32>,
    timezone_label: Option<String>,
    emergency_line: Option<String>,
    staff_line: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    idle_timeout_secs: Option<u64>,
    max_verification_attempts: Option<u32>,
    tool_timeout_ms: Option<u64>,
    tool_retries: Option<u32>,
    max_tool_rounds: Option<u32>,
    audit_max_attempts: Option<u32>,
    audit_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationPatch {
    enabled: Option<bool>,
    webhook_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
