use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use frontdesk_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// One displayed setting: dotted key, env override, rendered value.
struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

pub fn run(json: bool) -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    if json {
        return serde_json::to_string_pretty(&config.redacted_view())
            .unwrap_or_else(|error| format!("config serialization failed: {error}"));
    }

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            Some(field.env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }
    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let field = |key, env_key, value: String| Field { key, env_key, value };
    vec![
        field("database.url", "FRONTDESK_DATABASE_URL", config.database.url.clone()),
        field(
            "database.max_connections",
            "FRONTDESK_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        field("llm.provider", "FRONTDESK_LLM_PROVIDER", format!("{:?}", config.llm.provider)),
        field("llm.model", "FRONTDESK_LLM_MODEL", config.llm.model.clone()),
        field(
            "llm.base_url",
            "FRONTDESK_LLM_BASE_URL",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        field(
            "llm.api_key",
            "FRONTDESK_LLM_API_KEY",
            if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" }.to_string(),
        ),
        field("server.bind_address", "FRONTDESK_SERVER_BIND_ADDRESS", config.server.bind_address.clone()),
        field("server.port", "FRONTDESK_SERVER_PORT", config.server.port.to_string()),
        field("practice.name", "FRONTDESK_PRACTICE_NAME", config.practice.name.clone()),
        field(
            "practice.utc_offset_minutes",
            "FRONTDESK_PRACTICE_UTC_OFFSET_MINUTES",
            config.practice.utc_offset_minutes.to_string(),
        ),
        field(
            "practice.emergency_line",
            "FRONTDESK_PRACTICE_EMERGENCY_LINE",
            config.practice.emergency_line.clone(),
        ),
        field("practice.staff_line", "FRONTDESK_PRACTICE_STAFF_LINE", config.practice.staff_line.clone()),
        field(
            "session.idle_timeout_secs",
            "FRONTDESK_SESSION_IDLE_TIMEOUT_SECS",
            config.session.idle_timeout_secs.to_string(),
        ),
        field(
            "session.max_verification_attempts",
            "FRONTDESK_SESSION_MAX_VERIFICATION_ATTEMPTS",
            config.session.max_verification_attempts.to_string(),
        ),
        field(
            "session.tool_timeout_ms",
            "FRONTDESK_SESSION_TOOL_TIMEOUT_MS",
            config.session.tool_timeout_ms.to_string(),
        ),
        field(
            "notification.enabled",
            "FRONTDESK_NOTIFICATION_ENABLED",
            config.notification.enabled.to_string(),
        ),
        field("logging.level", "FRONTDESK_LOGGING_LEVEL", config.logging.level.clone()),
        field("logging.format", "FRONTDESK_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("frontdesk.toml"), PathBuf::from("config/frontdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::contains_path;

    #[test]
    fn nested_keys_are_found_in_file_documents() {
        let doc: toml::Value = "[practice]\nname = \"Lakeside Clinic\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "practice.name"));
        assert!(!contains_path(&doc, "practice.staff_line"));
        assert!(!contains_path(&doc, "llm.model"));
    }
}
