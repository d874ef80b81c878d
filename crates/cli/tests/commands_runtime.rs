use std::env;
use std::sync::{Arc, Mutex, OnceLock};

use frontdesk_cli::commands::{config, migrate, seed, transcript};
use frontdesk_core::{
    AuditActor, AuditCategory, AuditEvent, AuditOutcome, AuditRecorder, BackoffPolicy, SessionId,
};
use frontdesk_db::{connect_with_settings, migrations, SqlAuditSink};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("FRONTDESK_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("FRONTDESK_DATABASE_URL", "postgres://localhost/frontdesk")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_reports_demo_practice_summary() {
    with_env(
        &[("FRONTDESK_DATABASE_URL", "sqlite::memory:"), ("FRONTDESK_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let result = seed::run(5);
            assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "seed");
            assert!(payload["message"].as_str().unwrap_or_default().contains("3 providers"));
        },
    );
}

#[test]
fn seed_rejects_zero_days() {
    let result = seed::run(0);
    assert_eq!(result.exit_code, 2);
    assert_eq!(parse_payload(&result.output)["error_class"], "invalid_argument");
}

#[test]
fn config_redacts_api_key() {
    with_env(
        &[("FRONTDESK_LLM_PROVIDER", "openai"), ("FRONTDESK_LLM_API_KEY", "sk-live-secret")],
        || {
            let text = config::run(false);
            assert!(text.contains("llm.api_key = <redacted> (source: env (FRONTDESK_LLM_API_KEY))"));
            assert!(!text.contains("sk-live-secret"));

            let json = config::run(true);
            assert!(!json.contains("sk-live-secret"));
        },
    );
}

#[test]
fn transcript_verifies_recorded_chain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("audit.db").display());
    let session_id = SessionId("call-cli-0001".to_string());
    record_events(&url, &session_id, 3);

    with_env(&[("FRONTDESK_DATABASE_URL", url.as_str())], || {
        let result = transcript::run(&session_id.0);
        assert_eq!(result.exit_code, 0, "expected verified transcript: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["details"]["chain"]["valid"], true);
        assert_eq!(payload["details"]["chain"]["verified_events"], 3);
        assert_eq!(payload["details"]["audit"][2]["event_type"], "test.step_2");

        let missing = transcript::run("call-unknown");
        assert_eq!(missing.exit_code, 7);
        assert_eq!(parse_payload(&missing.output)["error_class"], "not_found");
    });
}

fn record_events(url: &str, session_id: &SessionId, count: usize) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
    runtime.block_on(async {
        let pool = connect_with_settings(url, 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let recorder = AuditRecorder::new(
            Arc::new(SqlAuditSink::new(pool.clone())),
            BackoffPolicy { max_attempts: 1, base_delay_ms: 1, max_delay_ms: 1 },
        );
        for step in 0..count {
            recorder
                .record(AuditEvent::new(
                    session_id.clone(),
                    format!("test.step_{step}"),
                    AuditCategory::Flow,
                    AuditActor::System,
                    AuditOutcome::Success,
                ))
                .await
                .expect("append");
        }
        pool.close().await;
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let keys = [
        "FRONTDESK_DATABASE_URL",
        "FRONTDESK_DATABASE_MAX_CONNECTIONS",
        "FRONTDESK_DATABASE_TIMEOUT_SECS",
        "FRONTDESK_LLM_PROVIDER",
        "FRONTDESK_LLM_API_KEY",
        "FRONTDESK_LLM_BASE_URL",
        "FRONTDESK_LLM_MODEL",
        "FRONTDESK_SERVER_BIND_ADDRESS",
        "FRONTDESK_SERVER_PORT",
        "FRONTDESK_LOGGING_LEVEL",
        "FRONTDESK_LOGGING_FORMAT",
        "FRONTDESK_LOG_LEVEL",
        "FRONTDESK_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
