use std::env;
use std::sync::{Mutex, OnceLock};

use kcart_cli::commands::{config, migrate, seed, tools};
use serde_json::Value;

#[test]
fn migrate_returns_success_against_a_fresh_database() {
    with_env(&[("KCART_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_reports_config_failure_with_exit_code_two() {
    // Gemini without an api key fails validation before anything runs.
    with_env(&[("KCART_LLM_PROVIDER", "gemini")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_loads_and_verifies_the_demo_dataset() {
    with_env(&[("KCART_DATABASE_URL", "sqlite::memory:")], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("3 users"));
        assert!(message.contains("4 products"));
    });
}

#[test]
fn config_output_redacts_the_api_key() {
    with_env(
        &[
            ("KCART_DATABASE_URL", "sqlite::memory:"),
            ("KCART_LLM_PROVIDER", "gemini"),
            ("KCART_LLM_API_KEY", "AIzaSyD-sample-1234567890"),
        ],
        || {
            let output = config::run();
            assert!(output.contains("llm.provider = Gemini"));
            assert!(!output.contains("sample-1234567890"), "api key must never print");
            assert!(output.contains("****"));
        },
    );
}

#[test]
fn tools_listing_covers_all_three_user_types() {
    let output = tools::run();
    assert!(output.contains("unregistered:"));
    assert!(output.contains("buyer:"));
    assert!(output.contains("seller:"));
    assert!(output.contains("create_order"));
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "KCART_DATABASE_URL",
        "KCART_DATABASE_MAX_CONNECTIONS",
        "KCART_DATABASE_TIMEOUT_SECS",
        "KCART_LLM_PROVIDER",
        "KCART_LLM_API_KEY",
        "KCART_LLM_BASE_URL",
        "KCART_LLM_MODEL",
        "KCART_LLM_TIMEOUT_SECS",
        "KCART_LLM_MAX_RETRIES",
        "KCART_SESSION_HISTORY_LIMIT",
        "KCART_SESSION_IDLE_TIMEOUT_SECS",
        "KCART_SESSION_MAX_TOOL_ROUNDS",
        "KCART_ORDER_COD_CONFIRM_DELAY_SECS",
        "KCART_RETRIEVAL_TOP_K",
        "KCART_LOGGING_LEVEL",
        "KCART_LOGGING_FORMAT",
        "KCART_LOG_LEVEL",
        "KCART_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, previous) in previous_values {
        match previous {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }
}
