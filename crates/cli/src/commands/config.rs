use kcart_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "(unset)".to_string());

    let lines = vec![
        "effective config (source precedence: env > file > default):".to_string(),
        render_line("database.url", &config.database.url, "KCART_DATABASE_URL"),
        render_line(
            "database.max_connections",
            &config.database.max_connections.to_string(),
            "KCART_DATABASE_MAX_CONNECTIONS",
        ),
        render_line(
            "database.timeout_secs",
            &config.database.timeout_secs.to_string(),
            "KCART_DATABASE_TIMEOUT_SECS",
        ),
        render_line("llm.provider", &format!("{:?}", config.llm.provider), "KCART_LLM_PROVIDER"),
        render_line("llm.model", &config.llm.model, "KCART_LLM_MODEL"),
        render_line("llm.api_key", &api_key, "KCART_LLM_API_KEY"),
        render_line(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("(default)"),
            "KCART_LLM_BASE_URL",
        ),
        render_line(
            "session.history_limit",
            &config.session.history_limit.to_string(),
            "KCART_SESSION_HISTORY_LIMIT",
        ),
        render_line(
            "session.idle_timeout_secs",
            &config.session.idle_timeout_secs.to_string(),
            "KCART_SESSION_IDLE_TIMEOUT_SECS",
        ),
        render_line(
            "session.max_tool_rounds",
            &config.session.max_tool_rounds.to_string(),
            "KCART_SESSION_MAX_TOOL_ROUNDS",
        ),
        render_line(
            "order.cod_confirm_delay_secs",
            &config.order.cod_confirm_delay_secs.to_string(),
            "KCART_ORDER_COD_CONFIRM_DELAY_SECS",
        ),
        render_line(
            "retrieval.top_k",
            &config.retrieval.top_k.to_string(),
            "KCART_RETRIEVAL_TOP_K",
        ),
        render_line("logging.level", &config.logging.level, "KCART_LOG_LEVEL"),
        render_line(
            "logging.format",
            &format!("{:?}", config.logging.format),
            "KCART_LOG_FORMAT",
        ),
    ];

    lines.join("\n")
}

fn render_line(key: &str, value: &str, env_var: &str) -> String {
    format!("  {key} = {value} (env {env_var})")
}

/// Keep just enough of a secret to recognize it in a paste.
fn redact_secret(secret: &str) -> String {
    if secret.len() <= 8 {
        return "****".to_string();
    }
    format!("{}****{}", &secret[..4], &secret[secret.len() - 2..])
}

#[cfg(test)]
mod tests {
    use super::redact_secret;

    #[test]
    fn short_secrets_are_fully_masked() {
        assert_eq!(redact_secret("abc"), "****");
        assert_eq!(redact_secret("12345678"), "****");
    }

    #[test]
    fn long_secrets_keep_only_the_edges() {
        let redacted = redact_secret("AIzaSyD-very-secret-key");
        assert!(redacted.starts_with("AIza"));
        assert!(redacted.contains("****"));
        assert!(!redacted.contains("very-secret"));
    }
}
