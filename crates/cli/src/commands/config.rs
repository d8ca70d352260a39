use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use salesdesk_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    render(&config, config_file_doc.as_ref(), config_file_path.as_deref())
}

fn render(config: &AppConfig, file_doc: Option<&Value>, file_path: Option<&Path>) -> String {
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_token(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    let fields: Vec<(&str, String, &[&str])> = vec![
        ("database.url", config.database.url.clone(), &["SALESDESK_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["SALESDESK_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["SALESDESK_DATABASE_TIMEOUT_SECS"],
        ),
        ("llm.provider", config.llm.provider.as_str().to_string(), &["SALESDESK_LLM_PROVIDER"]),
        ("llm.model", config.llm.model.clone(), &["SALESDESK_LLM_MODEL"]),
        ("llm.base_url", config.llm.endpoint_base(), &["SALESDESK_LLM_BASE_URL"]),
        ("llm.api_key", api_key, &["SALESDESK_LLM_API_KEY"]),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["SALESDESK_LLM_TIMEOUT_SECS"]),
        ("llm.max_retries", config.llm.max_retries.to_string(), &["SALESDESK_LLM_MAX_RETRIES"]),
        ("server.bind_address", config.server.bind_address.clone(), &["SALESDESK_SERVER_BIND_ADDRESS"]),
        ("server.port", config.server.port.to_string(), &["SALESDESK_SERVER_PORT"]),
        (
            "session.sessions_dir",
            config.session.sessions_dir.display().to_string(),
            &["SALESDESK_SESSION_DIR"],
        ),
        (
            "session.personalization_dir",
            config.session.personalization_dir.display().to_string(),
            &["SALESDESK_PERSONALIZATION_DIR"],
        ),
        (
            "session.max_history",
            config.session.max_history.to_string(),
            &["SALESDESK_SESSION_MAX_HISTORY"],
        ),
        (
            "governance.intent_similarity_threshold",
            config.governance.intent_similarity_threshold.to_string(),
            &["SALESDESK_GOVERNANCE_INTENT_SIMILARITY_THRESHOLD"],
        ),
        ("trace.sink", format!("{:?}", config.trace.sink).to_lowercase(), &["SALESDESK_TRACE_SINK"]),
        ("trace.dir", config.trace.dir.display().to_string(), &["SALESDESK_TRACE_DIR"]),
        (
            "logging.level",
            config.logging.level.clone(),
            &["SALESDESK_LOGGING_LEVEL", "SALESDESK_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["SALESDESK_LOGGING_FORMAT", "SALESDESK_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in fields {
        lines.push(render_line(key, &value, field_source(key, env_keys, file_doc, file_path)));
    }
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("salesdesk.toml"), PathBuf::from("config/salesdesk.toml")]
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
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
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

/// Keeps a provider prefix such as `sk-` so operators can tell keys apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use salesdesk_core::config::AppConfig;
    use secrecy::SecretString;
    use toml::Value;

    use super::{contains_path, redact_token, render};

    #[test]
    fn redaction_keeps_only_the_prefix() {
        assert_eq!(redact_token("sk-live-abcdef"), "sk-***");
        assert_eq!(redact_token("AIzaSyExample"), "<redacted>");
        assert_eq!(redact_token("   "), "<empty>");
    }

    #[test]
    fn nested_keys_resolve_in_toml_documents() {
        let doc: Value = "[llm]\nmodel = \"llama3\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "llm.model"));
        assert!(!contains_path(&doc, "llm.provider"));
        assert!(!contains_path(&doc, "database.url"));
    }

    #[test]
    fn rendered_config_never_prints_the_api_key() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some(SecretString::from("sk-secret-value".to_string()));
        let doc: Value = "[governance]\nintent_similarity_threshold = 0.3\n".parse().expect("toml");

        let rendered = render(&config, Some(&doc), Some(Path::new("salesdesk.toml")));

        assert!(!rendered.contains("secret-value"));
        assert!(rendered.contains("- llm.api_key = sk-***"));
        assert!(rendered.contains(
            "- governance.intent_similarity_threshold = 0.2 (source: file (salesdesk.toml))"
        ));
        assert!(rendered.contains("- trace.sink = "));
    }
}
