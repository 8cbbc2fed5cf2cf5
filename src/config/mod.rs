//! Process configuration (environment, then `.env`, then defaults).

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::dispatch::ProviderKind;
use crate::error::{DispensaryError, Result};

/// Built-in assistant instructions used when no prompt file is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("../../prompts/system_prompt.txt");

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_FRONTEND_DIR: &str = "frontend";

/// Configuration built once at startup and passed by reference.
#[derive(Clone)]
pub struct DispensaryConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: String,
    /// Overrides the provider's public endpoint.
    pub base_url: Option<String>,
    pub max_tool_rounds: usize,
    /// Applies to the HTTP client only; the loop itself has no timeout.
    pub request_timeout: Duration,
    pub system_prompt: String,
    /// Postgres connection string. Unset means the in-memory store.
    pub database_url: Option<String>,
    /// Seed data for the in-memory store. Unset means the bundled data.
    pub seed_file: Option<PathBuf>,
    pub bind_addr: SocketAddr,
    pub frontend_dir: Option<PathBuf>,
}

impl fmt::Debug for DispensaryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispensaryConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &"[redacted]")
            .field("base_url", &self.base_url)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .field("request_timeout", &self.request_timeout)
            .field("database_url", &self.database_url.as_ref().map(|_| "[redacted]"))
            .field("seed_file", &self.seed_file)
            .field("bind_addr", &self.bind_addr)
            .field("frontend_dir", &self.frontend_dir)
            .finish_non_exhaustive()
    }
}

impl DispensaryConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider = ProviderKind::resolve(var("MODEL_PROVIDER").as_deref());
        let (model_var, key_vars, url_var): (&str, &[&str], &str) = match provider {
            ProviderKind::OpenAi => ("OPENAI_MODEL", &["OPENAI_API_KEY"], "OPENAI_BASE_URL"),
            ProviderKind::Gemini => ("GEMINI_MODEL", &["GEMINI_API_KEY", "GOOGLE_API_KEY"], "GEMINI_BASE_URL"),
        };

        let model = var("MODEL_VERSION")
            .or_else(|| var(model_var))
            .unwrap_or_else(|| provider.default_model().to_string());

        let api_key = var("MODEL_API_KEY")
            .or_else(|| key_vars.iter().find_map(|&k| var(k)))
            .ok_or_else(|| {
                DispensaryError::Configuration(format!(
                    "no API key for provider '{provider}': set MODEL_API_KEY or {}",
                    key_vars.join(" / ")
                ))
            })?;

        let max_tool_rounds = parse_var(&var, "MAX_TOOL_ROUNDS", DEFAULT_MAX_TOOL_ROUNDS)?;
        let timeout_secs = parse_var(&var, "REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;

        let system_prompt = match var("SYSTEM_PROMPT_FILE") {
            Some(path) => std::fs::read_to_string(&path)
                .map_err(|e| DispensaryError::Configuration(format!("cannot read SYSTEM_PROMPT_FILE {path}: {e}")))?
                .trim()
                .to_string(),
            None => DEFAULT_SYSTEM_PROMPT.trim().to_string(),
        };

        let bind_addr = var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| DispensaryError::Configuration(format!("invalid BIND_ADDR '{bind_addr}': {e}")))?;

        let serve_frontend = var("SERVE_FRONTEND").is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let frontend_dir = serve_frontend
            .then(|| PathBuf::from(var("FRONTEND_DIR").unwrap_or_else(|| DEFAULT_FRONTEND_DIR.to_string())));

        Ok(Self {
            provider,
            model,
            api_key,
            base_url: var(url_var),
            max_tool_rounds,
            request_timeout: Duration::from_secs(timeout_secs),
            system_prompt,
            database_url: var("DATABASE_URL"),
            seed_file: var("PHARMACY_SEED_FILE").map(PathBuf::from),
            bind_addr,
            frontend_dir,
        })
    }
}

fn parse_var<T>(var: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| DispensaryError::Configuration(format!("invalid {key} '{raw}': {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<DispensaryConfig> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        DispensaryConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn openai_defaults() {
        let config = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap();

        assert_eq!(config.provider, ProviderKind::OpenAi);
        assert_eq!(config.model, "gpt-5");
        assert_eq!(config.max_tool_rounds, 10);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8000");
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT.trim());
        assert!(config.base_url.is_none());
        assert!(config.frontend_dir.is_none());
    }

    #[test]
    fn gemini_reads_its_own_variables() {
        let config = load(&[
            ("MODEL_PROVIDER", "gemini"),
            ("GOOGLE_API_KEY", "g-key"),
            ("OPENAI_API_KEY", "ignored"),
            ("GEMINI_MODEL", "gemini-2.5-pro"),
            ("GEMINI_BASE_URL", "http://localhost:9000"),
        ])
        .unwrap();

        assert_eq!(config.provider, ProviderKind::Gemini);
        assert_eq!(config.api_key, "g-key");
        assert_eq!(config.model, "gemini-2.5-pro");
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn generic_variables_take_precedence() {
        let config = load(&[
            ("MODEL_VERSION", "gpt-5-mini"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("MODEL_API_KEY", "generic"),
            ("OPENAI_API_KEY", "specific"),
        ])
        .unwrap();

        assert_eq!(config.model, "gpt-5-mini");
        assert_eq!(config.api_key, "generic");
    }

    #[test]
    fn missing_key_names_the_variables() {
        let err = load(&[("MODEL_PROVIDER", "gemini")]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("GEMINI_API_KEY"), "{message}");
        assert!(message.contains("MODEL_API_KEY"), "{message}");
    }

    #[test]
    fn non_numeric_round_budget_is_rejected() {
        let err = load(&[("OPENAI_API_KEY", "k"), ("MAX_TOOL_ROUNDS", "lots")]).unwrap_err();
        assert!(matches!(err, DispensaryError::Configuration(_)));
    }

    #[test]
    fn frontend_dir_requires_serve_flag() {
        let off = load(&[("OPENAI_API_KEY", "k"), ("FRONTEND_DIR", "/srv/ui")]).unwrap();
        assert!(off.frontend_dir.is_none());

        let on = load(&[("OPENAI_API_KEY", "k"), ("SERVE_FRONTEND", "TRUE"), ("FRONTEND_DIR", "/srv/ui")]).unwrap();
        assert_eq!(on.frontend_dir, Some(PathBuf::from("/srv/ui")));
    }

    #[test]
    fn prompt_file_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "Answer in Hebrew.\n").unwrap();

        let config = load(&[("OPENAI_API_KEY", "k"), ("SYSTEM_PROMPT_FILE", path.to_str().unwrap())]).unwrap();
        assert_eq!(config.system_prompt, "Answer in Hebrew.");
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = load(&[("OPENAI_API_KEY", "sk-secret"), ("DATABASE_URL", "postgres://u:pw@h/db")]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("pw@h"));
    }
}
