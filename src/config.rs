use anyhow::{bail, Result};
use std::env;
use std::str::FromStr;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_SYSTEM_PROMPT: &str =
    "Eres un asistente que ayuda a analizar registros médicos de pacientes desde una hoja de cálculo.";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub secret_token: Option<String>,
    pub cors_origin: String,
    pub batch_concurrency: usize,
    pub backend_timeout_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|val| val.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

impl AppConfig {
    /// Reads everything once at startup. `OPENROUTER_API_KEY` wins over
    /// `OPENAI_API_KEY`; with neither set the process refuses to start.
    pub fn from_env() -> Result<Self> {
        let (api_key, base_url, default_model) = if let Some(key) = env_opt("OPENROUTER_API_KEY") {
            (key, OPENROUTER_BASE_URL.to_string(), "openai/gpt-3.5-turbo")
        } else if let Some(key) = env_opt("OPENAI_API_KEY") {
            (key, OPENAI_BASE_URL.to_string(), "gpt-3.5-turbo")
        } else {
            bail!("neither OPENROUTER_API_KEY nor OPENAI_API_KEY is set");
        };

        Ok(Self {
            host: env_or("HOST", "0.0.0.0".to_string()),
            port: env_or("PORT", 3000),
            api_key,
            base_url,
            model: env_or("MODEL", default_model.to_string()),
            max_tokens: env_or("MAX_TOKENS", 800),
            system_prompt: env_or("SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT.to_string()),
            secret_token: env_opt("SECRET_TOKEN"),
            cors_origin: env_or("CORS_ORIGIN", "*".to_string()),
            batch_concurrency: env_or("BATCH_CONCURRENCY", 1),
            backend_timeout_secs: env_or("BACKEND_TIMEOUT_SECS", 60),
        })
    }
}
