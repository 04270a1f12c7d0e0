use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    config_file_path, env_optional, load_file_config, FileConfig, Token, DEFAULT_ANTHROPIC_URL, DEFAULT_MAX_HOPS,
    DEFAULT_MAX_MESSAGES,
};

pub(crate) const DEFAULT_BOT_NAME: &str = "Echo";
pub(crate) const DEFAULT_DB_PATH: &str = "echo.sqlite";
pub(crate) const DEFAULT_BIND: &str = "127.0.0.1";
pub(crate) const DEFAULT_PORT: u16 = 8580;
pub(crate) const DEFAULT_MODEL: &str = "llama3.2";
pub(crate) const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub(crate) const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
pub(crate) const DEFAULT_LLM_MAX_RETRIES: usize = 2;
pub(crate) const DEFAULT_LOGGING_LEVEL: &str = "INFO";

const SECRET_MASK: &str = "secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum LlmProvider {
    Ollama,
    Anthropic,
    Mock,
}

impl LlmProvider {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Anthropic => "anthropic",
            Self::Mock => "mock",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "mock" => Ok(Self::Mock),
            other => Err(format!("unknown llm provider '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ConfigSource {
    Default,
    File,
    Environment,
}

/// Where one setting came from. Secret values are never recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ConfigItem {
    pub(crate) name: String,
    pub(crate) value: String,
    pub(crate) from: ConfigSource,
}

#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) bot_name: String,
    pub(crate) db_path: PathBuf,
    pub(crate) bind: String,
    pub(crate) port: u16,
    pub(crate) llm_provider: LlmProvider,
    pub(crate) model: String,
    pub(crate) ollama_host: String,
    pub(crate) anthropic_api_key: Option<String>,
    pub(crate) anthropic_base_url: String,
    pub(crate) llm_timeout_secs: u64,
    pub(crate) llm_max_retries: usize,
    pub(crate) max_hops: usize,
    pub(crate) max_messages: usize,
    pub(crate) transcript_dir: Option<PathBuf>,
    pub(crate) logging_level: String,
    pub(crate) items: Vec<ConfigItem>,
}

/// Applies default < file < environment for one setting at a time and keeps
/// a record of which layer won.
struct Resolver<'a> {
    env: &'a dyn Fn(&str) -> Option<String>,
    items: Vec<ConfigItem>,
}

impl Resolver<'_> {
    fn record(&mut self, name: &str, value: &str, from: ConfigSource, secret: bool) {
        let value = if secret && !value.is_empty() { SECRET_MASK } else { value };
        self.items.push(ConfigItem {
            name: name.to_string(),
            value: value.to_string(),
            from,
        });
    }

    fn parsed<T>(&mut self, name: &str, file: Option<T>, default: T) -> Result<T, String>
    where
        T: FromStr + ToString,
        T::Err: std::fmt::Display,
    {
        let (value, from) = match (self.env)(name) {
            Some(raw) => (
                raw.trim().parse::<T>().map_err(|e| format!("Invalid {name}: {e}"))?,
                ConfigSource::Environment,
            ),
            None => match file {
                Some(value) => (value, ConfigSource::File),
                None => (default, ConfigSource::Default),
            },
        };
        self.record(name, &value.to_string(), from, false);
        Ok(value)
    }

    fn string(&mut self, name: &str, file: Option<String>, default: &str) -> String {
        let (value, from) = match (self.env)(name) {
            Some(value) => (value, ConfigSource::Environment),
            None => match file {
                Some(value) => (value, ConfigSource::File),
                None => (default.to_string(), ConfigSource::Default),
            },
        };
        self.record(name, &value, from, false);
        value
    }

    fn optional(&mut self, name: &str, file: Option<String>, secret: bool) -> Option<String> {
        let (value, from) = match (self.env)(name) {
            Some(value) => (Some(value), ConfigSource::Environment),
            None => match file.filter(|v| !v.trim().is_empty()) {
                Some(value) => (Some(value), ConfigSource::File),
                None => (None, ConfigSource::Default),
            },
        };
        self.record(name, value.as_deref().unwrap_or(""), from, secret);
        value
    }
}

impl Config {
    /// Resolves the process configuration from the config file and environment.
    pub(crate) fn load(explicit: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let file = match config_file_path(explicit) {
            Some(path) => load_file_config(&path)?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(&file, &env_optional)?)
    }

    pub(crate) fn resolve(file: &FileConfig, env: &dyn Fn(&str) -> Option<String>) -> Result<Self, String> {
        let file = file.clone();
        let mut r = Resolver { env, items: Vec::new() };
        let bot_name = r.string("ECHO_BOT_NAME", file.bot_name, DEFAULT_BOT_NAME);
        let db_path = r.string("ECHO_DB_PATH", file.db_path, DEFAULT_DB_PATH);
        let bind = r.string("ECHO_BIND", file.bind, DEFAULT_BIND);
        let port = r.parsed("ECHO_PORT", file.port, DEFAULT_PORT)?;
        let llm_provider = r.parsed("ECHO_LLM_PROVIDER", file.llm_provider, LlmProvider::Ollama)?;
        let model = r.string("ECHO_MODEL", file.model, DEFAULT_MODEL);
        let ollama_host = r.string("OLLAMA_HOST", file.ollama_host, DEFAULT_OLLAMA_HOST);
        let anthropic_api_key = r.optional("ANTHROPIC_API_KEY", file.anthropic_api_key, true);
        let anthropic_base_url = r.string("ANTHROPIC_BASE_URL", file.anthropic_base_url, DEFAULT_ANTHROPIC_URL);
        let llm_timeout_secs = r.parsed("ECHO_LLM_TIMEOUT", file.llm_timeout_secs, DEFAULT_LLM_TIMEOUT_SECS)?;
        let llm_max_retries = r.parsed("ECHO_LLM_MAX_RETRIES", file.llm_max_retries, DEFAULT_LLM_MAX_RETRIES)?;
        let max_hops = r.parsed("ECHO_MAX_HOPS", file.max_hops, DEFAULT_MAX_HOPS)?;
        let max_messages = r.parsed("ECHO_MAX_MESSAGES", file.max_messages, DEFAULT_MAX_MESSAGES)?;
        let transcript_dir = r.optional("ECHO_TRANSCRIPT_DIR", file.transcript_dir, false);
        let logging_level = r.string("LOGGING_LEVEL", file.logging_level, DEFAULT_LOGGING_LEVEL);

        Ok(Self {
            bot_name,
            db_path: PathBuf::from(db_path),
            bind,
            port,
            llm_provider,
            model,
            ollama_host,
            anthropic_api_key,
            anthropic_base_url,
            llm_timeout_secs,
            llm_max_retries,
            max_hops,
            max_messages,
            transcript_dir: transcript_dir.map(PathBuf::from),
            logging_level,
            items: r.items,
        })
    }

    pub(crate) fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// `EnvFilter` directive for the configured level (`INFO` becomes `info`).
    pub(crate) fn log_filter(&self) -> String {
        match self.logging_level.trim().to_ascii_lowercase().as_str() {
            "warning" => "warn".to_string(),
            "critical" | "fatal" => "error".to_string(),
            "" => "info".to_string(),
            other => other.to_string(),
        }
    }

    /// Externally visible view: the per-setting provenance with secrets masked.
    pub(crate) fn to_public_value(&self, token: &Token) -> serde_json::Value {
        serde_json::json!({
            "config_items": self.items,
            "token": token,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::resolve(&FileConfig::default(), &|_| None).unwrap();
        assert_eq!(config.bot_name, "Echo");
        assert_eq!(config.port, 8580);
        assert_eq!(config.llm_provider, LlmProvider::Ollama);
        assert_eq!(config.max_hops, DEFAULT_MAX_HOPS);
        assert_eq!(config.max_messages, 1000);
        assert!(config.anthropic_api_key.is_none());
        assert!(config.items.iter().all(|i| i.from == ConfigSource::Default));
        assert_eq!(config.log_filter(), "info");
    }

    #[test]
    fn environment_overrides_file() {
        let file = FileConfig {
            bot_name: Some("Fran".into()),
            port: Some(9000),
            model: Some("file-model".into()),
            ..FileConfig::default()
        };
        let env = env_of(&[("ECHO_PORT", "9100"), ("ECHO_LLM_PROVIDER", "mock"), ("LOGGING_LEVEL", "WARNING")]);
        let config = Config::resolve(&file, &env).unwrap();
        assert_eq!(config.bot_name, "Fran");
        assert_eq!(config.port, 9100);
        assert_eq!(config.model, "file-model");
        assert_eq!(config.llm_provider, LlmProvider::Mock);
        assert_eq!(config.log_filter(), "warn");
        let port = config.items.iter().find(|i| i.name == "ECHO_PORT").unwrap();
        assert_eq!(port.from, ConfigSource::Environment);
        let name = config.items.iter().find(|i| i.name == "ECHO_BOT_NAME").unwrap();
        assert_eq!(name.from, ConfigSource::File);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let env = env_of(&[("ECHO_MAX_HOPS", "lots")]);
        let err = Config::resolve(&FileConfig::default(), &env).unwrap_err();
        assert!(err.starts_with("Invalid ECHO_MAX_HOPS"));
        let env = env_of(&[("ECHO_LLM_PROVIDER", "gpt")]);
        assert!(Config::resolve(&FileConfig::default(), &env).is_err());
    }

    #[test]
    fn public_view_masks_secrets() {
        let env = env_of(&[("ANTHROPIC_API_KEY", "sk-ant-very-secret")]);
        let config = Config::resolve(&FileConfig::default(), &env).unwrap();
        assert_eq!(config.anthropic_api_key.as_deref(), Some("sk-ant-very-secret"));
        let token = crate::create_echo_token();
        let public = config.to_public_value(&token);
        let text = public.to_string();
        assert!(!text.contains("sk-ant-very-secret"));
        let items = public["config_items"].as_array().unwrap();
        let key = items.iter().find(|i| i["name"] == "ANTHROPIC_API_KEY").unwrap();
        assert_eq!(key["value"], "secret");
        assert_eq!(key["from"], "environment");
        assert_eq!(public["token"]["user_id"], "aaaa00000000000000000001");
    }
}
