use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{env_optional, LlmProvider};

pub(crate) const DEFAULT_CONFIG_FILE: &str = "echo.json";

/// On-disk settings. Every field is optional; anything missing falls back to
/// the built-in default, and environment variables override both.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct FileConfig {
    #[serde(default)]
    pub(crate) bot_name: Option<String>,
    #[serde(default)]
    pub(crate) db_path: Option<String>,
    #[serde(default)]
    pub(crate) bind: Option<String>,
    #[serde(default)]
    pub(crate) port: Option<u16>,
    #[serde(default)]
    pub(crate) llm_provider: Option<LlmProvider>,
    #[serde(default)]
    pub(crate) model: Option<String>,
    #[serde(default)]
    pub(crate) ollama_host: Option<String>,
    #[serde(default)]
    pub(crate) anthropic_api_key: Option<String>,
    #[serde(default)]
    pub(crate) anthropic_base_url: Option<String>,
    #[serde(default)]
    pub(crate) llm_timeout_secs: Option<u64>,
    #[serde(default)]
    pub(crate) llm_max_retries: Option<usize>,
    #[serde(default)]
    pub(crate) max_hops: Option<usize>,
    #[serde(default)]
    pub(crate) max_messages: Option<usize>,
    #[serde(default)]
    pub(crate) transcript_dir: Option<String>,
    #[serde(default)]
    pub(crate) logging_level: Option<String>,
}

/// `--config`, then `ECHO_CONFIG`, then `./echo.json` when it exists.
pub(crate) fn config_file_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_optional("ECHO_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    local.exists().then_some(local)
}

/// A missing file is an empty config; a malformed one is an error.
pub(crate) fn load_file_config(path: &Path) -> Result<FileConfig, Box<dyn std::error::Error>> {
    match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data)
            .map_err(|e| format!("invalid config file {}: {e}", path.display()).into()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(err) => Err(err.into()),
    }
}
