//! Configuration for the loan-file engine.
//!
//! Settings resolve from defaults, then an optional TOML config file, then
//! environment variables. Relative paths in the config file are resolved
//! against the config file's directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::llm::LlmConfig;
use crate::retry::BackoffPolicy;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "loanfile.db";

const DOCUMENTS_SUBDIR: &str = "documents";

/// Resolved application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside `data_dir`.
    pub database_filename: String,
    /// Directory for content-addressed document bytes.
    pub documents_dir: PathBuf,
    /// Funder whose requirement overlay applies.
    pub funder_id: String,
    /// LLM configuration for document analysis.
    pub llm: LlmConfig,
    /// Remote mirror configuration.
    pub mirror: MirrorConfig,
    /// Backoff policy for rate-limited remote calls.
    pub backoff: BackoffPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        // Documents dir -> home dir -> current dir, whichever exists first.
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("loanfile");

        Self {
            documents_dir: data_dir.join(DOCUMENTS_SUBDIR),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            funder_id: "base".to_string(),
            llm: LlmConfig::default(),
            mirror: MirrorConfig::default(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl Settings {
    /// Create settings rooted at a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            documents_dir: data_dir.join(DOCUMENTS_SUBDIR),
            data_dir,
            ..Default::default()
        }
    }

    /// Full path to the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Whether the database has been initialized.
    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    /// Ensure the data and documents directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.documents_dir)?;
        Ok(())
    }
}

/// Remote mirror settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Remote folder id documents are filed under.
    #[serde(default)]
    pub folder_id: String,
    /// Environment variable holding the mirror bearer token.
    #[serde(default = "default_token_env")]
    pub access_token_env: String,
    /// Request timeout in seconds.
    #[serde(default = "default_mirror_timeout")]
    pub timeout_secs: u64,
}

fn default_token_env() -> String {
    "DRIVE_ACCESS_TOKEN".to_string()
}

fn default_mirror_timeout() -> u64 {
    60
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            folder_id: String::new(),
            access_token_env: default_token_env(),
            timeout_secs: default_mirror_timeout(),
        }
    }
}

impl MirrorConfig {
    /// Read the bearer token from the configured environment variable.
    pub fn access_token(&self) -> Option<String> {
        std::env::var(&self.access_token_env)
            .ok()
            .filter(|s| !s.is_empty())
    }
}

/// Backoff settings as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl BackoffConfig {
    pub fn to_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.max_attempts,
            std::time::Duration::from_millis(self.base_delay_ms),
            self.multiplier,
        )
    }
}

/// Configuration file structure (TOML).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Funder id for requirement overlays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funder: Option<String>,
    /// LLM configuration.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Remote mirror configuration.
    #[serde(default)]
    pub mirror: MirrorConfig,
    /// Backoff policy for rate-limited calls.
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Path this config was loaded from; not serialized.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file: {}", e))?;
        let mut config: Config =
            toml::from_str(&contents).map_err(|e| format!("failed to parse config: {}", e))?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Discover a config file: explicit path, then `loanfile.toml` in the
    /// current directory, then `~/.config/loanfile/config.toml`.
    pub fn discover(explicit: Option<&Path>) -> Self {
        if let Some(path) = explicit {
            return Self::load_from_path(path).unwrap_or_default();
        }
        let cwd_candidate = PathBuf::from("loanfile.toml");
        if cwd_candidate.exists() {
            return Self::load_from_path(&cwd_candidate).unwrap_or_default();
        }
        if let Some(config_dir) = dirs::config_dir() {
            let candidate = config_dir.join("loanfile").join("config.toml");
            if candidate.exists() {
                return Self::load_from_path(&candidate).unwrap_or_default();
            }
        }
        Self::default()
    }

    /// Directory for resolving relative paths in this config.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a possibly-relative, possibly-tilde path.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply this config over default settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
            settings.documents_dir = settings.data_dir.join(DOCUMENTS_SUBDIR);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref funder) = self.funder {
            settings.funder_id = funder.clone();
        }
        settings.llm = self.llm.clone();
        settings.mirror = self.mirror.clone();
        settings.backoff = self.backoff.to_policy();
    }
}

/// Load settings: defaults, config file, then environment overrides.
///
/// `.env` files are loaded by the binary entrypoint before this runs.
pub fn load_settings(config_path: Option<&Path>, data_override: Option<&Path>) -> Settings {
    let config = Config::discover(config_path);
    let mut settings = Settings::default();

    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);

    if let Some(data_dir) = data_override {
        settings.data_dir = data_dir.to_path_buf();
        settings.documents_dir = settings.data_dir.join(DOCUMENTS_SUBDIR);
    }

    if let Some(data_dir) = std::env::var("LOANFILE_DATA_DIR")
        .ok()
        .filter(|s| !s.is_empty())
    {
        settings.data_dir = PathBuf::from(shellexpand::tilde(&data_dir).as_ref());
        settings.documents_dir = settings.data_dir.join(DOCUMENTS_SUBDIR);
    }

    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.database_filename, DEFAULT_DATABASE_FILENAME);
        assert_eq!(settings.funder_id, "base");
        assert!(settings.documents_dir.ends_with("documents"));
    }

    #[test]
    fn test_config_applies_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("loanfile.toml");
        std::fs::write(
            &config_path,
            r#"
data_dir = "loans"
funder = "kiavi"

[llm]
model = "llama3.1"

[backoff]
max_attempts = 3
base_delay_ms = 100
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&config_path).unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, dir.path());

        assert_eq!(settings.data_dir, dir.path().join("loans"));
        assert_eq!(settings.funder_id, "kiavi");
        assert_eq!(settings.llm.model, "llama3.1");
        assert_eq!(settings.backoff.max_attempts, 3);
        assert_eq!(
            settings.backoff.base_delay,
            std::time::Duration::from_millis(100)
        );
    }

    #[test]
    fn test_resolve_path_tilde_and_relative() {
        let config = Config::default();
        let base = Path::new("/base");
        assert_eq!(config.resolve_path("/abs/x", base), PathBuf::from("/abs/x"));
        assert_eq!(config.resolve_path("rel/x", base), PathBuf::from("/base/rel/x"));
    }

    #[test]
    fn test_backoff_config_to_policy() {
        let policy = BackoffConfig::default().to_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, std::time::Duration::from_millis(500));
    }
}
