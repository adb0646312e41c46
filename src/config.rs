use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_ENV_PREFIX: &str = "FORUM_THREAD";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub forum: ForumConfig,
    #[serde(default)]
    pub attachments: AttachmentConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForumConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub username: String,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
            username: String::new(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_user_agent() -> String {
    format!("forum-thread/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttachmentConfig {
    #[serde(default = "default_max_images")]
    pub max_images: usize,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_images: default_max_images(),
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

fn default_max_images() -> usize {
    5
}

fn default_max_size_bytes() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    /// Render width in columns; zero means the terminal width.
    #[serde(default)]
    pub width: usize,
    #[serde(default = "default_indent_width")]
    pub indent_width: usize,
    #[serde(default = "default_show_timestamps")]
    pub show_timestamps: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 0,
            indent_width: default_indent_width(),
            show_timestamps: default_show_timestamps(),
        }
    }
}

fn default_indent_width() -> usize {
    4
}

fn default_show_timestamps() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    #[serde(default)]
    pub production: bool,
    #[serde(default = "default_app_url")]
    pub app_url: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            production: false,
            app_url: default_app_url(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_app_url() -> String {
    "https://assistant.videogamewingman.com/".to_string()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    // Env values win over the file, even when they equal the default.
    for (key, value) in env_overrides(prefix) {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    debug!(path = %path.display(), "reading config file");
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    let defaults = Config::default();

    if !other.forum.base_url.is_empty() && other.forum.base_url != defaults.forum.base_url {
        base.forum.base_url = other.forum.base_url;
    }
    if !other.forum.user_agent.is_empty() && other.forum.user_agent != defaults.forum.user_agent {
        base.forum.user_agent = other.forum.user_agent;
    }
    if other.forum.timeout != defaults.forum.timeout && !other.forum.timeout.is_zero() {
        base.forum.timeout = other.forum.timeout;
    }
    if !other.forum.username.is_empty() {
        base.forum.username = other.forum.username;
    }

    if other.attachments.max_images != 0 && other.attachments.max_images != defaults.attachments.max_images {
        base.attachments.max_images = other.attachments.max_images;
    }
    if other.attachments.max_size_bytes != 0
        && other.attachments.max_size_bytes != defaults.attachments.max_size_bytes
    {
        base.attachments.max_size_bytes = other.attachments.max_size_bytes;
    }

    if other.display.width != 0 {
        base.display.width = other.display.width;
    }
    if other.display.indent_width != defaults.display.indent_width {
        base.display.indent_width = other.display.indent_width;
    }
    if !other.display.show_timestamps {
        base.display.show_timestamps = false;
    }

    if other.security.production {
        base.security.production = true;
    }
    if !other.security.app_url.is_empty() && other.security.app_url != defaults.security.app_url {
        base.security.app_url = other.security.app_url;
    }
    if !other.security.allowed_origins.is_empty() {
        base.security.allowed_origins = other.security.allowed_origins;
    }

    base
}

fn env_overrides(prefix: &str) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }
    map
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "forum.base_url" => cfg.forum.base_url = value,
        "forum.user_agent" => cfg.forum.user_agent = value,
        "forum.username" => cfg.forum.username = value,
        "forum.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.forum.timeout = duration;
            }
        }
        "attachments.max_images" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.attachments.max_images = parsed;
            }
        }
        "attachments.max_size_bytes" => {
            if let Ok(parsed) = value.parse::<u64>() {
                cfg.attachments.max_size_bytes = parsed;
            }
        }
        "display.width" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.display.width = parsed;
            }
        }
        "display.indent_width" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.display.indent_width = parsed;
            }
        }
        "display.show_timestamps" => {
            cfg.display.show_timestamps = matches!(value.as_str(), "1" | "true" | "TRUE" | "True");
        }
        "security.production" => {
            cfg.security.production = matches!(value.as_str(), "1" | "true" | "TRUE" | "True");
        }
        "security.app_url" => cfg.security.app_url = value,
        "security.allowed_origins" => {
            cfg.security.allowed_origins = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("forum-thread").join("config.yaml"))
}

/// Writes the acting username into the config file, creating it when needed.
pub fn save_identity(path: Option<PathBuf>, username: &str) -> Result<PathBuf> {
    let username = username.trim();
    anyhow::ensure!(!username.is_empty(), "config: forum.username is required");

    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };
    cfg.forum.username = username.to_string();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}

/// Clears the username saved by [`save_identity`]. A missing file is left alone.
pub fn forget_identity(path: Option<PathBuf>) -> Result<()> {
    let Some(path) = path.or_else(default_config_path) else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }
    let mut cfg = read_config_file(&path)?;
    if cfg.forum.username.is_empty() {
        return Ok(());
    }
    cfg.forum.username.clear();
    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))
}
