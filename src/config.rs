use std::path::{Path, PathBuf};

use tokio::time::Duration;

pub const CLEANUP_INTERVAL_SECONDS: u64 = 60 * 60;
pub const FILE_EXPIRATION_SECONDS: u64 = 24 * 60 * 60;
pub const DOWNLOAD_LIMIT_PER_MINUTE: usize = 5;
pub const DEFAULT_LIMIT_PER_MINUTE: usize = 10;
pub const RATE_LIMIT_WINDOW_SECONDS: i64 = 60;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
const CONVERTER_BIN: &str = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };

/// Runtime configuration. Paths are fixed relative to the working
/// directory; only network-facing knobs come from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub downloads_dir: PathBuf,
    pub cookie_file: PathBuf,
    pub converter_path: PathBuf,
    pub frontend_dir: PathBuf,
    pub yt_dlp_bin: String,
    pub trust_proxy_headers: bool,
    pub allowed_origins: Vec<String>,
    pub cleanup_interval: Duration,
    pub file_expiration: Duration,
    pub download_limit_per_minute: usize,
    pub default_limit_per_minute: usize,
}

impl AppConfig {
    /// Layout rooted at `root` with the built-in limits and no environment
    /// overrides.
    pub fn with_root(root: &Path) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            downloads_dir: root.join("downloads"),
            cookie_file: root.join("cookies.txt"),
            converter_path: root.join(CONVERTER_BIN),
            frontend_dir: root.join("frontend"),
            yt_dlp_bin: DEFAULT_YT_DLP_BIN.to_string(),
            trust_proxy_headers: false,
            allowed_origins: Vec::new(),
            cleanup_interval: Duration::from_secs(CLEANUP_INTERVAL_SECONDS),
            file_expiration: Duration::from_secs(FILE_EXPIRATION_SECONDS),
            download_limit_per_minute: DOWNLOAD_LIMIT_PER_MINUTE,
            default_limit_per_minute: DEFAULT_LIMIT_PER_MINUTE,
        }
    }

    pub fn from_env() -> std::io::Result<Self> {
        let root = std::env::current_dir()?;
        let mut config = Self::with_root(&root);

        config.bind_addr = resolve_bind_addr();
        config.trust_proxy_headers = read_bool_env("TRUST_PROXY_HEADERS").unwrap_or(false);
        config.allowed_origins = read_list_env("ALLOWED_ORIGINS");
        if let Some(bin) = std::env::var("YT_DLP_BIN")
            .ok()
            .and_then(|value| non_empty(&value).map(ToString::to_string))
        {
            config.yt_dlp_bin = bin;
        }

        Ok(config)
    }

    pub fn frontend_index(&self) -> PathBuf {
        self.frontend_dir.join("index.html")
    }
}

fn read_bool_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    parse_bool(&value)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_list_env(name: &str) -> Vec<String> {
    std::env::var(name)
        .ok()
        .map(|value| split_list(&value))
        .unwrap_or_default()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = std::env::var("APP_ADDR")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_relative_to_root() {
        let config = AppConfig::with_root(Path::new("/srv/app"));

        assert_eq!(config.downloads_dir, Path::new("/srv/app/downloads"));
        assert_eq!(config.cookie_file, Path::new("/srv/app/cookies.txt"));
        assert_eq!(config.frontend_index(), Path::new("/srv/app/frontend/index.html"));
        assert!(config.converter_path.starts_with("/srv/app"));
        assert_eq!(config.cleanup_interval, Duration::from_secs(3600));
        assert_eq!(config.file_expiration, Duration::from_secs(86_400));
        assert_eq!(config.download_limit_per_minute, 5);
        assert_eq!(config.default_limit_per_minute, 10);
    }

    #[test]
    fn bool_values_accept_common_spellings() {
        assert_eq!(parse_bool(" YES "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn list_values_skip_blank_entries() {
        assert_eq!(
            split_list("https://a.example, ,https://b.example,"),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }
}
