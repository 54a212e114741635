use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::DEFAULT_SITE_PORT;

pub mod nginx;
pub use nginx::*;

/// Имя файла реестра прокси в домашней директории
pub const PROXIES_FILE_NAME: &str = ".herd-manager-proxies.json";

/// Имя файла конфигурации в домашней директории
pub const CONFIG_FILE_NAME: &str = ".herd-manager.yaml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub version: u32,
    /// Домашняя директория пользователя, по умолчанию $HOME
    pub home_dir: Option<PathBuf>,
    /// Корень Herd, по умолчанию ~/Library/Application Support/Herd
    pub herd_root: Option<PathBuf>,
    /// Директория с шаблонами nginx; без нее используются встроенные
    pub templates_dir: Option<PathBuf>,
    pub default_port: u16,
    pub port_check: PortCheckConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortCheckConfig {
    pub host: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String, // json или text
    pub level: String,  // error, warn, info, debug, trace
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            home_dir: None,
            herd_root: None,
            templates_dir: None,
            default_port: DEFAULT_SITE_PORT,
            port_check: PortCheckConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PortCheckConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            timeout_secs: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            level: "info".to_string(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Загружает конфигурацию из YAML файла
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Сохраняет конфигурацию в YAML файл
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Путь к файлу конфигурации по умолчанию
    pub fn default_path() -> PathBuf {
        resolve_home_dir(None).join(CONFIG_FILE_NAME)
    }

    /// Раскладка путей Herd для этой конфигурации
    pub fn paths(&self) -> HerdPaths {
        let home = resolve_home_dir(self.home_dir.as_deref());
        match &self.herd_root {
            Some(root) => HerdPaths::with_root(home, root.clone()),
            None => HerdPaths::new(home),
        }
    }
}

/// Определяет домашнюю директорию: явное значение, затем $HOME, затем /tmp
fn resolve_home_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => PathBuf::from(home),
        _ => PathBuf::from("/tmp"),
    }
}

/// Фиксированная структура файлов Herd относительно домашней директории
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HerdPaths {
    home: PathBuf,
    herd_root: PathBuf,
}

impl HerdPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let herd_root = home.join("Library").join("Application Support").join("Herd");
        Self { home, herd_root }
    }

    pub fn with_root(home: impl Into<PathBuf>, herd_root: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            herd_root: herd_root.into(),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn herd_root(&self) -> &Path {
        &self.herd_root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.herd_root.join("bin")
    }

    pub fn herd_executable(&self) -> PathBuf {
        self.bin_dir().join("herd")
    }

    /// Директория с master конфигом и конфигами сайтов
    pub fn nginx_dir(&self) -> PathBuf {
        self.herd_root.join("config").join("nginx")
    }

    pub fn master_config(&self) -> PathBuf {
        self.nginx_dir().join("nginx.conf")
    }

    /// Директория с конфигами прокси (по одному файлу на домен)
    pub fn valet_nginx_dir(&self) -> PathBuf {
        self.herd_root.join("config").join("valet").join("Nginx")
    }

    pub fn proxies_file(&self) -> PathBuf {
        self.home.join(PROXIES_FILE_NAME)
    }

    /// Путь к конфигу сайта `<name>-local.conf`, без обращения к диску
    pub fn site_config(&self, site_name: &str) -> PathBuf {
        self.nginx_dir().join(site_config_file_name(site_name))
    }

    pub fn proxy_config(&self, domain: &str) -> PathBuf {
        self.valet_nginx_dir().join(domain)
    }
}
