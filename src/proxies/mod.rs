use chrono::{Local, NaiveDateTime, Timelike};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;

use crate::config::{Config, HerdPaths};
use crate::error::{HerdError, Result};
use crate::metrics::{result_label, PROXY_OPERATIONS};
use crate::restart::{DetachedRestart, Restarter};
use crate::templates::{CommandTemplates, NginxTemplates};
use crate::types::ProxyRecord;

pub mod store;
pub use store::{JsonFileStore, MemoryStore, ProxyStore, ProxyTable};

/// Домен, который Herd обслуживает для локальных сайтов
pub const PROXY_TLD: &str = ".test";

pub const MIN_PROXY_PORT: i64 = 1024;
pub const MAX_PROXY_PORT: i64 = 65535;

static PROXY_NAME_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").expect("valid proxy name regex"));

/// Проверяет имя и порт прокси; порт приходит как непроверенный ввод
pub fn validate_proxy_input(name: &str, port: i64) -> Result<u16> {
    if name.is_empty() || port == 0 {
        return Err(HerdError::invalid_input("Name and port are required"));
    }

    if !PROXY_NAME_REGEX.is_match(name) {
        return Err(HerdError::invalid_input(
            "Name must contain only lowercase letters, numbers and hyphens",
        ));
    }

    if !(MIN_PROXY_PORT..=MAX_PROXY_PORT).contains(&port) {
        return Err(HerdError::invalid_input(format!(
            "Port must be between {} and {}",
            MIN_PROXY_PORT, MAX_PROXY_PORT
        )));
    }

    u16::try_from(port).map_err(|_| HerdError::invalid_input("Port must be between 1024 and 65535"))
}

fn now_without_nanos() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Реестр reverse-proxy записей `<name>.test -> 127.0.0.1:<port>`.
/// Состояние читается из хранилища заново при каждой операции.
pub struct ProxyRegistry {
    paths: HerdPaths,
    templates: NginxTemplates,
    store: Box<dyn ProxyStore>,
    restarter: Box<dyn Restarter>,
}

impl ProxyRegistry {
    pub fn from_config(config: &Config) -> Result<Self> {
        let paths = config.paths();
        let restarter = DetachedRestart::for_herd(&paths, &CommandTemplates::default())?;

        Ok(Self {
            store: Box::new(JsonFileStore::new(paths.proxies_file())),
            templates: NginxTemplates::new(config.templates_dir.clone()),
            restarter: Box::new(restarter),
            paths,
        })
    }

    pub fn new(paths: HerdPaths, store: Box<dyn ProxyStore>, restarter: Box<dyn Restarter>) -> Self {
        Self {
            paths,
            templates: NginxTemplates::builtin(),
            store,
            restarter,
        }
    }

    pub fn with_templates(mut self, templates: NginxTemplates) -> Self {
        self.templates = templates;
        self
    }

    /// Все прокси в порядке добавления
    pub fn list_proxies(&self) -> Result<Vec<ProxyRecord>> {
        Ok(self.store.load()?.records().cloned().collect())
    }

    pub fn create_proxy(&self, name: &str, port: i64) -> Result<ProxyRecord> {
        let result = self.try_create(name, port);
        PROXY_OPERATIONS
            .with_label_values(&["create", result_label(&result)])
            .inc();
        result
    }

    fn try_create(&self, name: &str, port: i64) -> Result<ProxyRecord> {
        let port = validate_proxy_input(name, port)?;

        let mut table = self.store.load()?;
        if table.contains(name) {
            return Err(HerdError::conflict("Proxy with this name already exists"));
        }

        let domain = format!("{}{}", name, PROXY_TLD);
        let config_path = self.paths.proxy_config(&domain);
        fs::write(&config_path, self.generate_proxy_nginx_configuration(&domain, port)?)?;

        let record = ProxyRecord {
            name: name.to_string(),
            domain,
            port,
            created_at: now_without_nanos(),
        };

        table.insert(record.clone());
        self.store.save(&table)?;
        self.restarter.submit();

        info!("Created proxy {} -> 127.0.0.1:{}", record.domain, record.port);
        Ok(record)
    }

    /// Удаляет прокси вместе с его конфигом nginx
    pub fn delete_proxy(&self, name: &str) -> Result<()> {
        let result = self.try_delete(name);
        PROXY_OPERATIONS
            .with_label_values(&["delete", result_label(&result)])
            .inc();
        result
    }

    fn try_delete(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(HerdError::invalid_input("Name is required"));
        }

        let mut table = self.store.load()?;
        if !table.contains(name) {
            return Err(HerdError::not_found("Proxy not found"));
        }

        // у неразобранной записи может не быть домена, тогда удаляется только запись
        let domain = table.domain(name);
        if let Some(domain) = &domain {
            let config_path = self.paths.proxy_config(domain);
            if config_path.exists() {
                fs::remove_file(&config_path)?;
            }
        }

        table.remove(name);
        self.store.save(&table)?;
        self.restarter.submit();

        info!("Deleted proxy {} ({})", name, domain.as_deref().unwrap_or("no domain"));
        Ok(())
    }

    pub fn generate_proxy_nginx_configuration(&self, domain: &str, port: u16) -> Result<String> {
        self.templates.render_proxy(domain, port)
    }
}
