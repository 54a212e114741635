use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Строка master конфига, после которой вставляются новые include
pub const INCLUDE_ANCHOR: &str = "include herd.conf;";

/// Суффикс файлов конфигурации открытых сайтов
pub const SITE_CONFIG_SUFFIX: &str = "-local.conf";

static SITE_INCLUDE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z0-9-]+-local\.conf)").expect("valid include regex"));

static LISTEN_PORT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"listen 0\.0\.0\.0:(\d+);").expect("valid listen regex"));

/// Имя файла конфигурации сайта
pub fn site_config_file_name(site_name: &str) -> String {
    format!("{}{}", site_name, SITE_CONFIG_SUFFIX)
}

/// Проверяет, что имя файла подходит под `*-local.conf`
pub fn is_site_config_file_name(file_name: &str) -> bool {
    file_name.ends_with(SITE_CONFIG_SUFFIX)
}

/// Извлекает порт из директивы `listen 0.0.0.0:<port>;`
pub fn parse_listen_port(content: &str) -> Option<u16> {
    LISTEN_PORT_REGEX
        .captures(content)
        .and_then(|cap| cap.get(1))
        .and_then(|port| port.as_str().parse::<u16>().ok())
}

/// Набор файлов конфигурации, которые должны существовать после применения.
/// Порядок соответствует порядку сайтов, дубликаты схлопываются.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveConfigSet {
    files: Vec<String>,
}

impl ActiveConfigSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_site_names<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut set = Self::new();
        for name in names {
            set.insert(site_config_file_name(name));
        }
        set
    }

    pub fn insert(&mut self, file_name: String) -> bool {
        if self.contains(&file_name) {
            return false;
        }
        self.files.push(file_name);
        true
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.files.iter().any(|f| f == file_name)
    }

    fn remove(&mut self, file_name: &str) {
        self.files.retain(|f| f != file_name);
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Результат сверки master конфига
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// include строки, оставленные на своих местах
    pub kept: Vec<String>,
    /// include строки, удаленные как устаревшие или повторные
    pub dropped: Vec<String>,
    /// include строки, вставленные после якоря
    pub inserted: Vec<String>,
    pub anchor_found: bool,
    /// Активные файлы, которые не попали в конфиг из-за отсутствия якоря
    pub pending_without_anchor: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.dropped.is_empty() && self.inserted.is_empty()
    }
}

/// Master конфиг nginx как упорядоченная последовательность строк
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterConfig {
    lines: Vec<String>,
}

impl MasterConfig {
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.split('\n').map(str::to_string).collect(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_content())?;
        Ok(())
    }

    pub fn to_content(&self) -> String {
        self.lines.join("\n")
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn has_anchor(&self) -> bool {
        self.lines.iter().any(|line| line.contains(INCLUDE_ANCHOR))
    }

    /// Имена файлов сайтов, подключенных через include, в порядке появления
    pub fn included_site_configs(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter_map(|line| SITE_INCLUDE_REGEX.captures(line))
            .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    /// Приводит список include к набору `active`.
    ///
    /// Строка с именем файла сайта остается, если файл активен и еще не встречался,
    /// иначе удаляется. Все остальные строки сохраняются в исходном порядке.
    /// После первой строки с якорем вставляются include для активных файлов,
    /// которые не были подключены выше. Без якоря такие файлы не вставляются.
    pub fn reconcile<F>(&mut self, active: &ActiveConfigSet, render_include: F) -> ReconcileReport
    where
        F: Fn(&str) -> String,
    {
        let mut pending = active.clone();
        let mut report = ReconcileReport::default();
        let mut output = Vec::with_capacity(self.lines.len() + pending.len());

        for line in self.lines.drain(..) {
            let include = SITE_INCLUDE_REGEX
                .captures(&line)
                .and_then(|cap| cap.get(1))
                .map(|m| m.as_str().to_string());

            if let Some(file_name) = include {
                if pending.contains(&file_name) {
                    pending.remove(&file_name);
                    report.kept.push(file_name);
                    output.push(line);
                } else {
                    debug!("Dropping include line for {}", file_name);
                    report.dropped.push(file_name);
                }
                continue;
            }

            let is_anchor = !report.anchor_found && line.contains(INCLUDE_ANCHOR);
            output.push(line);

            if is_anchor {
                report.anchor_found = true;
                for file_name in pending.iter() {
                    output.push(render_include(file_name));
                    report.inserted.push(file_name.to_string());
                }
                pending = ActiveConfigSet::new();
            }
        }

        if !pending.is_empty() {
            report.pending_without_anchor = pending.iter().map(str::to_string).collect();
        }

        self.lines = output;
        report
    }
}

/// Читает master конфиг, сверяет include с активным набором и перезаписывает файл
pub fn reconcile_master_config<P, F>(
    path: P,
    active: &ActiveConfigSet,
    render_include: F,
) -> Result<ReconcileReport>
where
    P: AsRef<Path>,
    F: Fn(&str) -> String,
{
    let path = path.as_ref();
    let mut master = MasterConfig::load(path)?;
    let report = master.reconcile(active, render_include);
    master.save(path)?;

    if !report.pending_without_anchor.is_empty() {
        warn!(
            "Anchor '{}' not found in {}, {} site(s) left without include: {}",
            INCLUDE_ANCHOR,
            path.display(),
            report.pending_without_anchor.len(),
            report.pending_without_anchor.join(", ")
        );
    }

    info!(
        "Reconciled {}: kept {}, dropped {}, inserted {}",
        path.display(),
        report.kept.len(),
        report.dropped.len(),
        report.inserted.len()
    );

    Ok(report)
}
