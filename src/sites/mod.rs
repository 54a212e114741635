use log::{debug, error, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{
    is_site_config_file_name, parse_listen_port, reconcile_master_config, ActiveConfigSet, Config, HerdPaths,
    ReconcileReport,
};
use crate::error::{HerdError, Result};
use crate::herd::{local_ip_address, HerdCli, SiteListing};
use crate::listing::{scan_listing, ScanResult};
use crate::metrics::APPLY_TOTAL;
use crate::ports::{PortChecker, PortProbe, TcpPortProbe};
use crate::restart::{DetachedRestart, RestartSubmission, Restarter};
use crate::templates::{CommandTemplates, NginxTemplates};
use crate::types::{DesiredSite, SiteRecord, SiteType, DEFAULT_SITE_PORT};

/// Шаги применения в порядке выполнения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStep {
    ComputeActiveSet,
    WriteSiteConfigs,
    RemoveStaleConfigs,
    ReconcileMaster,
    SubmitRestart,
}

impl ApplyStep {
    pub const ALL: [ApplyStep; 5] = [
        ApplyStep::ComputeActiveSet,
        ApplyStep::WriteSiteConfigs,
        ApplyStep::RemoveStaleConfigs,
        ApplyStep::ReconcileMaster,
        ApplyStep::SubmitRestart,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum StepStatus {
    Done,
    Failed(String),
    /// Не выполнялся из-за ошибки на предыдущем шаге
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: ApplyStep,
    #[serde(flatten)]
    pub status: StepStatus,
}

/// Пошаговый результат `apply`. Отката нет: шаги до ошибки остаются выполненными.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub steps: Vec<StepOutcome>,
    #[serde(skip)]
    pub reconcile: Option<ReconcileReport>,
}

impl ApplyReport {
    fn done(&mut self, step: ApplyStep) {
        self.steps.push(StepOutcome {
            step,
            status: StepStatus::Done,
        });
    }

    /// Отмечает шаг как проваленный, а все последующие как пропущенные
    fn fail(mut self, step: ApplyStep, err: HerdError) -> Self {
        error!("Apply step {:?} failed: {}", step, err);
        self.steps.push(StepOutcome {
            step,
            status: StepStatus::Failed(err.to_string()),
        });

        for later in ApplyStep::ALL.iter().skip_while(|s| **s != step).skip(1) {
            self.steps.push(StepOutcome {
                step: *later,
                status: StepStatus::Skipped,
            });
        }

        APPLY_TOTAL.with_label_values(&["failure"]).inc();
        self
    }

    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Done)
    }

    pub fn failed_step(&self) -> Option<ApplyStep> {
        self.steps
            .iter()
            .find(|s| matches!(s.status, StepStatus::Failed(_)))
            .map(|s| s.step)
    }
}

/// Управление открытием локальных сайтов Herd наружу
pub struct SiteManager {
    paths: HerdPaths,
    default_port: u16,
    templates: NginxTemplates,
    commands: CommandTemplates,
    listing: Box<dyn SiteListing>,
    restarter: Box<dyn Restarter>,
    ports: PortChecker,
}

impl SiteManager {
    /// Менеджер с внешними командами Herd и TCP проверкой портов
    pub fn from_config(config: &Config) -> Result<Self> {
        let paths = config.paths();
        let commands = CommandTemplates::default();
        let restarter = DetachedRestart::for_herd(&paths, &commands)?;

        Ok(Self {
            listing: Box::new(HerdCli::new(paths.clone())),
            restarter: Box::new(restarter),
            ports: PortChecker::new(Box::new(TcpPortProbe::from_config(&config.port_check))),
            templates: NginxTemplates::new(config.templates_dir.clone()),
            default_port: config.default_port,
            commands,
            paths,
        })
    }

    /// Менеджер со встроенными шаблонами; коллабораторы задаются через `with_*`
    pub fn new(paths: HerdPaths, listing: Box<dyn SiteListing>, restarter: Box<dyn Restarter>) -> Self {
        Self {
            paths,
            default_port: DEFAULT_SITE_PORT,
            templates: NginxTemplates::builtin(),
            commands: CommandTemplates::default(),
            listing,
            restarter,
            ports: PortChecker::default(),
        }
    }

    pub fn with_port_probe(mut self, probe: Box<dyn PortProbe>) -> Self {
        self.ports = PortChecker::new(probe);
        self
    }

    pub fn with_templates(mut self, templates: NginxTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_commands(mut self, commands: CommandTemplates) -> Self {
        self.commands = commands;
        self
    }

    pub fn paths(&self) -> &HerdPaths {
        &self.paths
    }

    pub fn ports(&self) -> &PortChecker {
        &self.ports
    }

    /// Все сайты (parked и linked), отсортированные по имени
    pub fn list_sites(&self) -> Vec<SiteRecord> {
        let mut sites = Vec::new();
        let mut skipped = 0;

        for site_type in [SiteType::Parked, SiteType::Linked] {
            let lines = self.listing.listing_lines(site_type);
            let parsed = self.parse_sites_list(&lines, site_type);
            skipped += parsed.skipped;
            sites.extend(parsed.items);
        }

        sites.sort_by(|a, b| a.name.cmp(&b.name));
        info!("Listed {} site(s), skipped {} line(s)", sites.len(), skipped);
        sites
    }

    /// Разбирает вывод листинга и дополняет записи состоянием с диска
    pub fn parse_sites_list<S: AsRef<str>>(&self, lines: &[S], site_type: SiteType) -> ScanResult<SiteRecord> {
        scan_listing(lines).map(|row| {
            let config_path = self.configuration_path(&row.name);
            let exposed = config_path.exists();
            let port = if exposed {
                self.port_from_configuration(&config_path)
            } else {
                self.default_port
            };

            SiteRecord {
                name: row.name,
                url: row.url,
                path: row.path,
                exposed,
                port,
                site_type,
            }
        })
    }

    pub fn configuration_path(&self, site_name: &str) -> PathBuf {
        self.paths.site_config(site_name)
    }

    fn port_from_configuration(&self, path: &Path) -> u16 {
        match fs::read_to_string(path) {
            Ok(content) => parse_listen_port(&content).unwrap_or(self.default_port),
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                self.default_port
            }
        }
    }

    pub fn check_port_availability(&self, port: i64) -> bool {
        self.ports.check_port_availability(port)
    }

    pub fn local_ip_address(&self) -> String {
        local_ip_address(&self.commands)
    }

    pub fn generate_nginx_configuration(&self, site: &DesiredSite) -> Result<String> {
        self.templates.render_site(site)
    }

    /// Применяет набор открытых сайтов и возвращает итог по шагам
    pub fn apply(&self, sites: &[DesiredSite]) -> ApplyReport {
        let mut report = ApplyReport::default();

        let active = match active_config_set(sites) {
            Ok(active) => active,
            Err(e) => return report.fail(ApplyStep::ComputeActiveSet, e),
        };
        report.done(ApplyStep::ComputeActiveSet);

        if let Err(e) = self.write_site_configurations(sites) {
            return report.fail(ApplyStep::WriteSiteConfigs, e);
        }
        report.done(ApplyStep::WriteSiteConfigs);

        if let Err(e) = self.remove_inactive_configurations(&active) {
            return report.fail(ApplyStep::RemoveStaleConfigs, e);
        }
        report.done(ApplyStep::RemoveStaleConfigs);

        match self.update_main_nginx_configuration(&active) {
            Ok(reconcile) => report.reconcile = Some(reconcile),
            Err(e) => return report.fail(ApplyStep::ReconcileMaster, e),
        }
        report.done(ApplyStep::ReconcileMaster);

        if let RestartSubmission::SpawnFailed(e) = self.restarter.submit() {
            debug!("Restart not launched: {}", e);
        }
        report.done(ApplyStep::SubmitRestart);

        APPLY_TOTAL.with_label_values(&["success"]).inc();
        info!("Applied {} exposed site(s)", active.len());
        report
    }

    /// true, если все шаги выполнены
    pub fn apply_changes(&self, sites: &[DesiredSite]) -> bool {
        self.apply(sites).is_success()
    }

    fn write_site_configurations(&self, sites: &[DesiredSite]) -> Result<()> {
        for site in sites {
            let path = self.configuration_path(&site.name);
            let content = self.generate_nginx_configuration(site)?;
            fs::write(&path, content)?;
            debug!("Wrote {}", path.display());
        }
        Ok(())
    }

    /// Удаляет `*-local.conf`, которых нет в активном наборе
    pub fn remove_inactive_configurations(&self, active: &ActiveConfigSet) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        let nginx_dir = self.paths.nginx_dir();
        if !nginx_dir.is_dir() {
            return Ok(removed);
        }

        for entry in fs::read_dir(&nginx_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };

            if !is_site_config_file_name(file_name) || active.contains(file_name) {
                continue;
            }

            fs::remove_file(entry.path())?;
            info!("Removed stale site config {}", file_name);
            removed.push(entry.path());
        }

        Ok(removed)
    }

    pub fn update_main_nginx_configuration(&self, active: &ActiveConfigSet) -> Result<ReconcileReport> {
        let render_include = self.commands.include_directive()?;
        reconcile_master_config(self.paths.master_config(), active, render_include)
    }
}

/// Имена файлов конфигурации для набора сайтов.
/// Пустые имена и имена с разделителем пути отклоняются.
pub fn active_config_set(sites: &[DesiredSite]) -> Result<ActiveConfigSet> {
    for site in sites {
        let name = site.name.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
            return Err(HerdError::invalid_input(format!("Invalid site name: '{}'", name)));
        }
    }

    Ok(ActiveConfigSet::from_site_names(sites.iter().map(|s| s.name.as_str())))
}
