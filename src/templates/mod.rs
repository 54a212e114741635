use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{HerdError, Result};
use crate::types::DesiredSite;

pub const SITE_TEMPLATE: &str = "site-nginx.conf";
pub const PROXY_TEMPLATE: &str = "proxy-nginx.conf";

const BUILTIN_SITE_TEMPLATE: &str = include_str!("../../templates/site-nginx.conf");
const BUILTIN_PROXY_TEMPLATE: &str = include_str!("../../templates/proxy-nginx.conf");

static SCHEME_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://").expect("valid scheme regex"));

/// Убирает `http://` или `https://` в начале URL
pub fn strip_scheme(url: &str) -> Cow<'_, str> {
    SCHEME_REGEX.replace(url, "")
}

/// Простая подстановка `{{KEY}}` без шаблонизатора
fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{}}}}}", key.to_uppercase()), value)
    })
}

/// Шаблоны nginx: из директории, если она задана, иначе встроенные
#[derive(Debug, Clone, Default)]
pub struct NginxTemplates {
    dir: Option<PathBuf>,
}

impl NginxTemplates {
    pub fn builtin() -> Self {
        Self { dir: None }
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Some(dir.into()) }
    }

    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Загружает шаблон по имени файла
    pub fn load(&self, name: &str) -> Result<Cow<'static, str>> {
        if let Some(dir) = &self.dir {
            let path = dir.join(name);
            return fs::read_to_string(&path)
                .map(Cow::Owned)
                .map_err(|source| HerdError::TemplateUnreadable { path, source });
        }

        match name {
            SITE_TEMPLATE => Ok(Cow::Borrowed(BUILTIN_SITE_TEMPLATE)),
            PROXY_TEMPLATE => Ok(Cow::Borrowed(BUILTIN_PROXY_TEMPLATE)),
            _ => Err(HerdError::TemplateUnreadable {
                path: PathBuf::from(name),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no built-in template"),
            }),
        }
    }

    /// server блок, открывающий сайт на `0.0.0.0:<port>`
    pub fn render_site(&self, site: &DesiredSite) -> Result<String> {
        let template = self.load(SITE_TEMPLATE)?;
        let domain = strip_scheme(&site.url);
        let port = site.port.to_string();
        Ok(substitute(&template, &[("PORT", port.as_str()), ("DOMAIN", domain.as_ref())]))
    }

    /// server блок, проксирующий `<domain>` на локальный порт
    pub fn render_proxy(&self, domain: &str, port: u16) -> Result<String> {
        let template = self.load(PROXY_TEMPLATE)?;
        let port = port.to_string();
        Ok(substitute(&template, &[("DOMAIN", domain), ("PORT", port.as_str())]))
    }
}

pub const RESTART_NGINX: &str = "restart_nginx";
pub const GET_LOCAL_IP: &str = "get_local_ip";
pub const NGINX_INCLUDE: &str = "nginx_include";

/// Шаблоны shell команд и служебных строк
#[derive(Debug, Clone)]
pub struct CommandTemplates {
    templates: HashMap<String, String>,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        let templates = [
            (
                RESTART_NGINX,
                "nohup sh -c 'PATH=\"{{HERD_BIN_PATH}}:$PATH\" herd restart nginx' > /dev/null 2>&1 &",
            ),
            (GET_LOCAL_IP, "ipconfig getifaddr en0 2>/dev/null"),
            (NGINX_INCLUDE, "    include {{CONFIG_FILE}};"),
        ]
        .into_iter()
        .map(|(name, template)| (name.to_string(), template.to_string()))
        .collect();

        Self { templates }
    }
}

impl CommandTemplates {
    /// Пустой набор без встроенных шаблонов
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Переопределяет шаблон (например, для тестов)
    pub fn with_template(mut self, name: &str, template: &str) -> Self {
        self.templates.insert(name.to_string(), template.to_string());
        self
    }

    fn template(&self, name: &str) -> Result<&str> {
        self.templates
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| HerdError::Command(format!("Template '{}' not found", name)))
    }

    pub fn render(&self, name: &str, values: &[(&str, &str)]) -> Result<String> {
        Ok(substitute(self.template(name)?, values))
    }

    /// Функция, строящая строку `include <file>;` для master конфига.
    /// Шаблон ищется один раз, до того как конфиг начнет меняться.
    pub fn include_directive(&self) -> Result<impl Fn(&str) -> String + '_> {
        let template = self.template(NGINX_INCLUDE)?;
        Ok(move |config_file: &str| substitute(template, &[("config_file", config_file)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn site(url: &str, port: u16) -> DesiredSite {
        DesiredSite {
            name: "test-site".to_string(),
            url: url.to_string(),
            port,
        }
    }

    #[test]
    fn test_render_site_configuration() {
        let config = NginxTemplates::builtin().render_site(&site("http://test-site.test", 8000)).unwrap();

        assert!(config.contains("listen 0.0.0.0:8000;"));
        assert!(config.contains("proxy_set_header Host test-site.test;"));
        assert!(config.contains("proxy_pass http://127.0.0.1:80;"));
        assert!(config.contains("proxy_set_header X-Forwarded-Host"));
        assert!(config.contains("proxy_set_header X-Forwarded-Proto"));
        assert!(config.contains("proxy_set_header X-Forwarded-For"));
        assert!(config.contains("proxy_set_header X-Forwarded-Port"));
        assert!(!config.contains("{{"));
    }

    #[test]
    fn test_render_site_strips_https() {
        let config = NginxTemplates::builtin().render_site(&site("https://test-site.test", 3000)).unwrap();

        assert!(config.contains("proxy_set_header Host test-site.test;"));
        assert!(config.contains("listen 0.0.0.0:3000;"));
        assert!(!config.contains("https://"));
    }

    #[test]
    fn test_render_proxy_configuration() {
        let config = NginxTemplates::builtin().render_proxy("test.test", 3000).unwrap();

        assert!(config.contains("listen 127.0.0.1:80;"));
        assert!(config.contains("server_name test.test www.test.test *.test.test"));
        assert!(config.contains("proxy_pass http://127.0.0.1:3000;"));
        assert!(config.contains("proxy_http_version 1.1;"));
        assert!(config.contains("proxy_set_header Upgrade $http_upgrade"));
        assert!(config.contains("proxy_set_header Connection 'upgrade'"));
        assert!(config.contains("proxy_set_header Host $host"));
        assert!(config.contains("proxy_set_header X-Real-IP $remote_addr"));
        assert!(config.contains("proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for"));
        assert!(config.contains("proxy_set_header X-Forwarded-Proto $scheme"));
        assert!(config.contains("proxy_read_timeout 86400"));
        assert!(config.contains("client_max_body_size 1024M"));
    }

    #[test]
    fn test_templates_from_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SITE_TEMPLATE), "listen {{PORT}} for {{DOMAIN}}").unwrap();

        let templates = NginxTemplates::from_dir(dir.path());
        let rendered = templates.render_site(&site("http://a.test", 9001)).unwrap();
        assert_eq!(rendered, "listen 9001 for a.test");

        let missing = templates.render_proxy("a.test", 3000);
        assert!(matches!(missing, Err(HerdError::TemplateUnreadable { .. })));
    }

    #[test]
    fn test_command_templates() {
        let commands = CommandTemplates::default();

        let include = commands.include_directive().unwrap();
        assert_eq!(include("blog-local.conf"), "    include blog-local.conf;");

        let restart = commands.render(RESTART_NGINX, &[("herd_bin_path", "/opt/herd/bin")]).unwrap();
        assert_eq!(
            restart,
            "nohup sh -c 'PATH=\"/opt/herd/bin:$PATH\" herd restart nginx' > /dev/null 2>&1 &"
        );

        assert!(commands.render("unknown", &[]).is_err());
    }

    #[test]
    fn test_missing_include_template_is_an_error() {
        let commands = CommandTemplates::new();
        assert!(matches!(commands.include_directive(), Err(HerdError::Command(_))));

        let custom = commands.with_template(NGINX_INCLUDE, "\tinclude {{CONFIG_FILE}};");
        assert_eq!(custom.include_directive().unwrap()("a-local.conf"), "\tinclude a-local.conf;");
    }

    #[test]
    fn test_strip_scheme_only_at_start() {
        assert_eq!(strip_scheme("http://a.test"), "a.test");
        assert_eq!(strip_scheme("a.test/http://b"), "a.test/http://b");
    }
}
