use log::{debug, warn};
use std::collections::HashMap;
use std::process::{Command, Stdio};

use crate::config::HerdPaths;
use crate::templates::{CommandTemplates, GET_LOCAL_IP};
use crate::types::SiteType;

const FALLBACK_IP: &str = "127.0.0.1";

/// Источник сырых строк со списком сайтов
pub trait SiteListing: Send + Sync {
    /// Строки вывода; пустой список, если команда завершилась с ошибкой
    fn listing_lines(&self, site_type: SiteType) -> Vec<String>;
}

/// Вызов `herd parked` / `herd links`
#[derive(Debug, Clone)]
pub struct HerdCli {
    paths: HerdPaths,
}

impl HerdCli {
    pub fn new(paths: HerdPaths) -> Self {
        Self { paths }
    }

    /// PATH с директорией bin Herd в начале
    fn search_path(&self) -> String {
        let bin_dir = self.paths.bin_dir();
        match std::env::var("PATH") {
            Ok(path) if !path.is_empty() => format!("{}:{}", bin_dir.display(), path),
            _ => bin_dir.display().to_string(),
        }
    }
}

impl SiteListing for HerdCli {
    fn listing_lines(&self, site_type: SiteType) -> Vec<String> {
        let executable = self.paths.herd_executable();
        let output = Command::new(&executable)
            .arg(site_type.listing_command())
            .env("PATH", self.search_path())
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let lines: Vec<String> = stdout.lines().map(str::to_string).collect();
                debug!("herd {} returned {} line(s)", site_type.listing_command(), lines.len());
                lines
            }
            Ok(output) => {
                warn!(
                    "herd {} exited with {}: {}",
                    site_type.listing_command(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to run {}: {}", executable.display(), e);
                Vec::new()
            }
        }
    }
}

/// Заранее заданный вывод листинга
#[derive(Debug, Clone, Default)]
pub struct StaticListing {
    outputs: HashMap<SiteType, Vec<String>>,
}

impl StaticListing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lines<I, S>(mut self, site_type: SiteType, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs
            .insert(site_type, lines.into_iter().map(Into::into).collect());
        self
    }
}

impl SiteListing for StaticListing {
    fn listing_lines(&self, site_type: SiteType) -> Vec<String> {
        self.outputs.get(&site_type).cloned().unwrap_or_default()
    }
}

/// Локальный IP адрес машины в сети, или 127.0.0.1
pub fn local_ip_address(commands: &CommandTemplates) -> String {
    let command = match commands.render(GET_LOCAL_IP, &[]) {
        Ok(command) => command,
        Err(e) => {
            warn!("{}", e);
            return FALLBACK_IP.to_string();
        }
    };

    let output = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();

    match output {
        Ok(output) => first_line(&String::from_utf8_lossy(&output.stdout))
            .unwrap_or_else(|| FALLBACK_IP.to_string()),
        Err(e) => {
            debug!("Failed to run '{}': {}", command, e);
            FALLBACK_IP.to_string()
        }
    }
}

fn first_line(output: &str) -> Option<String> {
    output
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_static_listing() {
        let listing = StaticListing::new().with_lines(SiteType::Parked, ["| a |  | http://a.test | /a |"]);

        assert_eq!(listing.listing_lines(SiteType::Parked).len(), 1);
        assert!(listing.listing_lines(SiteType::Linked).is_empty());
    }

    #[test]
    fn test_missing_herd_binary_yields_empty_listing() {
        let dir = tempdir().unwrap();
        let cli = HerdCli::new(HerdPaths::new(dir.path()));

        assert!(cli.listing_lines(SiteType::Parked).is_empty());
    }

    #[test]
    fn test_local_ip_uses_first_line() {
        let commands = CommandTemplates::default().with_template(GET_LOCAL_IP, "printf '192.168.1.20\\n10.0.0.1\\n'");
        assert_eq!(local_ip_address(&commands), "192.168.1.20");
    }

    #[test]
    fn test_local_ip_fallback() {
        let commands = CommandTemplates::default().with_template(GET_LOCAL_IP, "true");
        assert_eq!(local_ip_address(&commands), "127.0.0.1");
    }
}
