use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::PortCheckConfig;

/// Проверка, отвечает ли что-то на TCP порту
pub trait PortProbe: Send + Sync {
    fn is_open(&self, port: u16) -> bool;
}

/// Блокирующий connect с таймаутом
#[derive(Debug, Clone)]
pub struct TcpPortProbe {
    host: String,
    timeout: Duration,
}

impl TcpPortProbe {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }

    pub fn from_config(config: &PortCheckConfig) -> Self {
        Self::new(config.host.clone(), Duration::from_secs(config.timeout_secs))
    }
}

impl Default for TcpPortProbe {
    fn default() -> Self {
        Self::from_config(&PortCheckConfig::default())
    }
}

impl PortProbe for TcpPortProbe {
    fn is_open(&self, port: u16) -> bool {
        let addrs = match (self.host.as_str(), port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("Failed to resolve {}:{}: {}", self.host, port, e);
                return false;
            }
        };

        for addr in addrs {
            if TcpStream::connect_timeout(&addr, self.timeout).is_ok() {
                return true;
            }
        }
        false
    }
}

/// Порт допустим, если он в диапазоне 1..=65535
pub fn valid_port(port: i64) -> Option<u16> {
    if port < 1 {
        return None;
    }
    u16::try_from(port).ok()
}

/// Сводный статус портов после перезапуска nginx
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortsStatus {
    pub running: bool,
    #[serde(rename = "activePorts")]
    pub active: BTreeMap<u16, bool>,
    #[serde(rename = "inactivePorts")]
    pub inactive: BTreeMap<u16, bool>,
}

/// Проверки портов поверх `PortProbe`. Порты проверяются последовательно.
pub struct PortChecker {
    probe: Box<dyn PortProbe>,
}

impl PortChecker {
    pub fn new(probe: Box<dyn PortProbe>) -> Self {
        Self { probe }
    }

    /// Порт свободен, если на нем никто не слушает
    pub fn is_port_available(&self, port: u16) -> bool {
        !self.probe.is_open(port)
    }

    /// Как `is_port_available`, но для непроверенного ввода: вне диапазона всегда false
    pub fn check_port_availability(&self, port: i64) -> bool {
        match valid_port(port) {
            Some(port) => self.is_port_available(port),
            None => false,
        }
    }

    /// true для портов, на которых что-то слушает
    pub fn check_active_ports_status(&self, ports: &[u16]) -> BTreeMap<u16, bool> {
        ports.iter().map(|&port| (port, self.probe.is_open(port))).collect()
    }

    /// true для портов, на которых никто не слушает
    pub fn check_inactive_ports_status(&self, ports: &[u16]) -> BTreeMap<u16, bool> {
        ports.iter().map(|&port| (port, !self.probe.is_open(port))).collect()
    }

    /// Система готова, если все активные порты отвечают, а неактивные молчат
    pub fn ports_status(&self, active: &[u16], inactive: &[u16]) -> PortsStatus {
        let active = self.check_active_ports_status(active);
        let inactive = self.check_inactive_ports_status(inactive);
        let running = active.values().all(|&up| up) && inactive.values().all(|&down| down);

        PortsStatus {
            running,
            active,
            inactive,
        }
    }
}

impl Default for PortChecker {
    fn default() -> Self {
        Self::new(Box::new(TcpPortProbe::default()))
    }
}

/// Фиксированный набор открытых портов для тестов и dry-run
#[derive(Debug, Clone, Default)]
pub struct StaticPortProbe {
    open: Vec<u16>,
}

impl StaticPortProbe {
    pub fn with_open_ports(open: &[u16]) -> Self {
        Self { open: open.to_vec() }
    }
}

impl PortProbe for StaticPortProbe {
    fn is_open(&self, port: u16) -> bool {
        self.open.contains(&port)
    }
}
