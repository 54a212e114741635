use log::{debug, info, warn};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::config::HerdPaths;
use crate::error::Result;
use crate::metrics::RESTARTS_SUBMITTED;
use crate::templates::{CommandTemplates, RESTART_NGINX};

/// Результат постановки перезапуска. Завершение перезапуска не отслеживается:
/// здесь нет handle, который можно было бы дождаться.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartSubmission {
    /// Процесс запущен в фоне
    Detached { pid: u32 },
    /// Перезапуск записан без запуска процесса
    Recorded,
    /// Процесс не удалось запустить
    SpawnFailed(String),
}

/// Перезапуск веб-сервера в режиме fire-and-forget
pub trait Restarter: Send + Sync {
    fn submit(&self) -> RestartSubmission;
}

/// Запускает shell команду перезапуска и не ждет ее завершения
#[derive(Debug, Clone)]
pub struct DetachedRestart {
    command: String,
}

impl DetachedRestart {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// `herd restart nginx` через nohup с PATH, указывающим на bin Herd
    pub fn for_herd(paths: &HerdPaths, commands: &CommandTemplates) -> Result<Self> {
        let bin_dir = paths.bin_dir().to_string_lossy().into_owned();
        let command = commands.render(RESTART_NGINX, &[("herd_bin_path", bin_dir.as_str())])?;
        Ok(Self::new(command))
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Restarter for DetachedRestart {
    fn submit(&self) -> RestartSubmission {
        let spawned = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                let pid = child.id();
                RESTARTS_SUBMITTED.inc();
                info!("Restart submitted (pid {})", pid);

                // Завершившийся shell забирается в фоне, чтобы не оставлять зомби
                let reaper = thread::Builder::new()
                    .name("restart-reaper".to_string())
                    .spawn(move || {
                        if let Err(e) = child.wait() {
                            debug!("Failed to reap restart process {}: {}", pid, e);
                        }
                    });
                if let Err(e) = reaper {
                    warn!("Failed to start reaper for restart process {}: {}", pid, e);
                }

                RestartSubmission::Detached { pid }
            }
            Err(e) => {
                warn!("Failed to launch restart command: {}", e);
                RestartSubmission::SpawnFailed(e.to_string())
            }
        }
    }
}

/// Считает вызовы вместо запуска процесса
#[derive(Debug, Clone, Default)]
pub struct RecordingRestarter {
    count: Arc<AtomicUsize>,
}

impl RecordingRestarter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Restarter for RecordingRestarter {
    fn submit(&self) -> RestartSubmission {
        self.count.fetch_add(1, Ordering::SeqCst);
        RestartSubmission::Recorded
    }
}
