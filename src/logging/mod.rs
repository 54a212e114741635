use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Инициализирует систему логирования.
///
/// Логи пишутся в stderr, чтобы не смешиваться с JSON выводом команд.
/// Записи `log` из модулей попадают в тот же subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    let result = if config.format == "json" {
        // JSON формат для сбора логов
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(false)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
    };

    match result {
        Ok(_) => {
            info!("Logging initialized with level: {}, format: {}", config.level, config.format);
        }
        Err(_) => {
            // Логгер уже установлен, используем существующий
            eprintln!("Global logger already set, using existing configuration");
        }
    }

    Ok(())
}
