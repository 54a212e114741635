use std::path::PathBuf;
use thiserror::Error;

/// Ошибки операций над сайтами и прокси
#[derive(Debug, Error)]
pub enum HerdError {
    /// Некорректные входные данные (имя, порт)
    #[error("{0}")]
    InvalidInput(String),

    /// Прокси с таким именем уже существует
    #[error("{0}")]
    Conflict(String),

    /// Запрошенная запись не найдена
    #[error("{0}")]
    NotFound(String),

    #[error("Failed to read template file: {}", path.display())]
    TemplateUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Ошибка рендеринга или запуска внешней команды
    #[error("Command error: {0}")]
    Command(String),
}

/// Категория ошибки для внешнего слоя (HTTP статус, код выхода CLI)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidInput,
    Conflict,
    NotFound,
    Internal,
}

impl HerdError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            HerdError::InvalidInput(_) => ErrorCategory::InvalidInput,
            HerdError::Conflict(_) => ErrorCategory::Conflict,
            HerdError::NotFound(_) => ErrorCategory::NotFound,
            _ => ErrorCategory::Internal,
        }
    }

    /// HTTP статус, соответствующий категории ошибки
    pub fn status_code(&self) -> u16 {
        match self.category() {
            ErrorCategory::InvalidInput => 400,
            ErrorCategory::Conflict => 409,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Internal => 500,
        }
    }

    /// Сообщение для пользователя: внутренние детали не раскрываются
    pub fn public_message(&self) -> String {
        match self.category() {
            ErrorCategory::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HerdError>;
