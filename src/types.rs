use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Порт по умолчанию для сайта без собственного конфига
pub const DEFAULT_SITE_PORT: u16 = 8000;

/// Источник сайта в Herd
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteType {
    Parked,
    Linked,
}

impl SiteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteType::Parked => "parked",
            SiteType::Linked => "linked",
        }
    }

    /// Подкоманда herd, которая выводит сайты этого типа
    pub fn listing_command(&self) -> &'static str {
        match self {
            SiteType::Parked => "parked",
            SiteType::Linked => "links",
        }
    }
}

/// Сайт, найденный в выводе herd
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub name: String,
    pub url: String,
    pub path: String,
    pub exposed: bool,
    pub port: u16,
    #[serde(rename = "type")]
    pub site_type: SiteType,
}

/// Сайт, который клиент хочет открыть наружу
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredSite {
    pub name: String,
    pub url: String,
    pub port: u16,
}

impl From<&SiteRecord> for DesiredSite {
    fn from(site: &SiteRecord) -> Self {
        Self {
            name: site.name.clone(),
            url: site.url.clone(),
            port: site.port,
        }
    }
}

/// Запись реестра прокси
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub name: String,
    pub domain: String,
    pub port: u16,
    #[serde(with = "created_at_format")]
    pub created_at: NaiveDateTime,
}

mod created_at_format {
    use chrono::{DateTime, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    /// Форматы, которые принимаются при чтении; запись всегда в `FORMAT`
    const ACCEPTED: [&str; 2] = [FORMAT, "%Y-%m-%dT%H:%M:%S"];

    fn parse(raw: &str) -> Option<NaiveDateTime> {
        ACCEPTED
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))
    }

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("unsupported created_at '{}'", raw)))
    }
}
