use log::{debug, warn};
use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{HerdError, Result};
use crate::types::ProxyRecord;

/// Значение в реестре. Записи, которые не удалось разобрать, хранятся как есть
/// и записываются обратно без изменений.
#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Record(ProxyRecord),
    Raw(Value),
}

/// Содержимое реестра: имя прокси -> запись, в порядке добавления
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyTable {
    entries: Vec<(String, Entry)>,
}

impl ProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(key, _)| key == name)
    }

    pub fn get(&self, name: &str) -> Option<&ProxyRecord> {
        match &self.entries[self.position(name)?].1 {
            Entry::Record(record) => Some(record),
            Entry::Raw(_) => None,
        }
    }

    /// Есть ли ключ, включая записи, которые не удалось разобрать
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Домен записи; для неразобранной записи берется поле `domain`, если оно строка
    pub fn domain(&self, name: &str) -> Option<String> {
        match &self.entries[self.position(name)?].1 {
            Entry::Record(record) => Some(record.domain.clone()),
            Entry::Raw(value) => value.get("domain").and_then(Value::as_str).map(str::to_string),
        }
    }

    /// Добавляет запись в конец; существующий ключ заменяется на месте
    pub fn insert(&mut self, record: ProxyRecord) {
        match self.position(&record.name) {
            Some(index) => self.entries[index].1 = Entry::Record(record),
            None => self.entries.push((record.name.clone(), Entry::Record(record))),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Разобранные записи в порядке добавления
    pub fn records(&self) -> impl Iterator<Item = &ProxyRecord> {
        self.entries.iter().filter_map(|(_, entry)| match entry {
            Entry::Record(record) => Some(record),
            Entry::Raw(_) => None,
        })
    }

    /// Ключи записей, сохраненных без разбора
    pub fn unparsed(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Raw(_)))
            .map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ProxyTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, entry) in &self.entries {
            match entry {
                Entry::Record(record) => map.serialize_entry(key, record)?,
                Entry::Raw(value) => map.serialize_entry(key, value)?,
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProxyTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = ProxyTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object of proxy records keyed by name")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<ProxyTable, A::Error> {
                let mut table = ProxyTable::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    let entry = match ProxyRecord::deserialize(&value) {
                        Ok(record) => Entry::Record(record),
                        Err(e) => {
                            warn!("Keeping unreadable proxy record '{}' as is: {}", key, e);
                            Entry::Raw(value)
                        }
                    };
                    table.entries.retain(|(existing, _)| *existing != key);
                    table.entries.push((key, entry));
                }
                Ok(table)
            }

            // пустой реестр может быть записан как `[]`
            fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> std::result::Result<ProxyTable, A::Error> {
                if access.next_element::<IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_type(de::Unexpected::Seq, &self));
                }
                Ok(ProxyTable::new())
            }
        }

        deserializer.deserialize_any(TableVisitor)
    }
}

/// Хранилище реестра прокси
pub trait ProxyStore: Send + Sync {
    fn load(&self) -> Result<ProxyTable>;
    fn save(&self, table: &ProxyTable) -> Result<()>;
}

/// JSON файл, перезаписываемый целиком при каждом изменении.
/// Блокировок нет: параллельные изменения перетирают друг друга.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProxyStore for JsonFileStore {
    /// Отсутствующий файл или документ, который не является JSON объектом,
    /// читается как пустой реестр. Ошибка чтения файла возвращается.
    fn load(&self) -> Result<ProxyTable> {
        if !self.path.exists() {
            return Ok(ProxyTable::new());
        }

        let content = fs::read_to_string(&self.path)?;

        match serde_json::from_str::<ProxyTable>(&content) {
            Ok(table) => {
                debug!(
                    "Loaded {} proxy record(s) from {}, {} kept unparsed",
                    table.len(),
                    self.path.display(),
                    table.unparsed().count()
                );
                Ok(table)
            }
            Err(e) => {
                warn!("Ignoring malformed proxy registry {}: {}", self.path.display(), e);
                Ok(ProxyTable::new())
            }
        }
    }

    fn save(&self, table: &ProxyTable) -> Result<()> {
        let content = serde_json::to_string_pretty(table)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

fn lock_poisoned() -> HerdError {
    HerdError::Io(std::io::Error::other("proxy store lock poisoned"))
}

/// Реестр в памяти
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<ProxyTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProxyStore for MemoryStore {
    fn load(&self) -> Result<ProxyTable> {
        self.table.lock().map(|table| table.clone()).map_err(|_| lock_poisoned())
    }

    fn save(&self, table: &ProxyTable) -> Result<()> {
        let mut guard = self.table.lock().map_err(|_| lock_poisoned())?;
        *guard = table.clone();
        Ok(())
    }
}
