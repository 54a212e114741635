use once_cell::sync::Lazy;
use regex::Regex;

/// `| name | (ignored) | url | path |` с произвольными пробелами
static LISTING_ROW_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\|\s+([a-z0-9.-]+)\s+\|\s+(\S*)\s+\|\s+(https?://\S+)\s+\|\s+([^|]+?)\s+\|")
        .expect("valid listing regex")
});

/// Строка таблицы `herd parked` / `herd links`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub name: String,
    pub url: String,
    pub path: String,
}

/// Результат построчного разбора: распознанные записи и число пропущенных строк
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult<T> {
    pub items: Vec<T>,
    pub skipped: usize,
}

impl<T> Default for ScanResult<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            skipped: 0,
        }
    }
}

impl<T> ScanResult<T> {
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> ScanResult<U> {
        ScanResult {
            items: self.items.into_iter().map(f).collect(),
            skipped: self.skipped,
        }
    }
}

/// Разбирает одну строку таблицы
pub fn parse_listing_line(line: &str) -> Option<ListingRow> {
    let cap = LISTING_ROW_REGEX.captures(line)?;

    Some(ListingRow {
        name: cap.get(1)?.as_str().trim().to_string(),
        url: cap.get(3)?.as_str().trim().to_string(),
        path: cap.get(4)?.as_str().trim().to_string(),
    })
}

/// Строки, не похожие на запись таблицы (рамки, заголовки, ошибки), пропускаются
pub fn scan_listing<I, S>(lines: I) -> ScanResult<ListingRow>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut result = ScanResult::default();

    for line in lines {
        match parse_listing_line(line.as_ref()) {
            Some(row) => result.items.push(row),
            None => result.skipped += 1,
        }
    }

    result
}
