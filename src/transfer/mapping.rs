//! CSV row mapping
//!
//! One ordered table links the human-readable CSV headers to book fields and
//! drives both directions. Import coercion is forgiving: unparseable numbers
//! and dates become absent, unknown booleans become false.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;

use crate::library::{BookData, BookStatus};

/// A CSV row keyed by header
pub type CsvRow = HashMap<String, String>;

/// Book fields reachable from CSV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Author,
    Status,
    OriginalTitle,
    Subtitle,
    AuthorLastFirst,
    Translator,
    Publisher,
    Genre,
    Description,
    YearPublished,
    Language,
    PageCount,
    Rating,
    Location,
    DateStarted,
    DateFinished,
    CurrentPage,
    Notes,
    Category,
    WishList,
    PreviouslyOwned,
    UpNext,
    Isbn,
    CoverUrl,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub header: &'static str,
    pub field: Field,
}

const fn col(header: &'static str, field: Field) -> Column {
    Column { header, field }
}

/// Export column order
pub const COLUMNS: &[Column] = &[
    col("Title", Field::Title),
    col("Author", Field::Author),
    col("Status", Field::Status),
    col("Original Title", Field::OriginalTitle),
    col("Subtitle", Field::Subtitle),
    col("Author (Last, First)", Field::AuthorLastFirst),
    col("Translator", Field::Translator),
    col("Publisher", Field::Publisher),
    col("Genre", Field::Genre),
    col("Summary", Field::Description),
    col("Year Published", Field::YearPublished),
    col("Language", Field::Language),
    col("Number of Pages", Field::PageCount),
    col("Rating", Field::Rating),
    col("Physical Location", Field::Location),
    col("Date Started", Field::DateStarted),
    col("Date Finished", Field::DateFinished),
    col("Current Page", Field::CurrentPage),
    col("Notes", Field::Notes),
    col("Category", Field::Category),
    col("Wish List", Field::WishList),
    col("Previously Owned", Field::PreviouslyOwned),
    col("Up Next", Field::UpNext),
    col("ISBN", Field::Isbn),
    col("Cover URL", Field::CoverUrl),
];

/// CSV header row
pub fn headers() -> impl Iterator<Item = &'static str> {
    COLUMNS.iter().map(|c| c.header)
}

/// Values applied to fields a row leaves blank
#[derive(Debug, Clone)]
pub struct MappingDefaults {
    pub language: String,
}

impl Default for MappingDefaults {
    fn default() -> Self {
        Self {
            language: "Italiano".to_string(),
        }
    }
}

/// True when every cell is blank
pub fn is_blank_row(row: &CsvRow) -> bool {
    row.values().all(|v| v.trim().is_empty())
}

/// Map a row with the default language
pub fn row_to_book(row: &CsvRow) -> BookData {
    row_to_book_with(row, &MappingDefaults::default())
}

/// Map a row to a book. Never fails; see the module docs for coercion rules.
pub fn row_to_book_with(row: &CsvRow, defaults: &MappingDefaults) -> BookData {
    let mut book = BookData::new("", "");

    for column in COLUMNS {
        if let Some(raw) = row.get(column.header) {
            apply(&mut book, column.field, raw.trim());
        }
    }

    if book.language.is_none() && !defaults.language.is_empty() {
        book.language = Some(defaults.language.clone());
    }

    book.with_defaults()
}

/// Values in [`COLUMNS`] order, ready for a CSV writer
pub fn book_to_record(book: &BookData) -> Vec<String> {
    COLUMNS.iter().map(|c| render(book, c.field)).collect()
}

/// Inverse of [`row_to_book`]; absent fields become empty strings
pub fn book_to_row(book: &BookData) -> CsvRow {
    COLUMNS
        .iter()
        .map(|c| (c.header.to_string(), render(book, c.field)))
        .collect()
}

fn apply(book: &mut BookData, field: Field, raw: &str) {
    let text = || (!raw.is_empty()).then(|| raw.to_string());

    match field {
        Field::Title => book.title = raw.to_string(),
        Field::Author => book.author = raw.to_string(),
        Field::Status => book.status = BookStatus::parse_lenient(raw).unwrap_or_default(),
        Field::OriginalTitle => book.original_title = text(),
        Field::Subtitle => book.subtitle = text(),
        Field::AuthorLastFirst => book.author_last_first = text(),
        Field::Translator => book.translator = text(),
        Field::Publisher => book.publisher = text(),
        Field::Genre => book.genre = text(),
        Field::Description => book.description = text(),
        Field::YearPublished => book.year_published = parse_integer(raw),
        Field::Language => book.language = text(),
        Field::PageCount => book.page_count = parse_integer(raw).filter(|n| *n >= 0),
        Field::Rating => book.rating = parse_number(raw),
        Field::Location => book.location = text(),
        Field::DateStarted => book.date_started = parse_date(raw),
        Field::DateFinished => book.date_finished = parse_date(raw),
        Field::CurrentPage => book.current_page = parse_integer(raw).filter(|n| *n >= 0),
        Field::Notes => book.notes = text(),
        Field::Category => book.category = text(),
        Field::WishList => book.wish_list = parse_bool(raw),
        Field::PreviouslyOwned => book.previously_owned = parse_bool(raw),
        Field::UpNext => book.up_next = parse_bool(raw),
        Field::Isbn => book.isbn = text(),
        Field::CoverUrl => book.cover_url = text(),
    }
}

fn render(book: &BookData, field: Field) -> String {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    let int = |value: Option<i32>| value.map(|n| n.to_string()).unwrap_or_default();

    match field {
        Field::Title => book.title.clone(),
        Field::Author => book.author.clone(),
        Field::Status => book.status.as_str().to_string(),
        Field::OriginalTitle => text(&book.original_title),
        Field::Subtitle => text(&book.subtitle),
        Field::AuthorLastFirst => text(&book.author_last_first),
        Field::Translator => text(&book.translator),
        Field::Publisher => text(&book.publisher),
        Field::Genre => text(&book.genre),
        Field::Description => text(&book.description),
        Field::YearPublished => int(book.year_published.or_else(|| {
            book.published_date.as_deref().and_then(leading_year)
        })),
        Field::Language => text(&book.language),
        Field::PageCount => int(book.page_count),
        Field::Rating => book.rating.map(format_number).unwrap_or_default(),
        Field::Location => text(&book.location),
        Field::DateStarted => book.date_started.map(format_date).unwrap_or_default(),
        Field::DateFinished => book.date_finished.map(format_date).unwrap_or_default(),
        Field::CurrentPage => int(book.current_page),
        Field::Notes => text(&book.notes),
        Field::Category => text(&book.category),
        Field::WishList => format_bool(book.wish_list),
        Field::PreviouslyOwned => format_bool(book.previously_owned),
        Field::UpNext => format_bool(book.up_next),
        Field::Isbn => text(&book.isbn),
        Field::CoverUrl => text(&book.cover_url),
    }
}

/// `true/yes/y/1/si/sì`, any case; everything else is false
pub fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "true" | "yes" | "y" | "1" | "si" | "sì"
    )
}

pub fn format_bool(value: bool) -> String {
    let label = if value { "Yes" } else { "No" };
    label.to_string()
}

/// Finite decimal number, or `None`
pub fn parse_number(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.replace(',', ".").parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Integral number that fits an `i32`; `"320.0"` is accepted
pub fn parse_integer(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i32>() {
        return Some(n);
    }
    let n = parse_number(raw)?;
    (n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64).then(|| n as i32)
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{:.0}", n)
    } else {
        n.to_string()
    }
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parse the date shapes found in spreadsheet exports, as UTC midnight
/// when no time is given
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }

    // A bare year
    if raw.len() == 4 {
        if let Ok(year) = raw.parse::<i32>() {
            return NaiveDate::from_ymd_opt(year, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }

    None
}

pub fn format_date(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%d").to_string()
}

fn leading_year(date: &str) -> Option<i32> {
    date.get(..4)
        .filter(|y| y.chars().all(|c| c.is_ascii_digit()))
        .and_then(|y| y.parse().ok())
}
