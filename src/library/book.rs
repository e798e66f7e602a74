//! Book types and structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Title stored when a record arrives without one
pub const UNTITLED: &str = "Untitled";

/// Author stored when a record arrives without one
pub const UNKNOWN_AUTHOR: &str = "Unknown author";

/// A stored book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Unique identifier, assigned at creation
    pub id: String,

    #[sqlx(flatten)]
    #[serde(flatten)]
    pub data: BookData,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything about a book except its identity and system timestamps.
///
/// This is the payload for both create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BookData {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub status: BookStatus,

    // Bibliographic
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    /// Display form "Last, First"
    #[serde(default)]
    pub author_last_first: Option<String>,
    #[serde(default)]
    pub translator: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub year_published: Option<i32>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub page_count: Option<i32>,
    #[serde(default)]
    pub isbn: Option<String>,

    // Personal
    #[serde(default)]
    pub location: Option<String>,
    /// `None` means unrated
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub current_page: Option<i32>,
    #[serde(default)]
    pub date_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_finished: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub wish_list: bool,
    #[serde(default)]
    pub previously_owned: bool,
    #[serde(default)]
    pub up_next: bool,

    #[serde(default)]
    pub cover_url: Option<String>,
}

impl BookData {
    /// Create a record with only the required fields set
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            status: BookStatus::default(),
            original_title: None,
            subtitle: None,
            author_last_first: None,
            translator: None,
            publisher: None,
            genre: None,
            category: None,
            description: None,
            published_date: None,
            year_published: None,
            language: None,
            page_count: None,
            isbn: None,
            location: None,
            rating: None,
            current_page: None,
            date_started: None,
            date_finished: None,
            notes: None,
            wish_list: false,
            previously_owned: false,
            up_next: false,
            cover_url: None,
        }
    }

    /// Replace blank required fields with their placeholders
    pub fn with_defaults(mut self) -> Self {
        if self.title.trim().is_empty() {
            self.title = UNTITLED.to_string();
        }
        if self.author.trim().is_empty() {
            self.author = UNKNOWN_AUTHOR.to_string();
        }
        self
    }

    /// Filter that identifies "the same book" for import deduplication.
    ///
    /// A non-empty ISBN match or an exact title + author match.
    pub fn dedup_filter(&self) -> BookFilter {
        let title_author = BookFilter::TitleAuthor {
            title: self.title.clone(),
            author: self.author.clone(),
        };

        match self.isbn.as_deref().map(str::trim).filter(|isbn| !isbn.is_empty()) {
            Some(isbn) => BookFilter::Any(vec![BookFilter::Isbn(isbn.to_string()), title_author]),
            None => title_author,
        }
    }
}

/// Reading status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum BookStatus {
    #[default]
    ToRead,
    Reading,
    Read,
    Completed,
    Dropped,
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::ToRead => "to-read",
            BookStatus::Reading => "reading",
            BookStatus::Read => "read",
            BookStatus::Completed => "completed",
            BookStatus::Dropped => "dropped",
        }
    }

    /// Parse the labels people actually type into spreadsheets.
    ///
    /// Returns `None` for anything unrecognised.
    pub fn parse_lenient(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase().replace(['_', ' '], "-");
        let status = match normalized.as_str() {
            "to-read" | "toread" | "unread" | "want-to-read" | "not-started" | "da-leggere"
            | "non-iniziato" | "non-letto" => BookStatus::ToRead,
            "reading" | "currently-reading" | "in-progress" | "in-corso" | "in-lettura" => {
                BookStatus::Reading
            }
            "read" | "letto" => BookStatus::Read,
            "completed" | "finished" | "done" | "completato" | "finito" => BookStatus::Completed,
            "dropped" | "abandoned" | "did-not-finish" | "dnf" | "abbandonato" => BookStatus::Dropped,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for BookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicates the store understands
#[derive(Debug, Clone, PartialEq)]
pub enum BookFilter {
    /// ISBN equality
    Isbn(String),
    /// Title and author both equal
    TitleAuthor { title: String, author: String },
    /// Location contains the substring
    LocationContains(String),
    /// Location is set and non-empty
    HasLocation,
    /// Location is null or empty
    MissingLocation,
    /// Any of the inner filters matches
    Any(Vec<BookFilter>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_lenient() {
        assert_eq!(BookStatus::parse_lenient("Unread"), Some(BookStatus::ToRead));
        assert_eq!(BookStatus::parse_lenient("to read"), Some(BookStatus::ToRead));
        assert_eq!(BookStatus::parse_lenient(" In Progress "), Some(BookStatus::Reading));
        assert_eq!(BookStatus::parse_lenient("READ"), Some(BookStatus::Read));
        assert_eq!(BookStatus::parse_lenient("completato"), Some(BookStatus::Completed));
        assert_eq!(BookStatus::parse_lenient("abandoned"), Some(BookStatus::Dropped));
        assert_eq!(BookStatus::parse_lenient("shelved"), None);
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        let json = serde_json::to_string(&BookStatus::ToRead).unwrap();
        assert_eq!(json, "\"to-read\"");
        assert_eq!(BookStatus::ToRead.to_string(), "to-read");
    }

    #[test]
    fn test_with_defaults() {
        let data = BookData::new("  ", "").with_defaults();
        assert_eq!(data.title, UNTITLED);
        assert_eq!(data.author, UNKNOWN_AUTHOR);

        let data = BookData::new("Dune", "Frank Herbert").with_defaults();
        assert_eq!(data.title, "Dune");
    }

    #[test]
    fn test_dedup_filter_ignores_blank_isbn() {
        let mut data = BookData::new("Dune", "Frank Herbert");
        data.isbn = Some("   ".to_string());
        assert_eq!(
            data.dedup_filter(),
            BookFilter::TitleAuthor {
                title: "Dune".to_string(),
                author: "Frank Herbert".to_string()
            }
        );

        data.isbn = Some("9780441013593".to_string());
        match data.dedup_filter() {
            BookFilter::Any(filters) => {
                assert_eq!(filters[0], BookFilter::Isbn("9780441013593".to_string()));
                assert_eq!(filters.len(), 2);
            }
            other => panic!("unexpected filter: {:?}", other),
        }
    }

    #[test]
    fn test_book_json_uses_camel_case() {
        let data = BookData::new("Dune", "Frank Herbert");
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["wishList"], false);
        assert_eq!(value["status"], "to-read");
        assert!(value["coverUrl"].is_null());
    }
}
