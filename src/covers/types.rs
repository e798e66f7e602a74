//! Cover lookup types

use serde::Serialize;
use std::fmt;

use crate::fetch::FetchError;
use crate::library::BookData;

/// External metadata services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    GoogleBooks,
    OpenLibrary,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::GoogleBooks => f.write_str("Google Books"),
            SourceKind::OpenLibrary => f.write_str("Open Library"),
        }
    }
}

/// Metadata source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The service refused because of quota or rate limiting
    #[error("{0} quota exceeded")]
    QuotaExceeded(SourceKind),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Malformed response from {kind}: {message}")]
    Malformed { kind: SourceKind, message: String },
}

/// One record returned by a metadata source
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    pub source: SourceKind,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub published_date: Option<String>,
    pub description: Option<String>,
    pub page_count: Option<i32>,
    pub categories: Vec<String>,
    pub isbn: Option<String>,
    pub cover_url: Option<String>,
}

impl VolumeInfo {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            title: None,
            authors: Vec::new(),
            publisher: None,
            published_date: None,
            description: None,
            page_count: None,
            categories: Vec::new(),
            isbn: None,
            cover_url: None,
        }
    }
}

/// Free-text search parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub title: String,
    pub author: Option<String>,
    pub limit: usize,
}

impl SearchQuery {
    pub fn new(title: impl Into<String>, author: Option<String>) -> Self {
        Self {
            title: title.into(),
            author,
            limit: 1,
        }
    }
}

/// What the cover resolver knows about a book
#[derive(Debug, Clone, PartialEq)]
pub struct CoverCandidate {
    pub title: String,
    pub author: Option<String>,
    pub isbn: Option<String>,
    /// URL provided by the user, e.g. a CSV "Cover URL" column
    pub supplied_url: Option<String>,
}

impl CoverCandidate {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: None,
            isbn: None,
            supplied_url: None,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = non_blank(Some(author.into()));
        self
    }

    pub fn with_isbn(mut self, isbn: impl Into<String>) -> Self {
        self.isbn = non_blank(Some(isbn.into()));
        self
    }

    pub fn with_supplied_url(mut self, url: impl Into<String>) -> Self {
        self.supplied_url = non_blank(Some(url.into()));
        self
    }

    pub fn from_book(book: &BookData) -> Self {
        Self {
            title: book.title.clone(),
            author: non_blank(Some(book.author.clone())),
            isbn: non_blank(book.isbn.clone()),
            supplied_url: non_blank(book.cover_url.clone()),
        }
    }

    /// Composite `isbn|title|author` cache key
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.isbn.as_deref().unwrap_or(""),
            self.title,
            self.author.as_deref().unwrap_or("")
        )
    }

    pub fn search_query(&self) -> SearchQuery {
        SearchQuery::new(self.title.clone(), self.author.clone())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Rewrite `http://` URLs returned by APIs to `https://`
pub fn upgrade_to_https(url: &str) -> String {
    match url.strip_prefix("http://") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    }
}
