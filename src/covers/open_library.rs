//! Open Library books and search APIs

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::source::MetadataSource;
use super::types::{upgrade_to_https, SearchQuery, SourceError, SourceKind, VolumeInfo};
use crate::config::MetadataConfig;
use crate::fetch::{CallGate, FetchClient, FetchError, Throttle};

#[derive(Debug, Default, Deserialize)]
struct EditionData {
    title: Option<String>,
    subtitle: Option<String>,
    #[serde(default)]
    authors: Vec<Named>,
    #[serde(default)]
    publishers: Vec<Named>,
    publish_date: Option<String>,
    number_of_pages: Option<i32>,
    #[serde(default)]
    subjects: Vec<Named>,
    cover: Option<CoverLinks>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CoverLinks {
    small: Option<String>,
    medium: Option<String>,
    large: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    title: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    #[serde(default)]
    publisher: Vec<String>,
    first_publish_year: Option<i32>,
    number_of_pages_median: Option<i32>,
    cover_i: Option<i64>,
    #[serde(default)]
    isbn: Vec<String>,
}

/// Open Library client
pub struct OpenLibrary {
    client: FetchClient,
    throttle: Throttle,
    base_url: String,
    covers_url: String,
}

impl OpenLibrary {
    pub fn new(client: FetchClient, config: &MetadataConfig) -> Self {
        Self {
            client,
            throttle: Throttle::new(
                "open-library",
                Duration::from_millis(config.open_library_min_interval_ms),
            ),
            base_url: config.open_library_url.trim_end_matches('/').to_string(),
            covers_url: config.open_library_covers_url.trim_end_matches('/').to_string(),
        }
    }

    fn cover_for_id(&self, cover_id: i64) -> String {
        format!("{}/b/id/{}-M.jpg", self.covers_url, cover_id)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        gate: &dyn CallGate,
    ) -> Result<T, SourceError> {
        let response = self
            .client
            .fetch_gated(url, Some(&self.throttle), gate)
            .await
            .map_err(classify)?;

        response.json().map_err(|e| SourceError::Malformed {
            kind: SourceKind::OpenLibrary,
            message: e.to_string(),
        })
    }

    fn from_search_doc(&self, doc: SearchDoc) -> VolumeInfo {
        VolumeInfo {
            source: SourceKind::OpenLibrary,
            title: doc.title,
            authors: doc.author_name,
            publisher: doc.publisher.into_iter().next(),
            published_date: doc.first_publish_year.map(|y| y.to_string()),
            description: None,
            page_count: doc.number_of_pages_median,
            categories: Vec::new(),
            isbn: doc.isbn.into_iter().next(),
            cover_url: doc.cover_i.filter(|id| *id > 0).map(|id| self.cover_for_id(id)),
        }
    }
}

#[async_trait]
impl MetadataSource for OpenLibrary {
    fn kind(&self) -> SourceKind {
        SourceKind::OpenLibrary
    }

    async fn lookup_isbn(
        &self,
        isbn: &str,
        gate: &dyn CallGate,
    ) -> Result<Option<VolumeInfo>, SourceError> {
        let bibkey = format!("ISBN:{}", isbn);
        let url = format!(
            "{}/api/books?bibkeys={}&format=json&jscmd=data",
            self.base_url,
            urlencoding::encode(&bibkey)
        );

        let mut books: HashMap<String, EditionData> = self.get_json(&url, gate).await?;
        Ok(books.remove(&bibkey).map(|data| into_volume_info(data, isbn)))
    }

    async fn search(
        &self,
        query: &SearchQuery,
        gate: &dyn CallGate,
    ) -> Result<Vec<VolumeInfo>, SourceError> {
        let mut url = format!(
            "{}/search.json?title={}&limit={}",
            self.base_url,
            urlencoding::encode(&query.title),
            query.limit
        );
        if let Some(author) = &query.author {
            url.push_str("&author=");
            url.push_str(&urlencoding::encode(author));
        }

        let response: SearchResponse = self.get_json(&url, gate).await?;
        Ok(response
            .docs
            .into_iter()
            .map(|doc| self.from_search_doc(doc))
            .collect())
    }
}

fn classify(error: FetchError) -> SourceError {
    match error {
        FetchError::RateLimited { .. } => SourceError::QuotaExceeded(SourceKind::OpenLibrary),
        other => SourceError::Fetch(other),
    }
}

fn into_volume_info(data: EditionData, isbn: &str) -> VolumeInfo {
    let title = match (data.title, data.subtitle) {
        (Some(title), Some(subtitle)) if !subtitle.is_empty() => Some(format!("{}: {}", title, subtitle)),
        (title, _) => title,
    };

    let cover_url = data
        .cover
        .and_then(|c| c.medium.or(c.large).or(c.small))
        .map(|url| upgrade_to_https(&url));

    VolumeInfo {
        source: SourceKind::OpenLibrary,
        title,
        authors: data.authors.into_iter().map(|a| a.name).collect(),
        publisher: data.publishers.into_iter().next().map(|p| p.name),
        published_date: data.publish_date,
        description: None,
        page_count: data.number_of_pages,
        categories: data.subjects.into_iter().map(|s| s.name).take(5).collect(),
        isbn: Some(isbn.to_string()),
        cover_url,
    }
}
