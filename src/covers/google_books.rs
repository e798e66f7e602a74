//! Google Books volumes API

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::source::MetadataSource;
use super::types::{upgrade_to_https, SearchQuery, SourceError, SourceKind, VolumeInfo};
use crate::config::MetadataConfig;
use crate::fetch::{CallGate, FetchClient, FetchError, Throttle};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
    #[serde(default)]
    volume_info: Option<RawVolumeInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVolumeInfo {
    title: Option<String>,
    subtitle: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    publisher: Option<String>,
    published_date: Option<String>,
    description: Option<String>,
    page_count: Option<i32>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    industry_identifiers: Vec<IndustryIdentifier>,
    image_links: Option<ImageLinks>,
}

#[derive(Debug, Deserialize)]
struct IndustryIdentifier {
    #[serde(rename = "type")]
    kind: String,
    identifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageLinks {
    thumbnail: Option<String>,
    small_thumbnail: Option<String>,
}

/// Google Books client
pub struct GoogleBooks {
    client: FetchClient,
    throttle: Throttle,
    base_url: String,
    api_key: Option<String>,
}

impl GoogleBooks {
    pub fn new(client: FetchClient, config: &MetadataConfig) -> Self {
        Self {
            client,
            throttle: Throttle::new(
                "google-books",
                Duration::from_millis(config.google_books_min_interval_ms),
            ),
            base_url: config.google_books_url.trim_end_matches('/').to_string(),
            api_key: config.google_books_api_key.clone(),
        }
    }

    fn volumes_url(&self, q: &str, max_results: usize) -> String {
        let mut url = format!(
            "{}/volumes?q={}&maxResults={}",
            self.base_url,
            urlencoding::encode(q),
            max_results
        );
        if let Some(key) = &self.api_key {
            url.push_str("&key=");
            url.push_str(&urlencoding::encode(key));
        }
        url
    }

    async fn volumes(
        &self,
        q: &str,
        max_results: usize,
        gate: &dyn CallGate,
    ) -> Result<Vec<VolumeInfo>, SourceError> {
        let url = self.volumes_url(q, max_results);
        let response = self
            .client
            .fetch_gated(&url, Some(&self.throttle), gate)
            .await
            .map_err(classify)?;

        let parsed: VolumesResponse = response.json().map_err(|e| SourceError::Malformed {
            kind: SourceKind::GoogleBooks,
            message: e.to_string(),
        })?;

        Ok(parsed
            .items
            .into_iter()
            .filter_map(|v| v.volume_info)
            .map(into_volume_info)
            .collect())
    }
}

#[async_trait]
impl MetadataSource for GoogleBooks {
    fn kind(&self) -> SourceKind {
        SourceKind::GoogleBooks
    }

    async fn lookup_isbn(
        &self,
        isbn: &str,
        gate: &dyn CallGate,
    ) -> Result<Option<VolumeInfo>, SourceError> {
        let mut volumes = self.volumes(&format!("isbn:{}", isbn), 1, gate).await?;
        Ok(if volumes.is_empty() {
            None
        } else {
            Some(volumes.remove(0))
        })
    }

    async fn search(
        &self,
        query: &SearchQuery,
        gate: &dyn CallGate,
    ) -> Result<Vec<VolumeInfo>, SourceError> {
        let mut q = format!("intitle:{}", query.title);
        if let Some(author) = &query.author {
            q.push_str(" inauthor:");
            q.push_str(author);
        }
        self.volumes(&q, query.limit, gate).await
    }
}

/// Map fetch failures, recognizing Google's quota responses
fn classify(error: FetchError) -> SourceError {
    match &error {
        FetchError::RateLimited { .. } => SourceError::QuotaExceeded(SourceKind::GoogleBooks),
        FetchError::Status { status: 403, body, .. } if mentions_quota(body) => {
            SourceError::QuotaExceeded(SourceKind::GoogleBooks)
        }
        _ => SourceError::Fetch(error),
    }
}

fn mentions_quota(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    body.contains("quota") || body.contains("ratelimitexceeded") || body.contains("limit exceeded")
}

fn into_volume_info(raw: RawVolumeInfo) -> VolumeInfo {
    let isbn = raw
        .industry_identifiers
        .iter()
        .find(|id| id.kind == "ISBN_13")
        .or_else(|| raw.industry_identifiers.iter().find(|id| id.kind == "ISBN_10"))
        .map(|id| id.identifier.clone());

    let cover_url = raw
        .image_links
        .and_then(|links| links.thumbnail.or(links.small_thumbnail))
        .map(|url| upgrade_to_https(&url));

    let title = match (raw.title, raw.subtitle) {
        (Some(title), Some(subtitle)) if !subtitle.is_empty() => Some(format!("{}: {}", title, subtitle)),
        (title, _) => title,
    };

    VolumeInfo {
        source: SourceKind::GoogleBooks,
        title,
        authors: raw.authors,
        publisher: raw.publisher,
        published_date: raw.published_date,
        description: raw.description,
        page_count: raw.page_count,
        categories: raw.categories,
        isbn,
        cover_url,
    }
}
