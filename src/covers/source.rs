//! Metadata source and image verifier traits

use async_trait::async_trait;

use super::types::{SearchQuery, SourceError, SourceKind, VolumeInfo};
use crate::fetch::{CallGate, FetchClient};

/// A book metadata service
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Which service this is
    fn kind(&self) -> SourceKind;

    /// Look up a single volume by ISBN.
    ///
    /// `gate` is checked before every request actually goes out.
    async fn lookup_isbn(&self, isbn: &str, gate: &dyn CallGate)
        -> Result<Option<VolumeInfo>, SourceError>;

    /// Free-text search by title and author, best match first
    async fn search(&self, query: &SearchQuery, gate: &dyn CallGate)
        -> Result<Vec<VolumeInfo>, SourceError>;
}

/// Checks that a URL points to a reachable image
#[async_trait]
pub trait ImageVerifier: Send + Sync {
    async fn is_reachable_image(&self, url: &str) -> bool;
}

/// Verifier backed by a HEAD request
#[derive(Clone)]
pub struct HttpImageVerifier {
    client: FetchClient,
}

impl HttpImageVerifier {
    pub fn new(client: FetchClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageVerifier for HttpImageVerifier {
    async fn is_reachable_image(&self, url: &str) -> bool {
        match self.client.head(url).await {
            Ok(response) => {
                let ok = response.is_image();
                if !ok {
                    tracing::debug!(
                        url = %url,
                        status = response.status,
                        content_type = ?response.content_type,
                        "Supplied cover is not an image"
                    );
                }
                ok
            }
            Err(e) => {
                tracing::debug!(url = %url, "Supplied cover is unreachable: {}", e);
                false
            }
        }
    }
}

/// Scripted sources for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::fetch::FetchError;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Source answering from fixed tables and counting calls
    pub struct MockSource {
        pub kind: SourceKind,
        pub by_isbn: HashMap<String, VolumeInfo>,
        pub by_title: HashMap<String, VolumeInfo>,
        pub quota_exceeded: bool,
        pub delay: Duration,
        pub isbn_calls: AtomicUsize,
        pub search_calls: AtomicUsize,
    }

    impl MockSource {
        pub fn new(kind: SourceKind) -> Self {
            Self {
                kind,
                by_isbn: HashMap::new(),
                by_title: HashMap::new(),
                quota_exceeded: false,
                delay: Duration::ZERO,
                isbn_calls: AtomicUsize::new(0),
                search_calls: AtomicUsize::new(0),
            }
        }

        pub fn with_isbn_cover(mut self, isbn: &str, cover: &str) -> Self {
            let mut volume = VolumeInfo::new(self.kind);
            volume.isbn = Some(isbn.to_string());
            volume.cover_url = Some(cover.to_string());
            self.by_isbn.insert(isbn.to_string(), volume);
            self
        }

        pub fn with_title_cover(mut self, title: &str, cover: &str) -> Self {
            let mut volume = VolumeInfo::new(self.kind);
            volume.title = Some(title.to_string());
            volume.cover_url = Some(cover.to_string());
            self.by_title.insert(title.to_string(), volume);
            self
        }

        pub fn with_quota_exceeded(mut self) -> Self {
            self.quota_exceeded = true;
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.isbn_calls.load(Ordering::SeqCst) + self.search_calls.load(Ordering::SeqCst)
        }

        fn admit(&self, gate: &dyn CallGate) -> Result<(), SourceError> {
            if gate.is_open() {
                Ok(())
            } else {
                Err(SourceError::Fetch(FetchError::Withdrawn {
                    url: format!("mock://{}", self.kind),
                }))
            }
        }
    }

    #[async_trait]
    impl MetadataSource for MockSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn lookup_isbn(
            &self,
            isbn: &str,
            gate: &dyn CallGate,
        ) -> Result<Option<VolumeInfo>, SourceError> {
            self.admit(gate)?;
            self.isbn_calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.quota_exceeded {
                return Err(SourceError::QuotaExceeded(self.kind));
            }
            Ok(self.by_isbn.get(isbn).cloned())
        }

        async fn search(
            &self,
            query: &SearchQuery,
            gate: &dyn CallGate,
        ) -> Result<Vec<VolumeInfo>, SourceError> {
            self.admit(gate)?;
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.quota_exceeded {
                return Err(SourceError::QuotaExceeded(self.kind));
            }
            Ok(self.by_title.get(&query.title).cloned().into_iter().collect())
        }
    }

    /// Verifier that accepts a fixed set of URLs
    #[derive(Default)]
    pub struct MockVerifier {
        pub images: HashSet<String>,
        pub calls: AtomicUsize,
    }

    impl MockVerifier {
        pub fn accepting(urls: &[&str]) -> Self {
            Self {
                images: urls.iter().map(|u| u.to_string()).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ImageVerifier for MockVerifier {
        async fn is_reachable_image(&self, url: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.images.contains(url)
        }
    }
}
