//! Cover resolution cascade
//!
//! Order of attempts for a book:
//! 1. the supplied URL, if it is a reachable image
//! 2. primary source by ISBN, then by title and author
//! 3. fallback source by ISBN, then by title and author
//!
//! The first hit wins. Once the primary source reports a quota refusal the
//! resolver stays on the fallback source for the rest of its life. Requests
//! to the primary that are already queued behind its throttle are withdrawn
//! at that point instead of being sent.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::cache::CoverCache;
use super::source::MetadataSource;
use super::types::{CoverCandidate, SourceError, VolumeInfo};
use super::MetadataSources;
use crate::fetch::{AlwaysOpen, CallGate};

/// Which sources are still in play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Primary,
    /// Primary quota exhausted; only the fallback is consulted
    Degraded,
}

/// Counters for one resolver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub resolved: usize,
    pub unresolved: usize,
    pub cache_hits: usize,
}

/// Resolves cover URLs for one import run
pub struct CoverResolver {
    sources: MetadataSources,
    cache: CoverCache,
    state: Mutex<SourceState>,
    resolved: AtomicUsize,
    unresolved: AtomicUsize,
}

impl CoverResolver {
    pub fn new(sources: MetadataSources) -> Self {
        Self {
            sources,
            cache: CoverCache::new(),
            state: Mutex::new(SourceState::Primary),
            resolved: AtomicUsize::new(0),
            unresolved: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> SourceState {
        *self.state.lock()
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            resolved: self.resolved.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            cache_hits: self.cache.hits(),
        }
    }

    /// Resolve a cover URL, or `None` when every step comes up empty.
    /// Never fails: source errors only move on to the next step.
    pub async fn resolve(&self, candidate: &CoverCandidate) -> Option<String> {
        let key = candidate.cache_key();
        self.cache
            .get_or_resolve(&key, || self.run_cascade(candidate))
            .await
    }

    /// Metadata for an ISBN from whichever source answers first
    pub async fn lookup_metadata(&self, isbn: &str) -> Option<VolumeInfo> {
        if self.primary_available() {
            if let Some(volume) = self.ask_isbn(self.sources.primary.as_ref(), isbn).await {
                return Some(volume);
            }
        }
        self.ask_isbn(self.sources.fallback.as_ref(), isbn).await
    }

    async fn run_cascade(&self, candidate: &CoverCandidate) -> Option<String> {
        let result = self.cascade(candidate).await;
        if result.is_some() {
            self.resolved.fetch_add(1, Ordering::Relaxed);
        } else {
            self.unresolved.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(title = %candidate.title, "No cover found");
        }
        result
    }

    async fn cascade(&self, candidate: &CoverCandidate) -> Option<String> {
        if let Some(url) = &candidate.supplied_url {
            if is_http_url(url) && self.sources.verifier.is_reachable_image(url).await {
                return Some(url.clone());
            }
        }

        if self.primary_available() {
            if let Some(url) = self.try_source(self.sources.primary.as_ref(), candidate).await {
                return Some(url);
            }
        }

        self.try_source(self.sources.fallback.as_ref(), candidate).await
    }

    /// ISBN lookup, then title search, against one source
    async fn try_source(&self, source: &dyn MetadataSource, candidate: &CoverCandidate) -> Option<String> {
        if let Some(isbn) = &candidate.isbn {
            if let Some(url) = self
                .ask_isbn(source, isbn)
                .await
                .and_then(|v| v.cover_url)
            {
                return Some(url);
            }
        }

        if candidate.title.trim().is_empty() || !self.source_usable(source) {
            return None;
        }

        let gate = self.gate_for(source);
        match source.search(&candidate.search_query(), &*gate).await {
            Ok(results) => results.into_iter().next().and_then(|v| v.cover_url),
            Err(e) => {
                self.note_failure(source, e);
                None
            }
        }
    }

    async fn ask_isbn(&self, source: &dyn MetadataSource, isbn: &str) -> Option<VolumeInfo> {
        let gate = self.gate_for(source);
        match source.lookup_isbn(isbn, &*gate).await {
            Ok(volume) => volume,
            Err(e) => {
                self.note_failure(source, e);
                None
            }
        }
    }

    fn primary_available(&self) -> bool {
        self.state() == SourceState::Primary
    }

    fn is_primary(&self, source: &dyn MetadataSource) -> bool {
        source.kind() == self.sources.primary.kind()
    }

    fn source_usable(&self, source: &dyn MetadataSource) -> bool {
        !self.is_primary(source) || self.primary_available()
    }

    /// The primary is gated on the resolver state; the fallback never closes
    fn gate_for(&self, source: &dyn MetadataSource) -> Box<dyn CallGate + '_> {
        if self.is_primary(source) {
            Box::new(PrimaryGate(&self.state))
        } else {
            Box::new(AlwaysOpen)
        }
    }

    fn note_failure(&self, source: &dyn MetadataSource, error: SourceError) {
        let is_primary = self.is_primary(source);

        match error {
            SourceError::QuotaExceeded(kind) if is_primary => {
                let mut state = self.state.lock();
                if *state == SourceState::Primary {
                    *state = SourceState::Degraded;
                    tracing::warn!(
                        source = %kind,
                        fallback = %self.sources.fallback.kind(),
                        "Quota exceeded, using fallback source for the rest of this run"
                    );
                }
            }
            other => {
                tracing::debug!(source = %source.kind(), "Metadata lookup failed: {}", other);
            }
        }
    }
}

/// Open while the resolver is still on the primary source
struct PrimaryGate<'a>(&'a Mutex<SourceState>);

impl CallGate for PrimaryGate<'_> {
    fn is_open(&self) -> bool {
        *self.0.lock() == SourceState::Primary
    }
}

fn is_http_url(value: &str) -> bool {
    reqwest::Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covers::source::mock::{MockVerifier, MockSource};
    use crate::covers::SourceKind;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        primary: Arc<MockSource>,
        fallback: Arc<MockSource>,
        verifier: Arc<MockVerifier>,
    }

    impl Fixture {
        fn new(primary: MockSource, fallback: MockSource, verifier: MockVerifier) -> Self {
            Self {
                primary: Arc::new(primary),
                fallback: Arc::new(fallback),
                verifier: Arc::new(verifier),
            }
        }

        fn resolver(&self) -> CoverResolver {
            CoverResolver::new(MetadataSources::new(
                self.primary.clone(),
                self.fallback.clone(),
                self.verifier.clone(),
            ))
        }
    }

    fn google() -> MockSource {
        MockSource::new(SourceKind::GoogleBooks)
    }

    fn open_library() -> MockSource {
        MockSource::new(SourceKind::OpenLibrary)
    }

    #[tokio::test]
    async fn test_valid_supplied_url_short_circuits() {
        let f = Fixture::new(
            google().with_isbn_cover("123", "https://g/123.jpg"),
            open_library(),
            MockVerifier::accepting(&["https://mine/cover.jpg"]),
        );
        let resolver = f.resolver();

        let candidate = CoverCandidate::new("Dune")
            .with_isbn("123")
            .with_supplied_url("https://mine/cover.jpg");
        assert_eq!(
            resolver.resolve(&candidate).await.as_deref(),
            Some("https://mine/cover.jpg")
        );
        assert_eq!(f.primary.calls(), 0);
        assert_eq!(f.fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_bad_supplied_url_falls_through() {
        let f = Fixture::new(
            google().with_isbn_cover("123", "https://g/123.jpg"),
            open_library(),
            MockVerifier::default(),
        );
        let resolver = f.resolver();

        let candidate = CoverCandidate::new("Dune")
            .with_isbn("123")
            .with_supplied_url("https://broken/cover.html");
        assert_eq!(resolver.resolve(&candidate).await.as_deref(), Some("https://g/123.jpg"));

        // Not even syntactically a URL: no HEAD request is made
        let candidate = CoverCandidate::new("Dune Messiah")
            .with_isbn("123")
            .with_supplied_url("n/a");
        resolver.resolve(&candidate).await;
        assert_eq!(f.verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cascade_order() {
        let f = Fixture::new(
            google(),
            open_library().with_title_cover("Dune", "https://ol/dune.jpg"),
            MockVerifier::default(),
        );
        let resolver = f.resolver();

        let candidate = CoverCandidate::new("Dune").with_author("Frank Herbert").with_isbn("123");
        assert_eq!(resolver.resolve(&candidate).await.as_deref(), Some("https://ol/dune.jpg"));

        assert_eq!(f.primary.isbn_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.primary.search_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.fallback.isbn_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.fallback.search_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_isbn_skips_isbn_lookups() {
        let f = Fixture::new(
            google().with_title_cover("Dune", "https://g/dune.jpg"),
            open_library(),
            MockVerifier::default(),
        );
        let resolver = f.resolver();

        let result = resolver.resolve(&CoverCandidate::new("Dune")).await;
        assert_eq!(result.as_deref(), Some("https://g/dune.jpg"));
        assert_eq!(f.primary.isbn_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_quota_switches_to_fallback_permanently() {
        let f = Fixture::new(
            google().with_quota_exceeded(),
            open_library()
                .with_isbn_cover("1", "https://ol/1.jpg")
                .with_isbn_cover("2", "https://ol/2.jpg"),
            MockVerifier::default(),
        );
        let resolver = f.resolver();

        let first = resolver
            .resolve(&CoverCandidate::new("First").with_isbn("1"))
            .await;
        assert_eq!(first.as_deref(), Some("https://ol/1.jpg"));
        assert_eq!(resolver.state(), SourceState::Degraded);
        // The title search on the primary is skipped once degraded
        assert_eq!(f.primary.calls(), 1);

        let second = resolver
            .resolve(&CoverCandidate::new("Second").with_isbn("2"))
            .await;
        assert_eq!(second.as_deref(), Some("https://ol/2.jpg"));
        assert_eq!(f.primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_fresh_resolver_starts_on_primary() {
        let f = Fixture::new(google().with_quota_exceeded(), open_library(), MockVerifier::default());

        let first = f.resolver();
        first.resolve(&CoverCandidate::new("A").with_isbn("1")).await;
        assert_eq!(first.state(), SourceState::Degraded);

        let second = f.resolver();
        assert_eq!(second.state(), SourceState::Primary);
    }

    #[tokio::test]
    async fn test_repeated_candidates_hit_cache() {
        let f = Fixture::new(
            google().with_isbn_cover("123", "https://g/123.jpg"),
            open_library(),
            MockVerifier::default(),
        );
        let resolver = f.resolver();
        let candidate = CoverCandidate::new("Dune").with_author("Frank Herbert").with_isbn("123");

        for _ in 0..3 {
            assert_eq!(resolver.resolve(&candidate).await.as_deref(), Some("https://g/123.jpg"));
        }
        assert_eq!(f.primary.calls(), 1);
        assert_eq!(resolver.stats().cache_hits, 2);
        assert_eq!(resolver.stats().resolved, 1);
    }

    #[tokio::test]
    async fn test_misses_are_cached() {
        let f = Fixture::new(google(), open_library(), MockVerifier::default());
        let resolver = f.resolver();
        let candidate = CoverCandidate::new("Nothing").with_isbn("000");

        assert!(resolver.resolve(&candidate).await.is_none());
        let calls = f.primary.calls() + f.fallback.calls();
        assert!(resolver.resolve(&candidate).await.is_none());
        assert_eq!(f.primary.calls() + f.fallback.calls(), calls);
        assert_eq!(resolver.stats().unresolved, 1);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_resolves_once() {
        let f = Fixture::new(
            google()
                .with_isbn_cover("123", "https://g/123.jpg")
                .with_delay(Duration::from_millis(20)),
            open_library(),
            MockVerifier::default(),
        );
        let resolver = Arc::new(f.resolver());
        let candidate = CoverCandidate::new("Dune").with_isbn("123");

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let resolver = resolver.clone();
                let candidate = candidate.clone();
                tokio::spawn(async move { resolver.resolve(&candidate).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().as_deref(), Some("https://g/123.jpg"));
        }
        assert_eq!(f.primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_lookup_metadata_prefers_primary() {
        let f = Fixture::new(
            google().with_isbn_cover("123", "https://g/123.jpg"),
            open_library().with_isbn_cover("123", "https://ol/123.jpg"),
            MockVerifier::default(),
        );
        let volume = f.resolver().lookup_metadata("123").await.unwrap();
        assert_eq!(volume.source, SourceKind::GoogleBooks);

        let volume = f.resolver().lookup_metadata("999").await;
        assert!(volume.is_none());
        assert_eq!(f.fallback.isbn_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_queued_primary_requests_are_withdrawn_after_quota() {
        use crate::config::MetadataConfig;
        use crate::covers::GoogleBooks;
        use crate::fetch::{FetchClient, RetryPolicy};
        use axum::{http::StatusCode, routing::get, Router};

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/volumes",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::TOO_MANY_REQUESTS, "quota exhausted")
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = FetchClient::new(RetryPolicy {
            timeout: Duration::from_millis(500),
            max_retries: 0,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(1),
        });
        let config = MetadataConfig {
            google_books_url: format!("http://{}", addr),
            google_books_min_interval_ms: 100,
            ..MetadataConfig::default()
        };
        let fallback = Arc::new(
            open_library()
                .with_isbn_cover("1", "https://ol/1.jpg")
                .with_isbn_cover("2", "https://ol/2.jpg")
                .with_isbn_cover("3", "https://ol/3.jpg")
                .with_isbn_cover("4", "https://ol/4.jpg"),
        );
        let resolver = Arc::new(CoverResolver::new(MetadataSources::new(
            Arc::new(GoogleBooks::new(client, &config)),
            fallback.clone(),
            Arc::new(MockVerifier::default()),
        )));

        let handles: Vec<_> = (1..=4)
            .map(|i| {
                let resolver = resolver.clone();
                tokio::spawn(async move {
                    let candidate = CoverCandidate::new(format!("Book {}", i)).with_isbn(i.to_string());
                    resolver.resolve(&candidate).await
                })
            })
            .collect();

        let mut covers = Vec::new();
        for handle in handles {
            covers.push(handle.await.unwrap());
        }

        // Only the first request reached the exhausted source
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.state(), SourceState::Degraded);
        assert!(covers.iter().all(Option::is_some));
        assert_eq!(fallback.isbn_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_degraded_resolver_withdraws_primary_calls() {
        let f = Fixture::new(
            google().with_isbn_cover("123", "https://g/123.jpg"),
            open_library(),
            MockVerifier::default(),
        );
        let resolver = f.resolver();
        *resolver.state.lock() = SourceState::Degraded;

        let gate = resolver.gate_for(f.primary.as_ref());
        assert!(!gate.is_open());
        assert!(resolver.gate_for(f.fallback.as_ref()).is_open());

        let result = f.primary.lookup_isbn("123", &*gate).await;
        assert!(matches!(
            result,
            Err(SourceError::Fetch(crate::fetch::FetchError::Withdrawn { .. }))
        ));
        assert_eq!(f.primary.calls(), 0);
    }

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("https://covers.openlibrary.org/b/id/1-M.jpg"));
        assert!(is_http_url("http://example.com/a.png"));
        assert!(!is_http_url("ftp://example.com/a.png"));
        assert!(!is_http_url("cover.jpg"));
    }
}
