//! Periodic refresh of the provider's published key list.
//!
//! # Cycle
//!
//! ```text
//! tick → KeySource::fetch_key_list → parse_key_set → KeyStore::replace
//!          │ error                     │ error
//!          └──────── log, keep current key set, wait for next tick
//! ```
//!
//! The first tick fires as soon as [`KeyRefresher::start`] is called, so keys
//! are loaded in the background while the listener comes up. After that the
//! refresher wakes every [`refresh_interval`](crate::RefresherConfig::refresh_interval).
//! Failures are never retried early: the provider rotates keys at most about
//! once a day and the previous set stays valid in the meantime.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use fail::fail_point;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    config::RefresherConfig,
    error::{Result, SsvError},
    key_store::KeyStore,
    keys::{KeySet, parse_key_set},
};

/// Source of the raw key-list document.
///
/// [`HttpKeySource`] is the production implementation. Tests substitute
/// in-memory sources to drive the refresher without network access.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Retrieves the key-list document body.
    ///
    /// # Errors
    ///
    /// Returns [`SsvError::Fetch`] or [`SsvError::Timeout`] if the document
    /// could not be retrieved.
    async fn fetch_key_list(&self) -> Result<Vec<u8>>;
}

/// Fetches the key list over HTTP(S) with bounded timeouts.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    /// Creates a source for the URL and timeouts in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SsvError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &RefresherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| SsvError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, url: config.key_url().to_owned() })
    }

    /// Returns the URL the key list is fetched from.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn fetch_key_list(&self) -> Result<Vec<u8>> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        tracing::debug!(bytes = body.len(), "key list downloaded");
        Ok(body.to_vec())
    }
}

/// Keeps a [`KeyStore`] loaded with the provider's current keys.
///
/// Either drive it manually with [`refresh_once`](Self::refresh_once), or call
/// [`start`](Self::start) to run the refresh loop as a background task and
/// [`shutdown`](Self::shutdown) to stop it.
pub struct KeyRefresher {
    store: Arc<KeyStore>,
    source: Arc<dyn KeySource>,
    interval: Duration,
    /// Stops the background task.
    cancel_token: CancellationToken,
    /// Handle for the background task, if running.
    /// Wrapped in `Mutex` so `shutdown()` can take ownership via `&self`.
    refresh_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Completed refresh cycles, successful or not.
    refresh_count: AtomicU64,
    /// Refresh cycles that left the store unchanged because of an error.
    refresh_errors_total: AtomicU64,
    last_success: Mutex<Option<Instant>>,
}

impl KeyRefresher {
    /// Creates a refresher fetching from the HTTP endpoint in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SsvError::Config`] if `config` is invalid or the HTTP client
    /// cannot be built.
    pub fn new(store: Arc<KeyStore>, config: &RefresherConfig) -> Result<Self> {
        config.validate()?;
        let source = HttpKeySource::new(config)?;
        Ok(Self::with_source(store, Arc::new(source), config.refresh_interval()))
    }

    /// Creates a refresher over an arbitrary [`KeySource`].
    #[must_use]
    pub fn with_source(
        store: Arc<KeyStore>,
        source: Arc<dyn KeySource>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            source,
            interval,
            cancel_token: CancellationToken::new(),
            refresh_handle: Mutex::new(None),
            refresh_count: AtomicU64::new(0),
            refresh_errors_total: AtomicU64::new(0),
            last_success: Mutex::new(None),
        }
    }

    /// Fetches and parses the key list without touching the store.
    ///
    /// # Errors
    ///
    /// Any [`KeySource`] error, or the parse errors of
    /// [`parse_key_set`](crate::keys::parse_key_set).
    pub async fn fetch_once(&self) -> Result<KeySet> {
        fail_point!("refresher-before-fetch", |_| {
            Err(SsvError::fetch("injected failure before key fetch"))
        });
        let body = self.source.fetch_key_list().await?;
        parse_key_set(&body)
    }

    /// Fetches the key list and, on success, replaces the store's contents.
    ///
    /// Returns the number of keys installed. On error the store is unchanged.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_once`](Self::fetch_once).
    #[tracing::instrument(skip(self))]
    pub async fn refresh_once(&self) -> Result<usize> {
        let start = Instant::now();
        let result = self.fetch_once().await;
        self.refresh_count.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(keys) => {
                let count = keys.len();
                self.store.replace(keys);
                *self.last_success.lock() = Some(Instant::now());
                tracing::info!(
                    keys = count,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "key refresh cycle complete"
                );
                Ok(count)
            },
            Err(err) => {
                self.refresh_errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %err,
                    transient = err.is_transient(),
                    retained_keys = self.store.len(),
                    "key refresh failed, keeping current key set"
                );
                Err(err)
            },
        }
    }

    /// Starts the background refresh loop.
    ///
    /// The first refresh runs immediately; later ones every configured
    /// interval. The loop stops on [`shutdown`](Self::shutdown) or when the
    /// [`cancel_token`](Self::cancel_token) is cancelled.
    ///
    /// Calling `start` on a refresher whose loop is already running logs a
    /// warning and leaves the existing loop in place.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    #[must_use]
    pub fn start(self: Arc<Self>) -> Arc<Self> {
        {
            let mut slot = self.refresh_handle.lock();
            if slot.is_some() {
                tracing::warn!("key refresher already started, ignoring start()");
            } else {
                *slot = Some(Self::spawn_loop(Arc::clone(&self)));
            }
        }
        self
    }

    fn spawn_loop(refresher: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let token = refresher.cancel_token.clone();
        let interval = refresher.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("key refresher shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        // Errors are logged inside; the current key set stays in place.
                        let _ = refresher.refresh_once().await;
                    }
                }
            }
        })
    }

    /// Stops the background loop and waits for it to exit.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.refresh_handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "key refresher task panicked");
        }
    }

    /// Returns the cancellation token for the background loop.
    ///
    /// Callers can use this to tie the refresher to an external shutdown signal.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Returns the store this refresher writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    /// Returns the configured refresh interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the number of completed refresh cycles.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::Relaxed)
    }

    /// Returns the number of refresh cycles that failed.
    #[must_use]
    pub fn refresh_errors_total(&self) -> u64 {
        self.refresh_errors_total.load(Ordering::Relaxed)
    }

    /// Returns the time since the last successful refresh, if any.
    #[must_use]
    pub fn last_refresh_age(&self) -> Option<Duration> {
        self.last_success.lock().map(|at| at.elapsed())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;
    use crate::testutil::{StaticKeySource, TestKey, key_list_json, key_set_of};

    fn refresher_with(source: Arc<StaticKeySource>, store: Arc<KeyStore>) -> Arc<KeyRefresher> {
        Arc::new(KeyRefresher::with_source(store, source, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_refresh_once_loads_every_key() {
        let a = TestKey::generate("3335741209");
        let b = TestKey::generate("1916455855");
        let source = Arc::new(StaticKeySource::new(key_list_json(&[&a, &b])));
        let store = Arc::new(KeyStore::new());
        let refresher = refresher_with(source, Arc::clone(&store));

        let count = refresher.refresh_once().await.unwrap();

        assert_eq!(count, 2);
        for key in [&a, &b] {
            let loaded = store.lookup(key.key_id()).unwrap();
            assert_eq!(loaded.spki_der(), key.spki_der().as_slice());
        }
        assert_eq!(refresher.refresh_count(), 1);
        assert_eq!(refresher.refresh_errors_total(), 0);
        assert!(refresher.last_refresh_age().is_some());
    }

    #[tokio::test]
    async fn test_fetch_once_does_not_touch_store() {
        let key = TestKey::generate("1");
        let source = Arc::new(StaticKeySource::new(key_list_json(&[&key])));
        let store = Arc::new(KeyStore::new());
        let refresher = refresher_with(source, Arc::clone(&store));

        let set = refresher.fetch_once().await.unwrap();

        assert_eq!(set.len(), 1);
        assert!(store.is_empty());
        assert_eq!(store.generation(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_current_keys() {
        let seeded = TestKey::generate("1");
        let store = Arc::new(KeyStore::with_keys(key_set_of(&[&seeded])));
        let source = Arc::new(StaticKeySource::new(key_list_json(&[&seeded])));
        source.set_failure(Some(SsvError::timeout()));
        let refresher = refresher_with(Arc::clone(&source), Arc::clone(&store));

        let result = refresher.refresh_once().await;

        assert!(matches!(result, Err(SsvError::Timeout)));
        assert!(store.lookup("1").is_some());
        assert_eq!(store.generation(), 1);
        assert_eq!(refresher.refresh_errors_total(), 1);
        assert!(refresher.last_refresh_age().is_none());
    }

    #[tokio::test]
    async fn test_successful_refresh_replaces_not_merges() {
        let old = TestKey::generate("1");
        let new = TestKey::generate("2");
        let store = Arc::new(KeyStore::with_keys(key_set_of(&[&old])));
        let source = Arc::new(StaticKeySource::new(key_list_json(&[&new])));
        let refresher = refresher_with(source, Arc::clone(&store));

        refresher.refresh_once().await.unwrap();

        assert!(store.lookup("1").is_none());
        assert!(store.lookup("2").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_fetches_immediately_then_on_interval() {
        let key = TestKey::generate("1");
        let source = Arc::new(StaticKeySource::new(key_list_json(&[&key])));
        let store = Arc::new(KeyStore::new());
        let refresher = refresher_with(Arc::clone(&source), Arc::clone(&store)).start();

        // Let the spawned task run its first tick.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.fetch_count(), 1);
        assert!(store.lookup("1").is_some());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.fetch_count(), 2);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(source.fetch_count(), 4);

        refresher.shutdown().await;
        assert!(refresher.cancel_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_survives_failures() {
        let key = TestKey::generate("1");
        let source = Arc::new(StaticKeySource::new(key_list_json(&[&key])));
        source.set_failure(Some(SsvError::fetch("connection refused")));
        let store = Arc::new(KeyStore::new());
        let refresher = refresher_with(Arc::clone(&source), Arc::clone(&store)).start();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(store.is_empty());
        assert_eq!(refresher.refresh_errors_total(), 1);

        source.set_failure(None);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(store.lookup("1").is_some());
        assert_eq!(refresher.refresh_count(), 2);

        refresher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_does_not_spawn_another_loop() {
        let key = TestKey::generate("1");
        let source = Arc::new(StaticKeySource::new(key_list_json(&[&key])));
        let refresher = refresher_with(Arc::clone(&source), Arc::new(KeyStore::new())).start();
        let refresher = Arc::clone(&refresher).start();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.fetch_count(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.fetch_count(), 2);

        refresher.shutdown().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_without_start_is_noop() {
        let source = Arc::new(StaticKeySource::new("{}"));
        let refresher = refresher_with(source, Arc::new(KeyStore::new()));
        refresher.shutdown().await;
        assert_eq!(refresher.refresh_count(), 0);
    }

    /// Serves every connection on a local port with `response`, or holds the
    /// connection open without answering when `response` is `None`.
    async fn spawn_key_server(response: Option<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let response = response.clone();
                tokio::spawn(async move {
                    let mut request = vec![0u8; 8192];
                    let _ = socket.read(&mut request).await;
                    match response {
                        Some(response) => {
                            let _ = socket.write_all(response.as_bytes()).await;
                            let _ = socket.shutdown().await;
                        },
                        None => std::future::pending::<()>().await,
                    }
                });
            }
        });
        format!("http://{addr}/verifier-keys.json")
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\
             connection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn http_refresher(url: &str, store: Arc<KeyStore>) -> KeyRefresher {
        let config = RefresherConfig::builder()
            .key_url(url)
            .request_timeout(Duration::from_millis(300))
            .connect_timeout(Duration::from_millis(300))
            .build()
            .unwrap();
        KeyRefresher::new(store, &config).unwrap()
    }

    #[tokio::test]
    async fn test_http_fetch_times_out_on_silent_server() {
        let seeded = TestKey::generate("1");
        let store = Arc::new(KeyStore::with_keys(key_set_of(&[&seeded])));
        let url = spawn_key_server(None).await;
        let refresher = http_refresher(&url, Arc::clone(&store));

        let result = tokio::time::timeout(Duration::from_secs(5), refresher.refresh_once())
            .await
            .expect("request timeout must bound the fetch");

        assert!(matches!(result, Err(SsvError::Timeout)), "got {result:?}");
        assert!(store.lookup("1").is_some());
        assert_eq!(store.generation(), 1);
        assert_eq!(refresher.refresh_errors_total(), 1);
    }

    #[tokio::test]
    async fn test_http_fetch_maps_error_status_to_fetch() {
        let seeded = TestKey::generate("1");
        let store = Arc::new(KeyStore::with_keys(key_set_of(&[&seeded])));
        let url = spawn_key_server(Some(http_response("503 Service Unavailable", ""))).await;
        let refresher = http_refresher(&url, Arc::clone(&store));

        let result = refresher.refresh_once().await;

        assert!(
            matches!(&result, Err(SsvError::Fetch { message, .. }) if message.contains("503")),
            "got {result:?}"
        );
        assert!(result.as_ref().is_err_and(SsvError::is_transient));
        assert!(store.lookup("1").is_some());
        assert_eq!(store.generation(), 1);
    }

    #[tokio::test]
    async fn test_http_fetch_loads_published_keys() {
        let a = TestKey::generate("3335741209");
        let b = TestKey::generate("1916455855");
        let store = Arc::new(KeyStore::new());
        let body = key_list_json(&[&a, &b]);
        let url = spawn_key_server(Some(http_response("200 OK", &body))).await;
        let refresher = http_refresher(&url, Arc::clone(&store));

        let count = refresher.refresh_once().await.unwrap();

        assert_eq!(count, 2);
        for key in [&a, &b] {
            let loaded = store.lookup(key.key_id()).unwrap();
            assert_eq!(loaded.spki_der(), key.spki_der().as_slice());
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = RefresherConfig::default();
        config.refresh_interval = Duration::ZERO;
        let result = KeyRefresher::new(Arc::new(KeyStore::new()), &config);
        assert!(matches!(result, Err(SsvError::Config { .. })));
    }

    #[test]
    fn test_http_source_uses_configured_url() {
        let config = RefresherConfig::builder()
            .key_url("https://keys.example.com/verifier-keys.json")
            .build()
            .unwrap();
        let source = HttpKeySource::new(&config).unwrap();
        assert_eq!(source.url(), "https://keys.example.com/verifier-keys.json");
    }
}
