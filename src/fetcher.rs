use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use rand::Rng;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:89.0) Gecko/20100101 Firefox/89.0",
];

/// Failure to turn a URL into a page body. Callers treat any variant as
/// "this page contributes nothing" and move on; nothing here is fatal
/// to a run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    /// Proxy URL for outbound requests, e.g. `http://host:port`.
    pub proxy: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            proxy: None,
        }
    }
}

/// HTTP page fetcher shared by the crawl and resolution paths.
///
/// Rotates through a pool of browser user agents, retries transient
/// failures with exponential backoff, and caches bodies by URL so
/// reference pages and revisited domains cost one request.
pub struct PageFetcher {
    client: Client,
    cache: moka::future::Cache<String, String>,
}

impl PageFetcher {
    pub fn new(config: FetcherConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(10));
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        let client = builder.build()?;
        let cache = moka::future::Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(60 * 30))
            .build();
        Ok(Self { client, cache })
    }

    fn random_user_agent() -> &'static str {
        let mut rng = rand::thread_rng();
        USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
    }

    /// Fetch a page body. Transport errors and 5xx responses are
    /// retried briefly; other HTTP errors fail straight away.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        if let Some(hit) = self.cache.get(url).await {
            debug!("cache hit for {}", url);
            return Ok(hit);
        }

        let client = self.client.clone();
        let url_owned = url.to_string();
        let body = retry(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(200))
                .with_max_interval(Duration::from_secs(2))
                .with_max_elapsed_time(Some(Duration::from_secs(4)))
                .build(),
            || async {
                let resp = client
                    .get(url_owned.as_str())
                    .header("User-Agent", Self::random_user_agent())
                    .header(
                        "Accept",
                        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                    )
                    .header("Accept-Language", "en-US,en;q=0.5")
                    .send()
                    .await
                    .map_err(|e| {
                        backoff::Error::transient(FetchError::Transport {
                            url: url_owned.clone(),
                            source: e,
                        })
                    })?;
                let status = resp.status();
                if !status.is_success() {
                    let err = FetchError::Status {
                        url: url_owned.clone(),
                        status: status.as_u16(),
                    };
                    // 5xx transient, others permanent
                    return Err(if status.is_server_error() {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    });
                }
                resp.text().await.map_err(|e| {
                    backoff::Error::transient(FetchError::Transport {
                        url: url_owned.clone(),
                        source: e,
                    })
                })
            },
        )
        .await?;

        self.cache.insert(url.to_string(), body.clone()).await;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> PageFetcher {
        PageFetcher::new(FetcherConfig::default()).expect("client builds")
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let err = fetcher().fetch("ftp://example.com/file").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn rejects_unparseable_urls() {
        let err = fetcher().fetch("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn returns_body_on_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/page")
            .with_status(200)
            .with_body("<html><body>hello</body></html>")
            .create_async()
            .await;

        let body = fetcher()
            .fetch(&format!("{}/page", server.url()))
            .await
            .expect("fetch succeeds");
        assert!(body.contains("hello"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn caches_bodies_by_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/cached")
            .with_status(200)
            .with_body("once")
            .expect(1)
            .create_async()
            .await;

        let fetcher = fetcher();
        let url = format!("{}/cached", server.url());
        let first = fetcher.fetch(&url).await.expect("first fetch");
        let second = fetcher.fetch(&url).await.expect("second fetch");
        assert_eq!(first, second);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_is_a_status_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let err = fetcher()
            .fetch(&format!("{}/missing", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }
}
