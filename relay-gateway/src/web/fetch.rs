use std::sync::Arc;
use std::time::Duration;

use relay_cache::TimedCache;
use relay_core::HttpSettings;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// HTTP status of the failed response, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Turn a non-2xx response into [`FetchError::Status`].
    pub fn error_for_status(self) -> Result<Self, FetchError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchError::Status {
                status: self.status,
                body: self.text(),
            })
        }
    }
}

/// Shared HTTP client with 429 retries and an optional GET cache.
///
/// Cheap to clone; clones share the connection pool and cache.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    max_retries: u32,
    cache: Option<Arc<TimedCache<String, HttpResponse>>>,
}

impl HttpClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, FetchError> {
        let inner = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;

        let cache = (settings.cache_ttl_seconds > 0).then(|| {
            Arc::new(TimedCache::new(Duration::from_secs(
                settings.cache_ttl_seconds,
            )))
        });

        Ok(Self {
            inner,
            max_retries: settings.max_retries,
            cache,
        })
    }

    /// Drop expired GET cache entries.
    pub async fn prune_cache(&self) -> usize {
        match &self.cache {
            Some(cache) => cache.prune_expired().await,
            None => 0,
        }
    }

    /// The underlying reqwest client, for streaming downloads.
    pub fn raw(&self) -> &reqwest::Client {
        &self.inner
    }

    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: Body::Empty,
            timeout: None,
            use_cache: true,
        }
    }

    pub fn get(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::POST, url)
    }
}

#[derive(Debug, Clone)]
enum Body {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// Request under construction. Nothing is sent until [`RequestBuilder::send`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    client: HttpClient,
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Body,
    timeout: Option<Duration>,
    use_cache: bool,
}

impl RequestBuilder {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, FetchError> {
        self.body = Body::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        self.body = Body::Form(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bypass the GET cache for this request.
    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    fn cache_key(&self) -> Option<String> {
        if self.method != Method::GET || !self.use_cache {
            return None;
        }
        // Auth headers change what the server returns.
        let headers: Vec<String> = self
            .headers
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let query: Vec<String> = self.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        Some(format!(
            "GET {}?{}#{}",
            self.url,
            query.join("&"),
            headers.join(";")
        ))
    }

    fn build(&self) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .inner
            .request(self.method.clone(), &self.url)
            .query(&self.query);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        match &self.body {
            Body::Empty => request,
            Body::Json(value) => request.json(value),
            Body::Form(fields) => request.form(fields),
        }
    }

    /// Send the request, retrying rate limits and transient network errors.
    ///
    /// Non-2xx responses are returned as-is; see [`RequestBuilder::send_json`].
    #[instrument(skip(self), fields(method = %self.method, url = %self.url))]
    pub async fn send(self) -> Result<HttpResponse, FetchError> {
        if reqwest::Url::parse(&self.url).is_err() {
            return Err(FetchError::InvalidUrl(self.url));
        }

        let cache_key = self.cache_key();
        if let (Some(cache), Some(key)) = (self.client.cache.as_ref(), cache_key.as_ref())
            && let Some(hit) = cache.get(key).await
        {
            debug!("HTTP cache hit");
            return Ok(hit);
        }

        let mut delay = INITIAL_BACKOFF;
        let mut attempts = 0;
        let response = loop {
            attempts += 1;
            match self.build().send().await {
                Ok(response)
                    if response.status() == StatusCode::TOO_MANY_REQUESTS
                        && attempts <= self.client.max_retries =>
                {
                    let wait = retry_after(response.headers()).unwrap_or(delay);
                    warn!(
                        attempt = attempts,
                        delay_ms = wait.as_millis() as u64,
                        "Rate limited, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
                Ok(response) => break response,
                Err(err)
                    if (err.is_timeout() || err.is_connect())
                        && attempts <= self.client.max_retries =>
                {
                    warn!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after connection error"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
                Err(err) => return Err(err.into()),
            }
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        let response = HttpResponse {
            status,
            headers,
            body,
        };

        if response.is_success()
            && let (Some(cache), Some(key)) = (self.client.cache.as_ref(), cache_key)
        {
            cache.set(key, response.clone()).await;
        }

        Ok(response)
    }

    /// Send and decode a 2xx JSON body.
    pub async fn send_json<T: DeserializeOwned>(self) -> Result<T, FetchError> {
        self.send().await?.error_for_status()?.json()
    }
}

/// `Retry-After` given in seconds (fractions allowed).
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| Duration::from_secs_f64(secs).min(MAX_BACKOFF))
}
