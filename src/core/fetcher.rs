//! 带重试的单资源抓取器
//!
//! 支持：
//! - 文本请求（交给 ResponseHandler 解析）
//! - 流式下载到文件，按固定大小分块写盘
//! - 固定重试次数，失败后立即重试

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Proxy};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::core::error_handling::{normalize_retry_budget, DownloadError};
use crate::core::models::{FetchOutcome, FetchRequest};
use crate::core::observer::{DownloadObserver, TracingObserver};

/// 默认写盘块大小 1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Turns a successful text response into a typed value.
///
/// Runs once, after the retry loop; its errors end the request without
/// another attempt.
pub trait ResponseHandler: Send + Sync + 'static {
    type Output: Send + 'static;

    fn handle(&self, index: usize, url: &str, body: &str) -> Result<Self::Output, DownloadError>;
}

impl<F, O> ResponseHandler for F
where
    F: Fn(usize, &str, &str) -> Result<O, DownloadError> + Send + Sync + 'static,
    O: Send + 'static,
{
    type Output = O;

    fn handle(&self, index: usize, url: &str, body: &str) -> Result<O, DownloadError> {
        self(index, url, body)
    }
}

/// One network attempt, no retries.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `request.url` and return the decoded body.
    async fn get_text(&self, request: &FetchRequest) -> Result<String, DownloadError>;

    /// GET `request.url` and stream the body into `destination`, truncating it
    /// first. Returns the number of bytes written.
    async fn download(&self, request: &FetchRequest, destination: &Path)
        -> Result<u64, DownloadError>;
}

/// HTTP传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// 连接超时与无进展超时（秒），0 表示不限制。
    /// 流式下载只要持续收到数据就不会超时。
    pub timeout: u64,
    /// 用户代理
    pub user_agent: String,
    /// 默认代理
    pub proxy: Option<String>,
    /// 写盘块大小（字节）
    pub chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            proxy: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// reqwest backed [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    config: TransportConfig,
    client: Client,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, DownloadError> {
        let client = Self::build_client(&config, config.proxy.as_deref())?;
        Ok(Self { config, client })
    }

    fn build_client(config: &TransportConfig, proxy: Option<&str>) -> Result<Client, DownloadError> {
        let mut builder = Client::builder().user_agent(&config.user_agent);
        if config.timeout > 0 {
            builder = builder.connect_timeout(Duration::from_secs(config.timeout));
        }
        match proxy {
            Some(proxy) => {
                let proxy = Proxy::all(proxy)
                    .map_err(|e| DownloadError::configuration(e.to_string(), "proxy"))?;
                builder = builder.proxy(proxy);
            }
            // Only an explicit proxy is used, environment proxies are ignored.
            None => builder = builder.no_proxy(),
        }
        builder
            .build()
            .map_err(|e| DownloadError::configuration(e.to_string(), "http client"))
    }

    /// A request-level proxy that differs from the configured one gets its own client.
    fn client_for(&self, request: &FetchRequest) -> Result<Client, DownloadError> {
        match request.proxy.as_deref() {
            Some(proxy) if Some(proxy) != self.config.proxy.as_deref() => {
                Self::build_client(&self.config, Some(proxy))
            }
            _ => Ok(self.client.clone()),
        }
    }

    /// Fails `work` with a transport error when it makes no progress for
    /// `timeout` seconds.
    async fn within<T, Fut>(&self, url: &str, work: Fut) -> Result<T, DownloadError>
    where
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        if self.config.timeout == 0 {
            return work.await;
        }
        let limit = Duration::from_secs(self.config.timeout);
        match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(DownloadError::transport(
                url,
                format!("no data received for {}s", limit.as_secs()),
            )),
        }
    }

    async fn send(&self, request: &FetchRequest) -> Result<reqwest::Response, DownloadError> {
        let client = self.client_for(request)?;
        let mut builder = client.get(&request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DownloadError::transport(&request.url, e))?;

        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url: request.url.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_text(&self, request: &FetchRequest) -> Result<String, DownloadError> {
        self.within(&request.url, async {
            let response = self.send(request).await?;
            response
                .text()
                .await
                .map_err(|e| DownloadError::transport(&request.url, e))
        })
        .await
    }

    async fn download(
        &self,
        request: &FetchRequest,
        destination: &Path,
    ) -> Result<u64, DownloadError> {
        let response = self.within(&request.url, self.send(request)).await?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(destination).await?;
        let mut writer = BufWriter::with_capacity(self.config.chunk_size.max(1), file);
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        // The limit applies per chunk, a slow but steady body never times out.
        while let Some(chunk) = self
            .within(&request.url, async { Ok(stream.next().await) })
            .await?
        {
            let chunk = chunk.map_err(|e| DownloadError::transport(&request.url, e))?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        writer.flush().await?;
        Ok(written)
    }
}

/// Payload of a successful [`RetryingFetcher::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// Body of a text request
    Text(String),
    /// Bytes written by a streamed download
    Bytes(u64),
}

/// Wraps a [`Transport`] with a fixed retry budget.
#[derive(Clone)]
pub struct RetryingFetcher {
    transport: Arc<dyn Transport>,
    retry_budget: usize,
    observer: Arc<dyn DownloadObserver>,
}

impl RetryingFetcher {
    /// A retry budget of zero falls back to the default of 3.
    pub fn new(transport: Arc<dyn Transport>, retry_budget: usize) -> Self {
        Self {
            transport,
            retry_budget: normalize_retry_budget(retry_budget),
            observer: TracingObserver::shared(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DownloadObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn retry_budget(&self) -> usize {
        self.retry_budget
    }

    pub fn observer(&self) -> Arc<dyn DownloadObserver> {
        Arc::clone(&self.observer)
    }

    /// Text fetch when `request.destination` is `None`, streamed download otherwise.
    pub async fn fetch(&self, request: &FetchRequest) -> FetchOutcome<Fetched> {
        let result = match request.destination.as_deref() {
            Some(destination) => self.download(request, destination).await.map(Fetched::Bytes),
            None => self.get_text(request).await.map(Fetched::Text),
        };
        match result {
            Ok(value) => FetchOutcome::Success(value),
            Err(e) => FetchOutcome::Failure(e.to_string()),
        }
    }

    pub async fn get_text(&self, request: &FetchRequest) -> Result<String, DownloadError> {
        self.with_retry(request, || self.transport.get_text(request))
            .await
    }

    /// Fetches the body, then hands it to `handler` exactly once.
    pub async fn get_with<H>(&self, request: &FetchRequest, handler: &H) -> Result<H::Output, DownloadError>
    where
        H: ResponseHandler + ?Sized,
    {
        let body = self.get_text(request).await?;
        handler.handle(request.index, &request.url, &body)
    }

    pub async fn download(&self, request: &FetchRequest, destination: &Path) -> Result<u64, DownloadError> {
        self.with_retry(request, || self.transport.download(request, destination))
            .await
    }

    async fn with_retry<T, F, Fut>(&self, request: &FetchRequest, mut attempt: F) -> Result<T, DownloadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        let mut last_error = String::new();

        for attempt_no in 1..=self.retry_budget {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    last_error = e.to_string();
                    self.observer.attempt_failed(
                        request.index,
                        &request.url,
                        attempt_no,
                        self.retry_budget,
                        &last_error,
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(DownloadError::FetchExhausted {
            url: request.url.clone(),
            attempts: self.retry_budget,
            last_error,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FlakyTransport;
    use super::*;
    use crate::core::test_server::TestServer;
    use tempfile::tempdir;

    const URL: &str = "http://x/a.ts";

    #[tokio::test]
    async fn test_exhausted_after_exact_budget() {
        let transport = Arc::new(FlakyTransport::new().failing(URL, usize::MAX));
        let fetcher = RetryingFetcher::new(transport.clone(), 4);

        let result = fetcher.get_text(&FetchRequest::text(0, URL)).await;

        assert_eq!(transport.attempts(URL), 4);
        match result {
            Err(DownloadError::FetchExhausted { url, attempts, .. }) => {
                assert_eq!(url, URL);
                assert_eq!(attempts, 4);
            }
            other => panic!("expected FetchExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_stops_retrying() {
        let transport = Arc::new(FlakyTransport::new().failing(URL, 2));
        let fetcher = RetryingFetcher::new(transport.clone(), 5);

        let body = fetcher.get_text(&FetchRequest::text(0, URL)).await.unwrap();

        assert_eq!(body, FlakyTransport::body_for(URL));
        assert_eq!(transport.attempts(URL), 3);
    }

    #[tokio::test]
    async fn test_zero_budget_uses_default() {
        let transport = Arc::new(FlakyTransport::new().failing(URL, usize::MAX));
        let fetcher = RetryingFetcher::new(transport.clone(), 0);
        assert_eq!(fetcher.retry_budget(), 3);

        let outcome = fetcher.fetch(&FetchRequest::text(0, URL)).await;
        assert!(!outcome.is_success());
        assert_eq!(transport.attempts(URL), 3);
    }

    #[tokio::test]
    async fn test_handler_error_is_not_retried() {
        let transport = Arc::new(FlakyTransport::new());
        let fetcher = RetryingFetcher::new(transport.clone(), 3);
        let handler = |_: usize, url: &str, _: &str| -> Result<(), DownloadError> {
            Err(DownloadError::Transform {
                url: url.to_string(),
                message: "no link".into(),
            })
        };

        let result = fetcher.get_with(&FetchRequest::text(7, URL), &handler).await;

        assert!(matches!(result, Err(DownloadError::Transform { .. })));
        assert_eq!(transport.attempts(URL), 1);
    }

    #[tokio::test]
    async fn test_download_writes_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a.ts");
        let transport = Arc::new(FlakyTransport::new().failing(URL, 1));
        let fetcher = RetryingFetcher::new(transport, 2);

        let outcome = fetcher.fetch(&FetchRequest::download(0, URL, &dest)).await;

        let expected = FlakyTransport::body_for(URL);
        assert_eq!(outcome, FetchOutcome::Success(Fetched::Bytes(expected.len() as u64)));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), expected);
    }

    #[test]
    fn test_transport_config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(HttpTransport::new(config).is_ok());
    }

    fn short_timeout() -> TransportConfig {
        TransportConfig {
            timeout: 1,
            ..TransportConfig::default()
        }
    }

    #[tokio::test]
    async fn test_slow_body_within_stall_limit_completes() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("slow.ts");
        let server = TestServer::start();
        server.route_trickle("slow.ts", "AAAABBBBCCCCDDDD", Duration::from_millis(400));
        let transport = HttpTransport::new(short_timeout()).unwrap();

        // Four pieces 400ms apart take longer than the 1s limit in total.
        let written = transport
            .download(&FetchRequest::download(0, server.url("slow.ts"), &dest), &dest)
            .await
            .unwrap();

        assert_eq!(written, 16);
        assert_eq!(std::fs::read(&dest).unwrap(), b"AAAABBBBCCCCDDDD");
    }

    #[tokio::test]
    async fn test_stalled_body_is_transport_error() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("stalled.ts");
        let server = TestServer::start();
        server.route_trickle("stalled.ts", "AAAABBBB", Duration::from_millis(1600));
        let transport = HttpTransport::new(short_timeout()).unwrap();

        let err = transport
            .download(&FetchRequest::download(0, server.url("stalled.ts"), &dest), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Transport { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invalid_proxy_is_configuration_error() {
        let config = TransportConfig {
            proxy: Some("::not a proxy::".into()),
            ..TransportConfig::default()
        };
        let err = HttpTransport::new(config).unwrap_err();
        assert!(matches!(err, DownloadError::Configuration { .. }));
    }
}
