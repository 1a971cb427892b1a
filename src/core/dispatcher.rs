//! Bounded concurrent dispatch of fetch requests
//!
//! Every request of a batch is attempted exactly once at this level (the
//! fetcher owns intra-request retries). A counting semaphore caps how many
//! requests are in flight; one failure never cancels its siblings. Outcomes
//! are keyed by request index, never by completion order.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::core::error_handling::DownloadError;
use crate::core::fetcher::{ResponseHandler, RetryingFetcher};
use crate::core::models::{FetchOutcome, FetchRequest};
use crate::core::observer::DownloadObserver;
use crate::utils::file_utils::human_size;

/// Outcomes of one batch, keyed by request index
pub type Outcomes<T> = BTreeMap<usize, FetchOutcome<T>>;

pub struct BoundedDispatcher {
    fetcher: RetryingFetcher,
    concurrency: usize,
    observer: Arc<dyn DownloadObserver>,
}

impl BoundedDispatcher {
    pub fn new(fetcher: RetryingFetcher, concurrency: usize) -> Result<Self, DownloadError> {
        if concurrency == 0 {
            return Err(DownloadError::configuration(
                "concurrency limit must be at least 1",
                "concurrency",
            ));
        }
        let observer = fetcher.observer();
        Ok(Self {
            fetcher,
            concurrency,
            observer,
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn fetcher(&self) -> &RetryingFetcher {
        &self.fetcher
    }

    /// Runs `op` for every request with at most `concurrency` running at once
    /// and waits for all of them.
    pub async fn run_all<T, F, Fut>(&self, requests: Vec<FetchRequest>, op: F) -> Outcomes<T>
    where
        T: Send + 'static,
        F: Fn(RetryingFetcher, FetchRequest) -> Fut,
        Fut: Future<Output = Result<(T, String), DownloadError>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(requests.len());

        for request in requests {
            let semaphore = Arc::clone(&semaphore);
            let observer = Arc::clone(&self.observer);
            let index = request.index;
            let url = request.url.clone();
            let work = op(self.fetcher.clone(), request);

            let handle = tokio::spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => match work.await {
                        Ok((value, summary)) => {
                            observer.request_finished(index, &url, Ok(&summary));
                            FetchOutcome::Success(value)
                        }
                        Err(e) => {
                            let cause = e.to_string();
                            observer.request_finished(index, &url, Err(&cause));
                            FetchOutcome::Failure(cause)
                        }
                    },
                    Err(e) => FetchOutcome::Failure(e.to_string()),
                };
                (index, outcome)
            });
            handles.push((index, handle));
        }

        let mut outcomes = BTreeMap::new();
        for (index, handle) in handles {
            match handle.await {
                Ok((index, outcome)) => {
                    outcomes.insert(index, outcome);
                }
                Err(e) => {
                    outcomes.insert(index, FetchOutcome::Failure(format!("task aborted: {e}")));
                }
            }
        }
        outcomes
    }

    /// GET every request and pass each body to `handler`.
    pub async fn get_all<H>(&self, requests: Vec<FetchRequest>, handler: Arc<H>) -> Outcomes<H::Output>
    where
        H: ResponseHandler,
        H::Output: std::fmt::Debug,
    {
        self.run_all(requests, move |fetcher, request| {
            let handler = Arc::clone(&handler);
            async move {
                let value = fetcher.get_with(&request, handler.as_ref()).await?;
                let summary = format!("{value:?}");
                Ok::<_, DownloadError>((value, summary))
            }
        })
        .await
    }

    /// Streams every `urls[i]` into `destinations[i]`.
    ///
    /// Mismatched lengths are rejected before any request is issued.
    pub async fn download_all(
        &self,
        urls: &[String],
        destinations: &[PathBuf],
        headers: &HashMap<String, String>,
        proxy: Option<&str>,
    ) -> Result<Outcomes<u64>, DownloadError> {
        if urls.len() != destinations.len() {
            return Err(DownloadError::configuration(
                format!(
                    "urls and destinations must have the same length, got {} and {}",
                    urls.len(),
                    destinations.len()
                ),
                "destinations",
            ));
        }

        let requests = urls
            .iter()
            .zip(destinations)
            .enumerate()
            .map(|(index, (url, destination))| {
                FetchRequest::download(index, url.clone(), destination.clone())
                    .with_headers(headers.clone())
                    .with_proxy(proxy.map(str::to_string))
            })
            .collect();

        Ok(self
            .run_all(requests, |fetcher, request| async move {
                let destination = request.destination.clone().unwrap_or_default();
                let bytes = fetcher.download(&request, &destination).await?;
                Ok::<_, DownloadError>((bytes, human_size(bytes as f64)))
            })
            .await)
    }
}
