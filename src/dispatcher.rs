// src/dispatcher.rs

use futures_util::StreamExt;
use log::{debug, info};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::cache::tmp_path;
use crate::integrity::verify_sha256;
use crate::request::{ManifestRequest, TransferRequest};
use crate::transport::{TransferError, Transport};

/// Options for the network dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportOptions {
    /// Base url manifest endpoints are resolved against.
    pub base_url: String,
    /// Extra attempts after a timeout, connection failure or 5xx.
    pub retries: usize,
    pub timeout: Duration,
    /// Delay before the first retry; doubled for each one after.
    pub initial_backoff: Duration,
    /// Transfers allowed to run at once.
    pub max_concurrent: usize,
    pub user_agent: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            base_url: "https://live.adserver.example/".to_string(),
            retries: 2,
            timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_secs(1),
            max_concurrent: 2,
            user_agent: format!("asset_loader/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Network dispatcher backed by a shared [`reqwest::Client`].
pub struct HttpDispatcher {
    client: Client,
    base_url: Url,
    options: TransportOptions,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    runtime: Handle,
}

impl HttpDispatcher {
    pub fn new(options: TransportOptions, runtime: Handle) -> Result<Self, TransferError> {
        let base_url =
            Url::parse(&options.base_url).map_err(|e| TransferError::InvalidUrl(e.to_string()))?;
        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .timeout(options.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url,
            permits: Arc::new(Semaphore::new(options.max_concurrent.max(1))),
            shutdown: CancellationToken::new(),
            runtime,
            options,
        })
    }

    /// Aborts running transfers and rejects new ones.
    ///
    /// Requests cut short this way are delivered as [`TransferError::Shutdown`].
    pub fn shutdown(&self) {
        info!("dispatcher shutting down");
        self.shutdown.cancel();
        self.permits.close();
    }
}

impl Transport for HttpDispatcher {
    fn submit_transfer(&self, request: Arc<TransferRequest>) {
        let client = self.client.clone();
        let options = self.options.clone();
        let permits = self.permits.clone();
        let shutdown = self.shutdown.clone();

        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                request.deliver(Err(TransferError::Shutdown));
                return;
            };
            if !request.begin() {
                debug!("transfer {} was canceled before it started", request.id());
                return;
            }
            let result = tokio::select! {
                result = with_retries(&options, || download(&client, &request)) => result,
                _ = shutdown.cancelled() => Err(TransferError::Shutdown),
            };
            request.deliver(result);
        });
    }

    fn submit_manifest(&self, request: Arc<ManifestRequest>) -> Result<(), TransferError> {
        if self.shutdown.is_cancelled() {
            return Err(TransferError::Shutdown);
        }
        let url = self
            .base_url
            .join(request.endpoint())
            .map_err(|e| TransferError::InvalidUrl(e.to_string()))?;
        let client = self.client.clone();
        let options = self.options.clone();
        let shutdown = self.shutdown.clone();

        self.runtime.spawn(async move {
            let result = tokio::select! {
                result = with_retries(&options, || fetch_manifest(&client, url.clone(), request.body())) => result,
                _ = shutdown.cancelled() => Err(TransferError::Shutdown),
            };
            request.deliver(result);
        });
        Ok(())
    }
}

fn is_retryable(error: &TransferError) -> bool {
    match error {
        TransferError::Network(e) => e.is_timeout() || e.is_connect(),
        TransferError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
        _ => false,
    }
}

async fn with_retries<T, F, Fut>(options: &TransportOptions, mut attempt: F) -> Result<T, TransferError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransferError>>,
{
    let mut backoff = options.initial_backoff;
    let mut attempts = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if attempts < options.retries && is_retryable(&e) => {
                attempts += 1;
                debug!("attempt {} failed ({}), retrying in {:?}", attempts, e, backoff);
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Downloads into the partial file, verifies it and moves it into place.
async fn download(client: &Client, request: &TransferRequest) -> Result<(), TransferError> {
    let destination = request.destination();
    let partial = tmp_path(destination);

    let mut result = write_body(client, request.url(), &partial).await;
    if result.is_ok() {
        if let Some(expected) = request.item().descriptor().sha256.as_deref() {
            result = verify_sha256(&partial, expected).await.map_err(TransferError::from);
        }
    }
    match result {
        Ok(()) => {
            fs::rename(&partial, destination).await?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

async fn write_body(client: &Client, url: &str, partial: &std::path::Path) -> Result<(), TransferError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(TransferError::Status(status.as_u16()));
    }

    let mut file = File::create(partial).await?;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        file.write_all(&bytes).await?;
    }
    file.flush().await?;
    Ok(())
}

async fn fetch_manifest(client: &Client, url: Url, body: &Value) -> Result<Value, TransferError> {
    let resp = client.post(url).json(body).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(TransferError::Status(status.as_u16()));
    }
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
