#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use asset_loader::prelude::*;
use tokio::sync::mpsc;

/// Transport that records submissions and leaves completion to the test.
#[derive(Default)]
pub struct MockTransport {
    pub transfers: Mutex<Vec<Arc<TransferRequest>>>,
    pub manifests: Mutex<Vec<Arc<ManifestRequest>>>,
    pub reject_manifests: AtomicBool,
}

impl Transport for MockTransport {
    fn submit_transfer(&self, request: Arc<TransferRequest>) {
        self.transfers.lock().unwrap().push(request);
    }

    fn submit_manifest(&self, request: Arc<ManifestRequest>) -> Result<(), TransferError> {
        if self.reject_manifests.load(Ordering::SeqCst) {
            return Err(TransferError::Shutdown);
        }
        self.manifests.lock().unwrap().push(request);
        Ok(())
    }
}

impl MockTransport {
    pub fn transfer_count(&self) -> usize {
        self.transfers.lock().unwrap().len()
    }

    pub fn last_transfer(&self) -> Arc<TransferRequest> {
        self.transfers.lock().unwrap().last().cloned().unwrap()
    }
}

/// Runs a submitted transfer to completion the way a dispatcher would.
pub fn complete(request: &Arc<TransferRequest>, ok: bool) {
    assert!(request.begin(), "transfer {} was canceled", request.id());
    let result = if ok { Ok(()) } else { Err(TransferError::Status(500)) };
    request.deliver(result);
}

pub fn downloader(dir: &Path) -> (Arc<Downloader>, Arc<MockTransport>) {
    downloader_with(dir, Arc::new(LogDiagnostics))
}

pub fn downloader_with(
    dir: &Path,
    diagnostics: Arc<dyn Diagnostics>,
) -> (Arc<Downloader>, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::default());
    let downloader = Downloader::new(
        transport.clone(),
        Arc::new(DiskCache::new(dir)),
        ConfigHandle::new(SdkConfig::default()),
        diagnostics,
        CallbackExecutor::current(),
    );
    (downloader, transport)
}

/// Keeps every reported failure, rendered as text.
#[derive(Default)]
pub struct RecordingDiagnostics {
    pub assets: Mutex<Vec<(String, String, String)>>,
    pub manifests: Mutex<Vec<(PrefetchMode, String)>>,
}

impl Diagnostics for RecordingDiagnostics {
    fn asset_failed(&self, label: &str, url: &str, error: &TransferError) {
        self.assets
            .lock()
            .unwrap()
            .push((label.to_string(), url.to_string(), error.to_string()));
    }

    fn manifest_failed(&self, mode: PrefetchMode, error: &TransferError) {
        self.manifests.lock().unwrap().push((mode, error.to_string()));
    }
}

pub fn image(name: &str) -> AssetDescriptor {
    AssetDescriptor::new("images", name, format!("https://cdn.example/{name}"))
}

pub fn video(name: &str) -> AssetDescriptor {
    AssetDescriptor::new("videos", name, format!("https://cdn.example/{name}"))
}

/// A batch callback paired with the receiving end of its results.
pub fn callback_channel() -> (BatchCallback, mpsc::UnboundedReceiver<bool>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: BatchCallback = Box::new(move |ok| {
        let _ = tx.send(ok);
    });
    (callback, rx)
}

/// Waits for the next callback result, failing the test after a few seconds.
pub async fn next_result(rx: &mut mpsc::UnboundedReceiver<bool>) -> Option<bool> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("callback never fired")
}

/// Asserts nothing else arrives on the channel.
pub async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<bool>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "unexpected extra callback");
}

/// Polls `check` until it holds or a few seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }
}

/// Minimal HTTP/1.1 server on an ephemeral port. Returns its base url.
///
/// `route` gets the method, the path and the request body.
pub fn test_server<F>(route: F) -> String
where
    F: Fn(&str, &str, &[u8]) -> Response + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let route = Arc::new(route);
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let route = route.clone();
            std::thread::spawn(move || handle_connection(stream, route.as_ref()));
        }
    });
    format!("http://{}", addr)
}

fn handle_connection<F>(mut stream: TcpStream, route: &F)
where
    F: Fn(&str, &str, &[u8]) -> Response,
{
    let mut reader = BufReader::new(&mut stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0; content_length];
    if reader.read_exact(&mut body).is_err() {
        return;
    }
    drop(reader);

    let response = route(&method, &path, &body);
    let head = format!(
        "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        response.body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&response.body);
}
