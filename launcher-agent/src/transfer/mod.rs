//! Streaming downloads from the update server.
//!
//! The response body is written to disk chunk-by-chunk; the whole payload
//! is never buffered in memory. Progress is reported as an integer
//! percentage when the server sends a Content-Length, and skipped (but
//! the transfer still completes) when it does not.

pub mod progress;

use crate::utils::{Result, UpdateError};
use bytes::Bytes;
use futures_util::StreamExt;
use progress::{format_bytes, format_speed, ProgressTracker};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callback for integer-percent progress updates
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Download `url` to `dest`, streaming chunks straight to disk.
///
/// On any failure or cancellation the partially written destination file
/// is removed; a file at `dest` after a successful return is complete.
/// The callback fires once per received chunk (when a Content-Length is
/// available) and must not block.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    on_progress: Option<ProgressCallback>,
    cancel: &CancellationToken,
) -> Result<()> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| UpdateError::Transfer(format!("{}: {}", url, e)))?;

    if !resp.status().is_success() {
        return Err(UpdateError::Transfer(format!(
            "{} returned HTTP {}",
            url,
            resp.status()
        )));
    }

    let total_bytes = resp.content_length();
    match total_bytes {
        Some(total) => debug!("Downloading {} ({})", url, format_bytes(total)),
        None => debug!("Downloading {} (unknown size)", url),
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;

    let mut tracker = ProgressTracker::new(total_bytes);
    let mut received: u64 = 0;
    let mut stream = resp.bytes_stream();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Download of {} cancelled, discarding partial file", url);
                drop(file);
                discard(dest).await;
                return Err(UpdateError::Cancelled);
            }
            chunk = stream.next() => chunk,
        };

        let chunk: Bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                drop(file);
                discard(dest).await;
                return Err(UpdateError::Transfer(format!("{}: {}", url, e)));
            }
            None => break,
        };

        if let Err(e) = file.write_all(&chunk).await {
            drop(file);
            discard(dest).await;
            return Err(UpdateError::FileSystem(e));
        }

        received += chunk.len() as u64;
        let progress = tracker.update(received);
        if let (Some(percent), Some(cb)) = (progress.percent(), on_progress.as_ref()) {
            cb(percent);
        }
    }

    if let Err(e) = file.flush().await {
        drop(file);
        discard(dest).await;
        return Err(UpdateError::FileSystem(e));
    }
    drop(file);

    // A body shorter than the advertised length is an aborted transfer,
    // not a complete file.
    if let Some(total) = total_bytes {
        if received != total {
            discard(dest).await;
            return Err(UpdateError::Transfer(format!(
                "{}: received {} of {} bytes",
                url, received, total
            )));
        }
    }

    info!(
        "Downloaded {} ({}, avg {})",
        url,
        format_bytes(received),
        format_speed(tracker.average_speed())
    );
    Ok(())
}

async fn discard(dest: &Path) {
    if let Err(e) = tokio::fs::remove_file(dest).await {
        warn!("Failed to remove partial file {}: {}", dest.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, response::Response, routing::get, Router};
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_fetch_writes_complete_file_and_reports_progress() {
        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let body = payload.clone();
        let app = Router::new().route("/patch.zip", get(move || async move { body }));
        let base = serve(app).await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("patch.zip");

        let last_percent = Arc::new(AtomicU8::new(0));
        let seen = last_percent.clone();
        let cb: ProgressCallback = Arc::new(move |p| seen.store(p, Ordering::SeqCst));

        let client = reqwest::Client::new();
        fetch(
            &client,
            &format!("{}/patch.zip", base),
            &dest,
            Some(cb),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // File length equals the advertised Content-Length
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
        assert_eq!(last_percent.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn test_fetch_without_content_length_still_completes() {
        let app = Router::new().route(
            "/stream",
            get(|| async {
                let chunks: Vec<std::io::Result<&'static [u8]>> =
                    vec![Ok(b"hello "), Ok(b"world")];
                // Streamed body of unknown length: no Content-Length
                Response::builder()
                    .body(Body::from_stream(futures_util::stream::iter(chunks)))
                    .unwrap()
            }),
        );
        let base = serve(app).await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.bin");

        let called = Arc::new(AtomicU8::new(0));
        let seen = called.clone();
        let cb: ProgressCallback = Arc::new(move |_| {
            seen.store(1, Ordering::SeqCst);
        });

        let client = reqwest::Client::new();
        fetch(
            &client,
            &format!("{}/stream", base),
            &dest,
            Some(cb),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
        // No Content-Length, so percentage reporting is skipped entirely
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_success_status_is_transfer_error() {
        let app = Router::new();
        let base = serve(app).await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("missing.zip");

        let client = reqwest::Client::new();
        let err = fetch(
            &client,
            &format!("{}/missing.zip", base),
            &dest,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, UpdateError::Transfer(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_cancellation_discards_partial_file() {
        // Endpoint that trickles chunks forever
        let app = Router::new().route(
            "/slow",
            get(|| async {
                let stream = futures_util::stream::unfold(0u64, |n| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Some((std::io::Result::Ok(vec![0u8; 1024]), n + 1))
                });
                Response::builder()
                    .body(Body::from_stream(stream))
                    .unwrap()
            }),
        );
        let base = serve(app).await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("slow.bin");

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let client = reqwest::Client::new();
        let err = fetch(&client, &format!("{}/slow", base), &dest, None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::Cancelled));
        assert!(!dest.exists());
    }
}
