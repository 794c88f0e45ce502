//! Periodic GET against an external URL, independent of the dispatch loop.

use std::time::Duration;

use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Request timeout for one ping.
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before the first ping.
pub const INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Spawn the pinger. Returns `None` when no URL is configured.
pub fn spawn(
    client: Client,
    url: Option<String>,
    initial_delay: Duration,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    let url = url.filter(|u| !u.trim().is_empty())?;
    info!(url = %url, interval_secs = interval.as_secs(), "keepalive_starting");

    Some(tokio::spawn(async move {
        tokio::time::sleep(initial_delay).await;
        loop {
            ping(&client, &url).await;
            tokio::time::sleep(interval).await;
        }
    }))
}

/// One ping. Failures are logged and otherwise ignored.
pub async fn ping(client: &Client, url: &str) -> bool {
    match client.get(url).timeout(PING_TIMEOUT).send().await {
        Ok(resp) => {
            info!(url = %url, status_code = resp.status().as_u16(), "keepalive_ping");
            true
        }
        Err(e) => {
            warn!(url = %url, error = %e, "keepalive_ping_failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn count(State(hits): State<Arc<AtomicUsize>>) -> &'static str {
        hits.fetch_add(1, Ordering::SeqCst);
        "ok"
    }

    async fn spawn_target() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route("/", get(count)).with_state(hits.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/"), hits)
    }

    #[test]
    fn test_disabled_without_url() {
        assert!(spawn(Client::new(), None, Duration::ZERO, Duration::from_secs(1)).is_none());
        assert!(spawn(Client::new(), Some(" ".to_string()), Duration::ZERO, Duration::from_secs(1)).is_none());
    }

    #[tokio::test]
    async fn test_pings_repeatedly() {
        let (url, hits) = spawn_target().await;
        let handle = spawn(
            Client::new(),
            Some(url),
            Duration::from_millis(10),
            Duration::from_millis(20),
        )
        .unwrap();

        for _ in 0..200 {
            if hits.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert!(hits.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_unreachable_target_is_swallowed() {
        // Bind then drop so the port is closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(!ping(&Client::new(), &format!("http://{addr}/")).await);
    }
}
