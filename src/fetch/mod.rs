// src/fetch/mod.rs
pub mod export;
pub mod session;
pub mod zips;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};
use url::Url;

pub use export::{request_export, ExportWindow};
pub use session::login;
pub use zips::download_revisions;

/// Ceiling for a single retry delay.
const MAX_BACKOFF_MS: u64 = 60_000;

/// Header carrying the session token on every authenticated call.
pub const TOKEN_HEADER: &str = "X-OS-API-TOKEN";

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 0,
        }
    }
}

pub fn build_client() -> Result<Client> {
    Client::builder()
        .cookie_store(true)
        .build()
        .context("building HTTP client")
}

/// Join `path` onto the service base URL, tolerating a trailing slash.
pub fn endpoint(base_url: &str, path: &str) -> Result<Url> {
    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).with_context(|| format!("parsing endpoint URL {}", joined))
}

/// Turn a non-success response into an error carrying status and body.
async fn check_status(what: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    bail!("{} failed: HTTP {} - {}", what, status.as_u16(), body.trim())
}

/// Delay before retry number `attempt` (1-based): doubles each time, capped.
fn backoff_ms(initial_backoff_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    initial_backoff_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

/// Send the request built by `build`, retrying transport errors and 5xx
/// responses with exponential backoff. 4xx responses fail immediately.
pub(crate) async fn send_with_retry<F>(what: &str, policy: RetryPolicy, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempts = 0;
    loop {
        let err = match build().send().await {
            Ok(resp) if !resp.status().is_server_error() => return check_status(what, resp).await,
            Ok(resp) => anyhow!("{} failed: HTTP {}", what, resp.status().as_u16()),
            Err(e) => anyhow::Error::new(e).context(format!("{} failed", what)),
        };

        if attempts >= policy.max_retries {
            error!(what, attempts, error = %err, "exhausted retries");
            return Err(err);
        }
        attempts += 1;
        let backoff = backoff_ms(policy.initial_backoff_ms, attempts);
        warn!(what, attempt = attempts, delay_ms = backoff, error = %err, "retrying");
        sleep(Duration::from_millis(backoff)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    /// Serve `responses` in order on a loopback port, repeating the last one.
    /// Returns the base URL and a counter of requests handled.
    async fn scripted_server(responses: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let reply = responses[n.min(responses.len() - 1)].clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match sock.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(k) => buf.extend_from_slice(&chunk[..k]),
                        }
                    }
                    let _ = sock.write_all(reply.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });

        (format!("http://{}", addr), hits)
    }

    fn quick_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn server_error_is_retried_until_success() -> Result<()> {
        let (base, hits) = scripted_server(vec![
            http_response("503 Service Unavailable", "busy"),
            http_response("200 OK", "ok"),
        ])
        .await;
        let client = build_client()?;
        let url = endpoint(&base, "rest/ng/sessions")?;

        let resp = send_with_retry("login", quick_policy(3), || client.get(url.clone())).await?;
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.text().await?, "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn client_error_fails_on_first_attempt() -> Result<()> {
        let (base, hits) =
            scripted_server(vec![http_response("404 Not Found", "no such file")]).await;
        let client = build_client()?;
        let url = endpoint(&base, "rest/ng/audit/revisions-file")?;

        let err = send_with_retry("revisions-file", quick_policy(3), || client.get(url.clone()))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("404"), "{}", msg);
        assert!(msg.contains("no such file"), "{}", msg);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn persistent_server_error_exhausts_retries() -> Result<()> {
        let (base, hits) =
            scripted_server(vec![http_response("502 Bad Gateway", "")]).await;
        let client = build_client()?;
        let url = endpoint(&base, "rest/ng/sessions")?;

        let err = send_with_retry("login", quick_policy(2), || client.get(url.clone()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("502"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(0, 200), 0);
        assert_eq!(backoff_ms(500, 100), MAX_BACKOFF_MS);
        assert_eq!(backoff_ms(u64::MAX, 2), MAX_BACKOFF_MS);
    }

    #[test]
    fn endpoint_joins_with_single_slash() -> Result<()> {
        assert_eq!(
            endpoint("https://demo.openspecimen.org/", "/rest/ng/sessions")?.as_str(),
            "https://demo.openspecimen.org/rest/ng/sessions"
        );
        assert_eq!(
            endpoint("https://host.example/openspecimen", "rest/ng/audit/export-revisions")?
                .as_str(),
            "https://host.example/openspecimen/rest/ng/audit/export-revisions"
        );
        Ok(())
    }

    #[test]
    fn endpoint_rejects_garbage_base() {
        assert!(endpoint("not a url", "rest/ng/sessions").is_err());
    }

    #[tokio::test]
    async fn unreachable_host_gives_up_after_retries() {
        let client = build_client().unwrap();
        let url = endpoint("http://127.0.0.1:9", "rest/ng/sessions").unwrap();
        let policy = RetryPolicy {
            max_retries: 1,
            initial_backoff_ms: 1,
        };
        let res = send_with_retry("login", policy, || client.get(url.clone())).await;
        assert!(res.is_err());
    }
}
