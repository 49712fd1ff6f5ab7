use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{info, instrument};

use super::{endpoint, send_with_retry, RetryPolicy, TOKEN_HEADER};
use crate::config::Config;

/// Download the finished export `file_id` to `dest`, streaming the body to disk.
/// Returns the path written.
#[instrument(level = "info", skip(client, cfg, token, dest), fields(dest = %dest.as_ref().display()))]
pub async fn download_revisions(
    client: &Client,
    cfg: &Config,
    token: &str,
    file_id: &str,
    dest: impl AsRef<Path>,
) -> Result<PathBuf> {
    let dest_path = dest.as_ref().to_path_buf();
    if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut url = endpoint(&cfg.base_url, "rest/ng/audit/revisions-file")?;
    url.query_pairs_mut().append_pair("fileId", file_id);
    let policy = RetryPolicy {
        max_retries: cfg.max_retries,
        initial_backoff_ms: cfg.initial_backoff_ms,
    };

    let resp = send_with_retry("revisions-file", policy, || {
        client.get(url.clone()).header(TOKEN_HEADER, token)
    })
    .await?;

    let mut file = fs::File::create(&dest_path)
        .await
        .with_context(|| format!("creating {:?}", dest_path))?;
    let mut stream = resp.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("reading revisions-file body")?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    info!(bytes = written, "downloaded export archive");
    Ok(dest_path)
}
