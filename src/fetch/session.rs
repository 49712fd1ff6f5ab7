// src/fetch/session.rs
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{endpoint, send_with_retry, RetryPolicy};
use crate::config::Config;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    login_name: &'a str,
    password: &'a str,
    domain_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Open a session and return its API token.
#[instrument(level = "info", skip(client, cfg), fields(user = %cfg.username))]
pub async fn login(client: &Client, cfg: &Config) -> Result<String> {
    let url = endpoint(&cfg.base_url, "rest/ng/sessions")?;
    let body = LoginRequest {
        login_name: &cfg.username,
        password: &cfg.password,
        domain_name: &cfg.domain,
    };
    let policy = RetryPolicy {
        max_retries: cfg.max_retries,
        initial_backoff_ms: cfg.initial_backoff_ms,
    };

    let resp = send_with_retry("login", policy, || client.post(url.clone()).json(&body)).await?;
    let session: LoginResponse = resp.json().await.context("decoding login response")?;
    info!("session opened");
    Ok(session.token)
}
