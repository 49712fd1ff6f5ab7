// src/fetch/export.rs
use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate, TimeZone};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

use super::{endpoint, send_with_retry, RetryPolicy, TOKEN_HEADER};
use crate::config::Config;

/// Milliseconds to add to the end date's midnight so the whole day is covered.
const END_OF_DAY_MS: i64 = 86_399_999;

/// Inclusive export window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl ExportWindow {
    /// Build from `YYYY-MM-DD` dates, interpreted at local midnight.
    pub fn from_dates(start: &str, end: &str) -> Result<Self> {
        let start_ms = local_midnight_ms(start)?;
        let end_ms = local_midnight_ms(end)? + END_OF_DAY_MS;
        if end_ms < start_ms {
            bail!("end date {} is before start date {}", end, start);
        }
        Ok(Self { start_ms, end_ms })
    }
}

fn local_midnight_ms(date: &str) -> Result<i64> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date {:?}, expected YYYY-MM-DD", date))?;
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("no midnight for {}", day))?;
    let local = Local
        .from_local_datetime(&midnight)
        .earliest()
        .ok_or_else(|| anyhow!("local midnight does not exist for {}", day))?;
    Ok(local.timestamp_millis())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportRequest<'a> {
    start_date: i64,
    end_date: i64,
    record_ids: Vec<u64>,
    entities: &'a [String],
    include_modified_props: bool,
}

/// The service answers with `fileId` when the export is ready now, and
/// without it when the job was deferred to the background.
fn file_id_from(resp: &Value) -> Option<String> {
    match resp.get("fileId")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Ask the service to export revisions of one record. `None` means the export
/// is running in the background and this run cannot continue.
#[instrument(level = "info", skip(client, cfg, token))]
pub async fn request_export(
    client: &Client,
    cfg: &Config,
    token: &str,
    cp_id: u64,
    window: ExportWindow,
) -> Result<Option<String>> {
    let url = endpoint(&cfg.base_url, "rest/ng/audit/export-revisions")?;
    let body = ExportRequest {
        start_date: window.start_ms,
        end_date: window.end_ms,
        record_ids: vec![cp_id],
        entities: &cfg.entities,
        include_modified_props: true,
    };

    // not retried: a repeated POST would queue a second export job
    let resp = send_with_retry("export-revisions", RetryPolicy::none(), || {
        client
            .post(url.clone())
            .header(TOKEN_HEADER, token)
            .json(&body)
    })
    .await?;
    let payload: Value = resp.json().await.context("decoding export response")?;

    let file_id = file_id_from(&payload);
    match &file_id {
        Some(id) => info!(file_id = %id, "export ready"),
        None => info!("export running in background"),
    }
    Ok(file_id)
}
