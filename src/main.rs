use anyhow::{Context, Result};
use cpaudit::{
    config::Config,
    fetch::{self, ExportWindow},
    process::{self, write},
};
use std::fs;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) configuration ────────────────────────────────────────────
    let cfg = Config::load()?;
    let cp_id = cfg.cp_id.context("cp_id missing")?;
    let window = ExportWindow::from_dates(&cfg.start_date, &cfg.end_date)?;
    fs::create_dir_all(&cfg.out_dir)
        .with_context(|| format!("creating output dir {:?}", cfg.out_dir))?;
    info!(cp_id, start = %cfg.start_date, end = %cfg.end_date, "exporting audit revisions");

    // ─── 3) login + trigger export ───────────────────────────────────
    let client = fetch::build_client()?;
    let token = fetch::login(&client, &cfg).await?;
    let Some(file_id) = fetch::request_export(&client, &cfg, &token, cp_id, window).await? else {
        warn!("export is running in the background; re-run later to fetch it");
        return Ok(());
    };

    // ─── 4) download archive ─────────────────────────────────────────
    let zip_path =
        fetch::download_revisions(&client, &cfg, &token, &file_id, cfg.zip_path(cp_id)).await?;
    info!("downloaded {}", zip_path.display());

    // ─── 5) pivot on the blocking pool ───────────────────────────────
    let table = tokio::task::spawn_blocking({
        let zip_path = zip_path.clone();
        let columns = cfg.columns.clone();
        move || process::pivot_zip(&zip_path, &columns)
    })
    .await?
    .with_context(|| format!("pivoting {}", zip_path.display()))?;

    // ─── 6) write outputs ────────────────────────────────────────────
    let csv_path = cfg.pivot_csv_path(cp_id);
    write::write_csv_file(&table, &csv_path)?;
    info!("wrote {}", csv_path.display());

    if cfg.parquet {
        let pq_path = cfg.pivot_parquet_path(cp_id);
        write::write_parquet_file(&table, &pq_path)?;
        info!("wrote {}", pq_path.display());
    }

    info!(
        revisions = table.rows.len(),
        columns = table.columns.len(),
        "all done"
    );
    Ok(())
}
