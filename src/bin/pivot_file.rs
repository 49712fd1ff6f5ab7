//! Pivot an already-downloaded revisions export without touching the network.
//!
//! `ZIP_PATH` (export archive) or `CSV_PATH` (raw revisions CSV) selects the
//! input; `OUT_PATH` sets the CSV output (default: input stem + `_pivot.csv`).
//! `PARQUET=true` also writes a Parquet copy next to it.
use anyhow::{bail, Result};
use cpaudit::process::{self, write, ColumnNames};
use std::{
    env,
    path::{Path, PathBuf},
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn default_out(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "revisions".to_string());
    input.with_file_name(format!("{}_pivot.csv", stem))
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let columns = ColumnNames::default();
    let (input, table) = match (env::var("ZIP_PATH"), env::var("CSV_PATH")) {
        (Ok(zip), _) => {
            let p = PathBuf::from(zip);
            let t = process::pivot_zip(&p, &columns)?;
            (p, t)
        }
        (_, Ok(csv)) => {
            let p = PathBuf::from(csv);
            let t = process::pivot_csv_file(&p, &columns)?;
            (p, t)
        }
        _ => bail!("set ZIP_PATH or CSV_PATH"),
    };

    let out = env::var("OUT_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_out(&input));
    write::write_csv_file(&table, &out)?;
    info!(
        "✔ {} revisions × {} fields → {}",
        table.rows.len(),
        table.columns.len(),
        out.display()
    );

    if env::var("PARQUET").map(|v| v == "true").unwrap_or(false) {
        let pq = out.with_extension("parquet");
        write::write_parquet_file(&table, &pq)?;
        info!("✔ parquet → {}", pq.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            default_out(Path::new("/tmp/cp_7_audit.zip")),
            PathBuf::from("/tmp/cp_7_audit_pivot.csv")
        );
    }
}
