// src/process/mod.rs
pub mod pivot;
pub mod revision;
pub mod tokenize;
pub mod write;

use std::{
    fs::File,
    io::{Cursor, Read},
    path::Path,
};
use tracing::{debug, info, instrument};
use zip::ZipArchive;

pub use pivot::{pivot_revisions, PivotBuilder, PivotRow, PivotTable, RevisionKey, KEY_COLUMNS};
pub use revision::{read_revisions, ColumnNames, RawRevisionRow, RevisionReader};
pub use tokenize::{tokenize, FieldChange};

/// Upper bound on the buffer reserved from an archive entry's declared size.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

fn prealloc_hint(declared: u64) -> usize {
    declared.min(MAX_PREALLOC) as usize
}

/// The input could not be read as a revisions table at all.
#[derive(Debug, thiserror::Error)]
pub enum RevisionError {
    #[error("reading revisions: {0}")]
    Io(#[from] std::io::Error),

    #[error("revisions CSV is malformed: {0}")]
    Csv(#[from] csv::Error),

    #[error("revisions archive is unreadable: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("no .csv entry in archive {0}")]
    NoCsvEntry(String),
}

/// Stream a revisions CSV straight into the pivot builder.
///
/// Rows are not retained; only the per-revision field maps are.
pub fn pivot_csv<R: Read>(reader: R, names: &ColumnNames) -> Result<PivotTable, RevisionError> {
    let mut builder = PivotBuilder::new();
    for row in RevisionReader::new(reader, names)? {
        builder.push(&row?);
    }
    Ok(builder.finish())
}

/// Pivot a revisions CSV on disk.
#[instrument(level = "info", skip(csv_path, names), fields(path = %csv_path.as_ref().display()))]
pub fn pivot_csv_file<P: AsRef<Path>>(
    csv_path: P,
    names: &ColumnNames,
) -> Result<PivotTable, RevisionError> {
    let file = File::open(&csv_path)?;
    let table = pivot_csv(file, names)?;
    info!(revisions = table.rows.len(), columns = table.columns.len(), "pivoted csv");
    Ok(table)
}

/// Pull the first `.csv` entry (archive order) out of the export zip.
///
/// Returns the entry name and its bytes.
pub fn extract_revisions_csv<P: AsRef<Path>>(
    zip_path: P,
) -> Result<(String, Vec<u8>), RevisionError> {
    let file = File::open(&zip_path)?;
    let mut archive = ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if entry.is_file() && name.to_lowercase().ends_with(".csv") {
            let mut buf = Vec::with_capacity(prealloc_hint(entry.size()));
            entry.read_to_end(&mut buf)?;
            debug!(entry = %name, bytes = buf.len(), "extracted revisions csv");
            return Ok((name, buf));
        }
    }

    Err(RevisionError::NoCsvEntry(
        zip_path.as_ref().display().to_string(),
    ))
}

/// Open the downloaded export archive and pivot its revisions CSV.
#[instrument(level = "info", skip(zip_path, names), fields(path = %zip_path.as_ref().display()))]
pub fn pivot_zip<P: AsRef<Path>>(
    zip_path: P,
    names: &ColumnNames,
) -> Result<PivotTable, RevisionError> {
    let (entry, data) = extract_revisions_csv(&zip_path)?;
    let table = pivot_csv(Cursor::new(data), names)?;
    info!(
        entry = %entry,
        revisions = table.rows.len(),
        columns = table.columns.len(),
        "pivoted archive"
    );
    Ok(table)
}

/// Read all raw rows from the archive without pivoting.
pub fn load_revisions_zip<P: AsRef<Path>>(
    zip_path: P,
    names: &ColumnNames,
) -> Result<Vec<RawRevisionRow>, RevisionError> {
    let (_, data) = extract_revisions_csv(zip_path)?;
    read_revisions(Cursor::new(data), names)
}
