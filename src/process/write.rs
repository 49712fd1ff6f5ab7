// src/process/write.rs
use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use parquet::{arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties};
use std::{fs::File, io::Write, path::Path, sync::Arc};
use tracing::{info, instrument};

use super::pivot::PivotTable;

/// Serialize the wide table as RFC 4180 CSV with a header row.
pub fn write_csv<W: Write>(table: &PivotTable, writer: W) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(table.header())
        .context("writing pivot header")?;
    for rec in table.records() {
        wtr.write_record(&rec).context("writing pivot row")?;
    }
    wtr.flush().context("flushing pivot csv")?;
    Ok(())
}

#[instrument(level = "info", skip(table, path), fields(path = %path.as_ref().display()))]
pub fn write_csv_file<P: AsRef<Path>>(table: &PivotTable, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("creating {:?}", path))?;
    write_csv(table, file)?;
    info!(rows = table.rows.len(), "wrote pivot csv");
    Ok(())
}

/// Same table as a Parquet file; every column is non-null Utf8.
#[instrument(level = "info", skip(table, path), fields(path = %path.as_ref().display()))]
pub fn write_parquet_file<P: AsRef<Path>>(table: &PivotTable, path: P) -> Result<()> {
    let path = path.as_ref();
    let header = table.header();

    let schema = Arc::new(Schema::new(
        header
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, false))
            .collect::<Vec<_>>(),
    ));

    // column-major copy of the records
    let mut columns: Vec<Vec<String>> = vec![Vec::with_capacity(table.rows.len()); header.len()];
    for rec in table.records() {
        for (col, value) in columns.iter_mut().zip(rec) {
            col.push(value);
        }
    }
    let arrays: Vec<ArrayRef> = columns
        .into_iter()
        .map(|c| Arc::new(StringArray::from(c)) as ArrayRef)
        .collect();

    let batch = RecordBatch::try_new(schema.clone(), arrays).context("building pivot record batch")?;
    let file = File::create(path).with_context(|| format!("creating {:?}", path))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer =
        ArrowWriter::try_new(file, schema, Some(props)).context("creating Arrow writer for pivot")?;
    writer.write(&batch).context("writing pivot batch")?;
    writer.close().context("closing pivot writer")?;
    info!(rows = table.rows.len(), "wrote pivot parquet");
    Ok(())
}
