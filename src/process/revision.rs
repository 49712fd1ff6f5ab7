// src/process/revision.rs
use csv::{ByteRecord, Reader, ReaderBuilder};
use serde::{Deserialize, Serialize};
use std::io::Read;
use tracing::{debug, warn};

use super::RevisionError;

/// One record of the upstream revisions export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRevisionRow {
    pub timestamp: String,
    pub actor: String,
    pub operation: String,
    pub change_log: String,
    pub subject_id: String,
    pub record_type: String,
}

/// Header names the export uses for each column we read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub timestamp: String,
    pub actor: String,
    pub operation: String,
    pub subject_id: String,
    pub record_type: String,
    pub change_log: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            timestamp: "Timestamp".into(),
            actor: "User".into(),
            operation: "Operation".into(),
            subject_id: "Record ID".into(),
            record_type: "Record Type".into(),
            change_log: "Change Log".into(),
        }
    }
}

/// Positions of the wanted columns in the file header. `None` = absent.
#[derive(Debug, Default, Clone, Copy)]
struct ColumnLayout {
    timestamp: Option<usize>,
    actor: Option<usize>,
    operation: Option<usize>,
    subject_id: Option<usize>,
    record_type: Option<usize>,
    change_log: Option<usize>,
}

impl ColumnLayout {
    fn from_header(header: &ByteRecord, names: &ColumnNames) -> Self {
        let cleaned: Vec<String> = header
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let h = String::from_utf8_lossy(h);
                let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { &*h };
                h.trim().to_string()
            })
            .collect();

        let find = |name: &str| {
            let pos = cleaned.iter().position(|h| h == name);
            if pos.is_none() {
                warn!(column = name, "revision export is missing column; using empty values");
            }
            pos
        };

        Self {
            timestamp: find(names.timestamp.as_str()),
            actor: find(names.actor.as_str()),
            operation: find(names.operation.as_str()),
            subject_id: find(names.subject_id.as_str()),
            record_type: find(names.record_type.as_str()),
            change_log: find(names.change_log.as_str()),
        }
    }

    /// Key fields are kept verbatim; only the change log is trimmed.
    /// Invalid UTF-8 is replaced with U+FFFD rather than failing the row.
    fn extract(&self, record: &ByteRecord) -> RawRevisionRow {
        let get = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default()
        };
        RawRevisionRow {
            timestamp: get(self.timestamp),
            actor: get(self.actor),
            operation: get(self.operation),
            change_log: get(self.change_log).trim().to_string(),
            subject_id: get(self.subject_id),
            record_type: get(self.record_type),
        }
    }
}

/// Streams [`RawRevisionRow`]s out of a revisions CSV, one record at a time.
///
/// The first record is the header. Rows shorter than the header are padded
/// with empty strings; extra columns are ignored. Only I/O failures surface
/// as errors.
pub struct RevisionReader<R: Read> {
    rdr: Reader<R>,
    layout: ColumnLayout,
    record: ByteRecord,
    line: u64,
}

impl<R: Read> RevisionReader<R> {
    pub fn new(reader: R, names: &ColumnNames) -> Result<Self, RevisionError> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut header = ByteRecord::new();
        let layout = if rdr.read_byte_record(&mut header)? {
            ColumnLayout::from_header(&header, names)
        } else {
            debug!("revision export is empty");
            ColumnLayout::default()
        };

        Ok(Self {
            rdr,
            layout,
            record: ByteRecord::new(),
            line: 1,
        })
    }
}

impl<R: Read> Iterator for RevisionReader<R> {
    type Item = Result<RawRevisionRow, RevisionError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rdr.read_byte_record(&mut self.record) {
            Ok(true) => {
                self.line += 1;
                Some(Ok(self.layout.extract(&self.record)))
            }
            Ok(false) => None,
            Err(e) => {
                warn!(record = self.line + 1, error = %e, "unreadable revision record");
                Some(Err(e.into()))
            }
        }
    }
}

/// Read every revision row from `reader` into memory.
pub fn read_revisions<R: Read>(
    reader: R,
    names: &ColumnNames,
) -> Result<Vec<RawRevisionRow>, RevisionError> {
    RevisionReader::new(reader, names)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = "Revision,Timestamp,User,Operation,Record Type,Record ID,Change Log\n";

    #[test]
    fn reads_named_columns_in_any_order() {
        let data = format!(
            "{HEADER}11,2024-01-01 10:00,alice,UPDATE,CollectionProtocol,7,\"Name=Acme, Status=Active\"\n"
        );
        let rows = read_revisions(Cursor::new(data), &ColumnNames::default()).unwrap();
        assert_eq!(
            rows,
            vec![RawRevisionRow {
                timestamp: "2024-01-01 10:00".into(),
                actor: "alice".into(),
                operation: "UPDATE".into(),
                change_log: "Name=Acme, Status=Active".into(),
                subject_id: "7".into(),
                record_type: "CollectionProtocol".into(),
            }]
        );
    }

    #[test]
    fn missing_column_reads_as_empty() {
        let data = "Timestamp,User,Record ID\n2024-01-01,alice,7\n";
        let rows = read_revisions(Cursor::new(data), &ColumnNames::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].actor, "alice");
        assert_eq!(rows[0].operation, "");
        assert_eq!(rows[0].change_log, "");
    }

    #[test]
    fn short_rows_are_padded() {
        let data = format!("{HEADER}11,2024-01-01,alice\n");
        let rows = read_revisions(Cursor::new(data), &ColumnNames::default()).unwrap();
        assert_eq!(rows[0].actor, "alice");
        assert_eq!(rows[0].subject_id, "");
        assert_eq!(rows[0].change_log, "");
    }

    #[test]
    fn strips_bom_from_first_header() {
        let data = "\u{feff}Timestamp,User,Operation,Record ID,Change Log\nts,bob,INSERT,3,a=1\n";
        let rows = read_revisions(Cursor::new(data), &ColumnNames::default()).unwrap();
        assert_eq!(rows[0].timestamp, "ts");
    }

    #[test]
    fn custom_column_names() {
        let names = ColumnNames {
            timestamp: "When".into(),
            actor: "Who".into(),
            operation: "Action".into(),
            subject_id: "Id".into(),
            record_type: "Kind".into(),
            change_log: "Changes".into(),
        };
        let data = "Id,When,Who,Action,Kind,Changes\n4,t,carol,DELETE,Specimen,x=1\n";
        let rows = read_revisions(Cursor::new(data), &names).unwrap();
        assert_eq!(rows[0].subject_id, "4");
        assert_eq!(rows[0].record_type, "Specimen");
        assert_eq!(rows[0].change_log, "x=1");
    }

    #[test]
    fn empty_input_has_no_rows() {
        let rows = read_revisions(Cursor::new(""), &ColumnNames::default()).unwrap();
        assert!(rows.is_empty());
        let rows = read_revisions(Cursor::new(HEADER), &ColumnNames::default()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn invalid_utf8_row_is_decoded_lossily() {
        let mut data = HEADER.as_bytes().to_vec();
        data.extend_from_slice(b"1,t1,alice,UPDATE,CP,7,Name=Acme\n");
        data.extend_from_slice(b"2,t2,alice,UPDATE,CP,7,Note=caf\xe9\n");
        data.extend_from_slice(b"3,t3,bob,UPDATE,CP,7,Status=Active\n");
        let rows = read_revisions(Cursor::new(data), &ColumnNames::default()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].change_log, "Note=caf\u{fffd}");
        assert_eq!(rows[2].change_log, "Status=Active");
    }

    #[test]
    fn key_fields_keep_surrounding_whitespace() {
        let data = format!("{HEADER}1, 2024-01-01 ,alice , UPDATE,CP,7 ,  x=1  \n");
        let rows = read_revisions(Cursor::new(data), &ColumnNames::default()).unwrap();
        assert_eq!(rows[0].timestamp, " 2024-01-01 ");
        assert_eq!(rows[0].actor, "alice ");
        assert_eq!(rows[0].operation, " UPDATE");
        assert_eq!(rows[0].subject_id, "7 ");
        assert_eq!(rows[0].change_log, "x=1");
    }
}
