// src/process/pivot.rs
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, instrument};

use crate::process::revision::RawRevisionRow;
use crate::process::tokenize::tokenize;

/// Leading columns of every pivot table, in output order.
pub const KEY_COLUMNS: [&str; 4] = ["SubjectID", "Timestamp", "Actor", "Operation"];

/// Identity of one revision event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionKey {
    pub subject_id: String,
    pub timestamp: String,
    pub actor: String,
    pub operation: String,
}

impl RevisionKey {
    pub fn from_row(row: &RawRevisionRow) -> Self {
        Self {
            subject_id: row.subject_id.clone(),
            timestamp: row.timestamp.clone(),
            actor: row.actor.clone(),
            operation: row.operation.clone(),
        }
    }
}

/// One revision and the fields it changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotRow {
    pub key: RevisionKey,
    pub changes: HashMap<String, String>,
}

/// Accumulates field changes across the whole input.
///
/// Groups are kept in first-seen order; `index` maps each key to its slot.
#[derive(Debug, Default)]
pub struct PivotBuilder {
    groups: Vec<PivotRow>,
    index: HashMap<RevisionKey, usize>,
    rows_seen: u64,
    rows_empty: u64,
}

impl PivotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one raw row into the grouping map.
    pub fn push(&mut self, row: &RawRevisionRow) {
        self.rows_seen += 1;
        if row.change_log.is_empty() {
            self.rows_empty += 1;
            return;
        }

        let changes = tokenize(&row.change_log);
        if changes.is_empty() {
            debug!(subject = %row.subject_id, ts = %row.timestamp, "change log had no field tokens");
            return;
        }

        let key = RevisionKey::from_row(row);
        let slot = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                let i = self.groups.len();
                self.index.insert(key.clone(), i);
                self.groups.push(PivotRow {
                    key,
                    changes: HashMap::new(),
                });
                i
            }
        };

        // last write wins
        let group = &mut self.groups[slot];
        for change in changes {
            group.changes.insert(change.field_name, change.new_value);
        }
    }

    /// Close the accumulation pass and fix the column set.
    pub fn finish(self) -> PivotTable {
        let columns: Vec<String> = self
            .groups
            .iter()
            .flat_map(|g| g.changes.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        debug!(
            rows_seen = self.rows_seen,
            rows_empty = self.rows_empty,
            revisions = self.groups.len(),
            columns = columns.len(),
            "pivot accumulation finished"
        );

        PivotTable {
            columns,
            rows: self.groups,
        }
    }
}

/// The wide table: fixed key columns, then the sorted field columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotTable {
    /// Sorted, distinct field names observed in the run.
    pub columns: Vec<String>,
    /// Revisions in first-seen order.
    pub rows: Vec<PivotRow>,
}

impl PivotTable {
    /// Header row: key columns followed by field columns.
    ///
    /// A field whose name is already taken (e.g. a change log that sets
    /// `Timestamp`) is labelled `"<name> (field)"` so header names stay unique.
    pub fn header(&self) -> Vec<String> {
        let mut header: Vec<String> = KEY_COLUMNS.iter().map(|c| c.to_string()).collect();
        let mut taken: HashSet<String> = header.iter().cloned().collect();
        taken.extend(self.columns.iter().cloned());

        for col in &self.columns {
            let mut name = col.clone();
            if KEY_COLUMNS.contains(&col.as_str()) {
                while taken.contains(&name) {
                    name.push_str(" (field)");
                }
                taken.insert(name.clone());
            }
            header.push(name);
        }
        header
    }

    /// Flatten every revision into a full-width record, `""` for untouched fields.
    pub fn records(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.rows.iter().map(move |row| {
            let mut rec = Vec::with_capacity(KEY_COLUMNS.len() + self.columns.len());
            rec.push(row.key.subject_id.clone());
            rec.push(row.key.timestamp.clone());
            rec.push(row.key.actor.clone());
            rec.push(row.key.operation.clone());
            for col in &self.columns {
                rec.push(row.changes.get(col).cloned().unwrap_or_default());
            }
            rec
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Build the wide table from every raw row.
#[instrument(level = "info", skip(rows))]
pub fn pivot_revisions<'a, I>(rows: I) -> PivotTable
where
    I: IntoIterator<Item = &'a RawRevisionRow>,
{
    let mut builder = PivotBuilder::new();
    for row in rows {
        builder.push(row);
    }
    let table = builder.finish();
    info!(
        revisions = table.rows.len(),
        columns = table.columns.len(),
        "pivot built"
    );
    table
}
