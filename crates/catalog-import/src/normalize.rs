//! Header normalization.
//!
//! Feed headers arrive with arbitrary casing and separators (`Product Name`,
//! `product:name`, ` PARTNER_ID `). Every name is mapped to the staging
//! table's identifier form before anything else looks at it.

use std::sync::Arc;

use crate::schema::{StagingTable, PARTNER_ID_COLUMN};

/// A feed header mapped onto staging-table identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedHeader {
    /// Column order for every batch of the file.
    pub columns: Arc<[String]>,
    /// The feed has no `partner_id` column; every row gets the configured
    /// partner id prepended.
    pub needs_injection: bool,
    /// Position of `partner_id` in `columns`.
    pub partner_index: usize,
}

/// Map a raw column name to its identifier form.
pub fn normalize_column(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ':' | ' ' => '_',
            other => other,
        })
        .collect()
}

/// Normalize a raw header, prepending `partner_id` when it is missing.
///
/// Empty names and duplicates are passed through; the database rejects them
/// at COPY time.
pub fn normalize_header<S: AsRef<str>>(raw: &[S]) -> NormalizedHeader {
    let mut columns: Vec<String> = raw.iter().map(|c| normalize_column(c.as_ref())).collect();

    let (needs_injection, partner_index) =
        match columns.iter().position(|c| c == PARTNER_ID_COLUMN) {
            Some(index) => (false, index),
            None => {
                columns.insert(0, PARTNER_ID_COLUMN.to_string());
                (true, 0)
            }
        };

    NormalizedHeader {
        columns: columns.into(),
        needs_injection,
        partner_index,
    }
}

/// Normalized columns the staging table does not define.
pub fn unknown_columns<'a>(header: &'a NormalizedHeader, table: &StagingTable) -> Vec<&'a str> {
    table.unknown_columns(&header.columns)
}

/// Normalized columns that supply a value the staging table generates itself.
pub fn generated_columns<'a>(header: &'a NormalizedHeader, table: &StagingTable) -> Vec<&'a str> {
    table.generated_columns(&header.columns)
}
