//! Batch encoding for `COPY ... FROM STDIN WITH (FORMAT csv)`.

use std::sync::Arc;

use bytes::Bytes;
use csv::{QuoteStyle, Terminator, WriterBuilder};

use crate::batch::Batch;
use crate::error::Result;
use crate::schema::{qualify_table, quote_ident};

/// A batch serialized for the COPY stream.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub index: usize,
    pub header: Arc<[String]>,
    pub row_count: usize,
    pub payload: Bytes,
}

/// Encode a batch as minimally quoted CSV with no header line.
pub fn encode_batch(batch: Batch) -> Result<EncodedBatch> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::with_capacity(batch.rows.len() * 256));

    for row in &batch.rows {
        writer.write_record(row)?;
    }

    let payload = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(e.error().kind(), e.error().to_string()))?;

    Ok(EncodedBatch {
        index: batch.index,
        header: batch.header,
        row_count: batch.rows.len(),
        payload: Bytes::from(payload),
    })
}

/// COPY statement listing exactly the batch's columns.
pub fn copy_statement(schema: &str, table: &str, header: &[String]) -> String {
    let col_list = header
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv)",
        qualify_table(schema, table),
        col_list
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use csv::ReaderBuilder;

    fn batch(rows: Vec<Vec<&str>>) -> Batch {
        Batch {
            index: 3,
            header: vec!["partner_id".to_string(), "product_name".to_string()].into(),
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(str::to_string).collect())
                .collect(),
        }
    }

    #[test]
    fn test_copy_statement() {
        let header = vec!["partner_id".to_string(), "language".to_string()];
        assert_eq!(
            copy_statement("public", "awin_catalog_import_temp", &header),
            "COPY \"public\".\"awin_catalog_import_temp\" (\"partner_id\", \"language\") \
             FROM STDIN WITH (FORMAT csv)"
        );
    }

    #[test]
    fn test_minimal_quoting() {
        let encoded = encode_batch(batch(vec![
            vec!["42", "plain"],
            vec!["42", "has, comma"],
            vec!["42", "say \"hi\""],
        ]))
        .unwrap();

        assert_eq!(
            std::str::from_utf8(&encoded.payload).unwrap(),
            "42,plain\n42,\"has, comma\"\n42,\"say \"\"hi\"\"\"\n"
        );
        assert_eq!(encoded.row_count, 3);
        assert_eq!(encoded.index, 3);
    }

    #[test]
    fn test_encoded_rows_parse_back() {
        let original = batch(vec![
            vec!["42", "multi\nline"],
            vec!["42", ""],
            vec!["42", "ünïcødé; \"quoted\", and more"],
        ]);
        let rows = original.rows.clone();
        let encoded = encode_batch(original).unwrap();

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .from_reader(&encoded.payload[..]);
        let parsed: Vec<Vec<String>> = reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();

        assert_eq!(parsed, rows);
        assert_eq!(encoded.header.len(), 2);
    }

    #[test]
    fn test_empty_batch_encodes_to_nothing() {
        let encoded = encode_batch(batch(vec![])).unwrap();
        assert!(encoded.payload.is_empty());
        assert_eq!(encoded.row_count, 0);
    }
}
