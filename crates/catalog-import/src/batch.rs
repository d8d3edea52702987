//! Row repair and fixed-size batching.

use std::sync::Arc;

use crate::error::Result;
use crate::normalize::NormalizedHeader;

/// Default number of rows per COPY batch.
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// A run of rows that share one header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Position of this batch within its file, starting at 0.
    pub index: usize,
    pub header: Arc<[String]>,
    pub rows: Vec<Vec<String>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Insert the partner id into a row that lacks it.
///
/// A row is repaired when the feed has no `partner_id` column at all, or when
/// it is exactly one field short of a header that does carry `partner_id`
/// (some feeds declare the column but leave it out of the data). The value
/// goes in at `partner_index`, the column's position in the header. Rows of
/// any other width are passed through for the database to reject.
pub fn repair_row(
    mut row: Vec<String>,
    header_len: usize,
    needs_injection: bool,
    partner_index: usize,
    partner_id: &str,
) -> Vec<String> {
    if needs_injection || row.len() + 1 == header_len {
        let at = partner_index.min(row.len());
        row.insert(at, partner_id.to_string());
    }
    row
}

/// Lazily groups repaired rows into batches of at most `batch_size` rows.
///
/// A read error is yielded once and ends iteration; rows buffered before it
/// are dropped.
pub struct Batcher<I> {
    rows: I,
    header: Arc<[String]>,
    needs_injection: bool,
    partner_index: usize,
    partner_id: String,
    batch_size: usize,
    next_index: usize,
    finished: bool,
}

impl<I> Batcher<I>
where
    I: Iterator<Item = Result<Vec<String>>>,
{
    pub fn new(
        rows: I,
        header: &NormalizedHeader,
        partner_id: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            rows,
            header: Arc::clone(&header.columns),
            needs_injection: header.needs_injection,
            partner_index: header.partner_index,
            partner_id: partner_id.into(),
            batch_size: batch_size.max(1),
            next_index: 0,
            finished: false,
        }
    }

    fn emit(&mut self, rows: Vec<Vec<String>>) -> Batch {
        let batch = Batch {
            index: self.next_index,
            header: Arc::clone(&self.header),
            rows,
        };
        self.next_index += 1;
        batch
    }
}

impl<I> Iterator for Batcher<I>
where
    I: Iterator<Item = Result<Vec<String>>>,
{
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut rows = Vec::with_capacity(self.batch_size);
        loop {
            match self.rows.next() {
                Some(Ok(row)) => {
                    rows.push(repair_row(
                        row,
                        self.header.len(),
                        self.needs_injection,
                        self.partner_index,
                        &self.partner_id,
                    ));
                    if rows.len() == self.batch_size {
                        return Some(Ok(self.emit(rows)));
                    }
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    if rows.is_empty() {
                        return None;
                    }
                    return Some(Ok(self.emit(rows)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImportError;
    use crate::normalize::normalize_header;

    fn row(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    fn numbered_rows(n: usize) -> Vec<Result<Vec<String>>> {
        (0..n).map(|i| Ok(row(&["42", &i.to_string()]))).collect()
    }

    #[test]
    fn test_batch_counts() {
        let header = normalize_header(&["partner_id", "sku"]);
        for (n, size) in [(0, 3), (1, 3), (3, 3), (7, 3), (10, 1), (5, 5000)] {
            let batches: Vec<Batch> = Batcher::new(numbered_rows(n).into_iter(), &header, "42", size)
                .collect::<Result<_>>()
                .unwrap();

            assert_eq!(batches.len(), n.div_ceil(size), "n={} size={}", n, size);
            if let Some((last, full)) = batches.split_last() {
                assert!(full.iter().all(|b| b.len() == size));
                assert!(!last.is_empty() && last.len() <= size);
            }
            let total: usize = batches.iter().map(Batch::len).sum();
            assert_eq!(total, n);
        }
    }

    #[test]
    fn test_batch_indexes_and_shared_header() {
        let header = normalize_header(&["partner_id", "sku"]);
        let batches: Vec<Batch> = Batcher::new(numbered_rows(5).into_iter(), &header, "42", 2)
            .collect::<Result<_>>()
            .unwrap();

        let indexes: Vec<usize> = batches.iter().map(|b| b.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert!(batches.iter().all(|b| Arc::ptr_eq(&b.header, &header.columns)));
        assert_eq!(batches[2].rows, vec![row(&["42", "4"])]);
    }

    #[test]
    fn test_injection_prefixes_every_row() {
        let header = normalize_header(&["Advertiser ID", "URL"]);
        let rows = vec![Ok(row(&["7", "http://x"]))];
        let batches: Vec<Batch> = Batcher::new(rows.into_iter(), &header, "42", 10)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(&batches[0].header[..], &["partner_id", "advertiser_id", "url"]);
        assert_eq!(batches[0].rows, vec![row(&["42", "7", "http://x"])]);
    }

    #[test]
    fn test_short_row_is_repaired() {
        let header = normalize_header(&["partner_id", "Name"]);
        assert!(!header.needs_injection);
        let rows = vec![Ok(row(&["Name_only_value"]))];
        let batches: Vec<Batch> = Batcher::new(rows.into_iter(), &header, "42", 10)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(batches[0].rows, vec![row(&["42", "Name_only_value"])]);
    }

    #[test]
    fn test_short_row_gets_partner_id_at_its_column() {
        let header = normalize_header(&["aw_product_id", "Partner ID", "brand_name"]);
        let rows = vec![Ok(row(&["1001", "Acme"])), Ok(row(&["1002", "7", "Bolt"]))];
        let batches: Vec<Batch> = Batcher::new(rows.into_iter(), &header, "42", 10)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(
            batches[0].rows,
            vec![row(&["1001", "42", "Acme"]), row(&["1002", "7", "Bolt"])]
        );
    }

    #[test]
    fn test_complete_row_is_not_double_prefixed() {
        let complete = row(&["42", "Widget"]);
        assert_eq!(repair_row(complete.clone(), 2, false, 0, "42"), complete);

        let once = repair_row(row(&["Widget"]), 2, false, 0, "42");
        assert_eq!(repair_row(once.clone(), 2, false, 0, "42"), once);
    }

    #[test]
    fn test_ragged_rows_pass_through() {
        let wide = row(&["42", "a", "b", "c"]);
        assert_eq!(repair_row(wide.clone(), 2, false, 0, "99"), wide);
    }

    #[test]
    fn test_read_error_ends_stream() {
        let header = normalize_header(&["partner_id", "sku"]);
        let rows = vec![
            Ok(row(&["42", "a"])),
            Ok(row(&["42", "b"])),
            Ok(row(&["42", "c"])),
            Err(ImportError::Config("bad record".into())),
            Ok(row(&["42", "d"])),
        ];
        let mut batcher = Batcher::new(rows.into_iter(), &header, "42", 2);

        let first = batcher.next().unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert!(batcher.next().unwrap().is_err());
        assert!(batcher.next().is_none());
    }
}
