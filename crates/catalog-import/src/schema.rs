//! Canonical staging table definition.
//!
//! The staging table is the union of every column the catalog feeds are known
//! to publish. Everything a feed sends is stored as `TEXT` so that one
//! merchant's formatting quirks never fail a load on type coercion; the
//! exceptions are the identifier columns and four stock/availability flags.

use serde::{Deserialize, Serialize};

/// Column that carries the partner identifier on every row.
pub const PARTNER_ID_COLUMN: &str = "partner_id";

/// PostgreSQL identifiers are truncated past this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Storage type of a staging column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Serial,
    Timestamp,
    Boolean,
    Integer,
    Text,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Serial => "SERIAL",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
        }
    }
}

/// A staging table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: ColumnType,
    /// SQL default expression, if any.
    pub default: Option<String>,
    pub primary_key: bool,
    /// Filled by the database rather than by feed rows.
    pub generated: bool,
}

impl Column {
    fn feed(name: &str, data_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            default: None,
            primary_key: false,
            generated: false,
        }
    }

    fn generated(name: &str, data_type: ColumnType, default: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            default: default.map(str::to_string),
            primary_key: false,
            generated: true,
        }
    }
}

/// Bookkeeping columns populated by the database.
const SYSTEM_COLUMNS: &[(&str, ColumnType, Option<&str>)] = &[
    ("id", ColumnType::Serial, None),
    ("created_at", ColumnType::Timestamp, Some("CURRENT_TIMESTAMP")),
    ("imported", ColumnType::Boolean, Some("FALSE")),
];

/// Columns a feed may supply, in table order.
const FEED_COLUMNS: &[(&str, ColumnType)] = &[
    ("partner_id", ColumnType::Integer),
    ("aw_deep_link", ColumnType::Text),
    ("product_name", ColumnType::Text),
    ("aw_product_id", ColumnType::Text),
    ("merchant_product_id", ColumnType::Text),
    ("merchant_image_url", ColumnType::Text),
    ("description", ColumnType::Text),
    ("merchant_category", ColumnType::Text),
    ("search_price", ColumnType::Text),
    ("merchant_name", ColumnType::Text),
    ("merchant_id", ColumnType::Integer),
    ("category_name", ColumnType::Text),
    ("category_id", ColumnType::Text),
    ("aw_image_url", ColumnType::Text),
    ("currency", ColumnType::Text),
    ("store_price", ColumnType::Text),
    ("delivery_cost", ColumnType::Text),
    ("merchant_deep_link", ColumnType::Text),
    ("language", ColumnType::Text),
    ("last_updated", ColumnType::Text),
    ("display_price", ColumnType::Text),
    ("data_feed_id", ColumnType::Text),
    ("brand_name", ColumnType::Text),
    ("brand_id", ColumnType::Text),
    ("colour", ColumnType::Text),
    ("product_short_description", ColumnType::Text),
    ("specifications", ColumnType::Text),
    ("condition", ColumnType::Text),
    ("product_model", ColumnType::Text),
    ("model_number", ColumnType::Text),
    ("dimensions", ColumnType::Text),
    ("keywords", ColumnType::Text),
    ("promotional_text", ColumnType::Text),
    ("product_type", ColumnType::Text),
    ("commission_group", ColumnType::Text),
    ("merchant_product_category_path", ColumnType::Text),
    ("merchant_product_second_category", ColumnType::Text),
    ("merchant_product_third_category", ColumnType::Text),
    ("rrp_price", ColumnType::Text),
    ("saving", ColumnType::Text),
    ("savings_percent", ColumnType::Text),
    ("base_price", ColumnType::Text),
    ("base_price_amount", ColumnType::Text),
    ("base_price_text", ColumnType::Text),
    ("product_price_old", ColumnType::Text),
    ("delivery_restrictions", ColumnType::Text),
    ("delivery_weight", ColumnType::Text),
    ("warranty", ColumnType::Text),
    ("terms_of_contract", ColumnType::Text),
    ("delivery_time", ColumnType::Text),
    ("in_stock", ColumnType::Boolean),
    ("stock_quantity", ColumnType::Text),
    ("valid_from", ColumnType::Text),
    ("valid_to", ColumnType::Text),
    ("is_for_sale", ColumnType::Boolean),
    ("web_offer", ColumnType::Boolean),
    ("pre_order", ColumnType::Boolean),
    ("stock_status", ColumnType::Text),
    ("size_stock_status", ColumnType::Text),
    ("size_stock_amount", ColumnType::Text),
    ("merchant_thumb_url", ColumnType::Text),
    ("large_image", ColumnType::Text),
    ("alternate_image", ColumnType::Text),
    ("aw_thumb_url", ColumnType::Text),
    ("alternate_image_two", ColumnType::Text),
    ("alternate_image_three", ColumnType::Text),
    ("alternate_image_four", ColumnType::Text),
    ("reviews", ColumnType::Text),
    ("average_rating", ColumnType::Text),
    ("rating", ColumnType::Text),
    ("number_available", ColumnType::Text),
    ("custom_1", ColumnType::Text),
    ("custom_2", ColumnType::Text),
    ("custom_3", ColumnType::Text),
    ("custom_4", ColumnType::Text),
    ("custom_5", ColumnType::Text),
    ("custom_6", ColumnType::Text),
    ("custom_7", ColumnType::Text),
    ("custom_8", ColumnType::Text),
    ("custom_9", ColumnType::Text),
    ("ean", ColumnType::Text),
    ("isbn", ColumnType::Text),
    ("upc", ColumnType::Text),
    ("mpn", ColumnType::Text),
    ("parent_product_id", ColumnType::Text),
    ("product_gtin", ColumnType::Text),
    ("basket_link", ColumnType::Text),
    ("fashion_suitable_for", ColumnType::Text),
    ("fashion_category", ColumnType::Text),
    ("fashion_size", ColumnType::Text),
    ("fashion_material", ColumnType::Text),
    ("fashion_pattern", ColumnType::Text),
    ("fashion_swatch", ColumnType::Text),
];

/// Columns indexed for the downstream importer's lookups.
const INDEXED_COLUMNS: &[&str] = &[
    "imported",
    "partner_id",
    "merchant_id",
    "merchant_product_id",
    "aw_product_id",
    "last_updated",
];

/// Secondary index on the staging table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
}

/// The staging table: name, columns and secondary indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingTable {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
}

impl StagingTable {
    /// The canonical staging table under the given schema and name.
    pub fn canonical(schema: &str, name: &str) -> Self {
        let mut columns: Vec<Column> = SYSTEM_COLUMNS
            .iter()
            .map(|(col, ty, default)| Column::generated(col, *ty, *default))
            .collect();
        columns[0].primary_key = true;
        columns.extend(FEED_COLUMNS.iter().map(|(col, ty)| Column::feed(col, *ty)));

        let indexes = INDEXED_COLUMNS
            .iter()
            .map(|col| Index {
                name: index_name(name, col),
                columns: vec![col.to_string()],
            })
            .collect();

        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            columns,
            indexes,
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Quoted `"schema"."table"` for use in SQL.
    pub fn qualified(&self) -> String {
        qualify_table(&self.schema, &self.name)
    }

    /// Whether a feed may supply this column.
    pub fn is_feed_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| !c.generated && c.name == name)
    }

    /// Whether the column is filled by the table itself (`id`, `created_at`,
    /// `imported`).
    pub fn is_generated_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.generated && c.name == name)
    }

    /// Columns of `header` the table does not define at all.
    pub fn unknown_columns<'a>(&self, header: &'a [String]) -> Vec<&'a str> {
        header
            .iter()
            .map(String::as_str)
            .filter(|c| !self.is_feed_column(c) && !self.is_generated_column(c))
            .collect()
    }

    /// Columns of `header` that override a value the table would generate.
    pub fn generated_columns<'a>(&self, header: &'a [String]) -> Vec<&'a str> {
        header
            .iter()
            .map(String::as_str)
            .filter(|c| self.is_generated_column(c))
            .collect()
    }

    /// DDL that drops the table if present and recreates it with its indexes.
    pub fn reset_ddl(&self) -> String {
        let mut statements = vec![
            format!("DROP TABLE IF EXISTS {}", self.qualified()),
            self.create_ddl(),
        ];
        statements.extend(self.index_ddl());

        let mut sql = statements.join(";\n");
        sql.push(';');
        sql
    }

    /// Generate the CREATE TABLE statement.
    pub fn create_ddl(&self) -> String {
        let col_defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote_ident(&c.name), c.data_type.sql());
                if c.primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                if let Some(default) = &c.default {
                    def.push_str(" DEFAULT ");
                    def.push_str(default);
                }
                def
            })
            .collect();

        format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.qualified(),
            col_defs.join(",\n    ")
        )
    }

    /// Generate CREATE INDEX statements for the secondary indexes.
    pub fn index_ddl(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|idx| {
                let cols: Vec<String> = idx.columns.iter().map(|c| quote_ident(c)).collect();
                format!(
                    "CREATE INDEX {} ON {} ({})",
                    quote_ident(&idx.name),
                    self.qualified(),
                    cols.join(", ")
                )
            })
            .collect()
    }
}

/// `idx_{table}_{column}`, shortening the table part so the name fits the
/// identifier limit while the column part keeps names distinct.
fn index_name(table: &str, column: &str) -> String {
    let name = format!("idx_{}_{}", table, column);
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name;
    }

    let budget = MAX_IDENTIFIER_LEN.saturating_sub("idx__".len() + column.len());
    let name = format!("idx_{}_{}", truncate_at_boundary(table, budget), column);
    truncate_at_boundary(&name, MAX_IDENTIFIER_LEN).to_string()
}

fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Fully qualify a table name.
pub fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> StagingTable {
        StagingTable::canonical("public", "awin_catalog_import_temp")
    }

    #[test]
    fn test_canonical_column_layout() {
        let t = table();
        let names: Vec<&str> = t.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(&names[..4], &["id", "created_at", "imported", "partner_id"]);
        assert_eq!(t.columns.len(), SYSTEM_COLUMNS.len() + FEED_COLUMNS.len());
        assert!(t.columns[0].primary_key);
    }

    #[test]
    fn test_stock_flags_are_boolean() {
        let t = table();
        for flag in ["in_stock", "is_for_sale", "web_offer", "pre_order"] {
            let col = t.columns.iter().find(|c| c.name == flag).unwrap();
            assert_eq!(col.data_type, ColumnType::Boolean, "{}", flag);
        }
    }

    #[test]
    fn test_unknown_columns() {
        let t = table();
        let header = vec![
            "partner_id".to_string(),
            "product_name".to_string(),
            "shoe_width".to_string(),
            "imported".to_string(),
        ];
        assert_eq!(t.unknown_columns(&header), vec!["shoe_width"]);
        assert_eq!(t.generated_columns(&header), vec!["imported"]);
    }

    #[test]
    fn test_create_ddl() {
        let ddl = table().create_ddl();
        assert!(ddl.starts_with("CREATE TABLE \"public\".\"awin_catalog_import_temp\" ("));
        assert!(ddl.contains("\"id\" SERIAL PRIMARY KEY"));
        assert!(ddl.contains("\"created_at\" TIMESTAMP DEFAULT CURRENT_TIMESTAMP"));
        assert!(ddl.contains("\"imported\" BOOLEAN DEFAULT FALSE"));
        assert!(ddl.contains("\"language\" TEXT"));
        assert!(ddl.contains("\"condition\" TEXT"));
    }

    #[test]
    fn test_reset_ddl_drops_before_create() {
        let sql = table().reset_ddl();
        let drop = sql.find("DROP TABLE IF EXISTS").unwrap();
        let create = sql.find("CREATE TABLE").unwrap();
        let index = sql.find("CREATE INDEX").unwrap();
        assert!(drop < create && create < index);
        assert_eq!(sql.matches("CREATE INDEX").count(), INDEXED_COLUMNS.len());
    }

    #[test]
    fn test_index_names_fit_identifier_limit() {
        let long = "x".repeat(80);
        let t = StagingTable::canonical("public", &long);
        assert!(t.indexes.iter().all(|i| i.name.len() <= 63));
    }

    #[test]
    fn test_index_names_stay_distinct_when_shortened() {
        for len in [49, 50, 58, 80] {
            let t = StagingTable::canonical("public", &"t".repeat(len));
            let mut names: Vec<&str> = t.indexes.iter().map(|i| i.name.as_str()).collect();
            assert!(names.iter().all(|n| n.len() <= 63), "table length {}", len);
            names.sort();
            names.dedup();
            assert_eq!(names.len(), INDEXED_COLUMNS.len(), "table length {}", len);
        }

        let t = StagingTable::canonical("public", &"t".repeat(50));
        assert!(t.indexes.iter().any(|i| i.name.ends_with("_merchant_product_id")));
        assert!(t.indexes.iter().any(|i| i.name.ends_with("_merchant_id")));
    }

    #[test]
    fn test_short_index_names_are_untouched() {
        assert_eq!(index_name("feed", "partner_id"), "idx_feed_partner_id");
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(qualify_table("public", "t"), "\"public\".\"t\"");
    }
}
