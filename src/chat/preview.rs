//! Table-preview shortcut
//!
//! Requests that look like "show me the orders table" skip the completion
//! service and show the first rows of a table directly.

use serde::{Deserialize, Serialize};

use crate::row::{self, Row};

/// Column header of a preview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewColumn {
    /// Row key
    pub key: String,
    /// Display name
    pub name: String,
}

/// Rows shown in place of an assistant answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePreview {
    pub table: String,
    pub columns: Vec<PreviewColumn>,
    pub rows: Vec<Row>,
}

impl TablePreview {
    /// Build a preview; columns come from the keys of the first row
    pub fn from_rows(table: &str, rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|r| {
                row::column_names(r)
                    .into_iter()
                    .map(|key| PreviewColumn {
                        name: display_name(&key),
                        key,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            table: table.to_string(),
            columns,
            rows,
        }
    }

    pub fn message(&self) -> String {
        format!("Here's the data from the {} table:", self.table)
    }
}

/// The table a message asks to see, if it is a preview request
pub fn detect(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    if !(lower.contains("table") || lower.contains("show me")) {
        return None;
    }
    if lower.contains("orders") {
        Some("orders")
    } else {
        Some("customers")
    }
}

/// `order_date` → `Order date`
pub fn display_name(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.as_str().replace('_', " ").chars())
            .collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect() {
        assert_eq!(detect("show me the customers table"), Some("customers"));
        assert_eq!(detect("Show Me everything"), Some("customers"));
        assert_eq!(detect("what's in the ORDERS table?"), Some("orders"));
        assert_eq!(detect("show me recent orders"), Some("orders"));
        assert_eq!(detect("how many customers do we have?"), None);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("order_date"), "Order date");
        assert_eq!(display_name("id"), "Id");
        assert_eq!(display_name("branch_count_total"), "Branch count total");
        assert_eq!(display_name("_id"), "_id");
        assert_eq!(display_name(""), "");
    }

    #[test]
    fn test_columns_from_first_row() {
        let rows = vec![json!({"id": "c1", "created_at": "2024-01-01"})
            .as_object()
            .unwrap()
            .clone()];
        let preview = TablePreview::from_rows("customers", rows);
        assert_eq!(
            preview.columns,
            vec![
                PreviewColumn {
                    key: "id".to_string(),
                    name: "Id".to_string()
                },
                PreviewColumn {
                    key: "created_at".to_string(),
                    name: "Created at".to_string()
                },
            ]
        );
        assert_eq!(preview.message(), "Here's the data from the customers table:");
    }

    #[test]
    fn test_empty_table_has_no_columns() {
        let preview = TablePreview::from_rows("orders", Vec::new());
        assert!(preview.columns.is_empty());
    }
}
