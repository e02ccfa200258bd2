//! System instruction describing the reply protocol to the completion service

use super::{CHART_END, CHART_START, SQL_END, SQL_START};
use crate::chart::ChartKind;
use crate::reader::TableSchema;

/// Builder for the system instruction sent with every completion request
#[derive(Debug, Clone)]
pub struct SystemPrompt {
    dialect: String,
    tables: Vec<TableSchema>,
}

impl SystemPrompt {
    pub fn new(dialect: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
            tables: Vec::new(),
        }
    }

    /// Restrict generated SQL to these tables
    pub fn with_tables(mut self, tables: Vec<TableSchema>) -> Self {
        self.tables = tables;
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!(
            "You are an SQL analyst connected to a {} database. You act both as a helpful \
             assistant and as a data analyst.\n\n",
            self.dialect
        ));

        out.push_str(
            "1. If the user asks a general question that is not about the data \
             (greetings, what you can do, ...), answer conversationally. Do not write SQL \
             and do not mention charts.\n\n",
        );

        out.push_str(&format!(
            "2. If the user asks about the data (counts, metrics, trends, comparisons, \
             summaries), reply with one short sentence of explanation followed by exactly \
             this format:\n{}\n[SQL query]\n{}\n{}\n[chart type]\n{}\n\n",
            SQL_START, SQL_END, CHART_START, CHART_END
        ));

        out.push_str("Rules for SQL replies:\n");
        out.push_str("- Write a single statement and do not end it with a semicolon.\n");
        out.push_str("- Do not wrap the SQL in code blocks or add markdown or JSON.\n");
        out.push_str(&format!(
            "- Use {} functions for dates and arithmetic.\n",
            self.dialect
        ));
        out.push_str(
            "- Select the label column first and the numeric value second; for a single \
             value select exactly one column.\n",
        );
        if !self.tables.is_empty() {
            out.push_str("- Use only the tables and columns listed in the schema below.\n");
        }

        out.push_str(&format!(
            "\nValid chart types ({}):\n",
            ChartKind::tag_list()
        ));
        for kind in ChartKind::ALL {
            out.push_str(&format!("- `{}` → {}\n", kind.as_str(), kind.usage_hint()));
        }

        out.push_str(&format!(
            "\nExample:\nTotal number of customers.\n{}\nSELECT COUNT(*) FROM customers\n{}\n{}\n{}\n{}\n",
            SQL_START,
            SQL_END,
            CHART_START,
            ChartKind::Metric,
            CHART_END
        ));

        if !self.tables.is_empty() {
            out.push_str("\n--- SCHEMA START ---\n");
            for table in &self.tables {
                out.push_str(&format!("Table: {}\n", table.name));
                for column in &table.columns {
                    out.push_str(&format!("- {} ({})\n", column.name, column.data_type));
                }
                out.push('\n');
            }
            out.push_str("--- SCHEMA END ---\n");
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse;
    use crate::reader::ColumnInfo;

    fn orders() -> TableSchema {
        TableSchema {
            name: "orders".to_string(),
            columns: vec![
                ColumnInfo {
                    name: "id".to_string(),
                    data_type: "VARCHAR".to_string(),
                },
                ColumnInfo {
                    name: "order_date".to_string(),
                    data_type: "DATE".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_prompt_lists_every_chart_kind() {
        let prompt = SystemPrompt::new("DuckDB").render();
        for kind in ChartKind::ALL {
            assert!(prompt.contains(&format!("`{}`", kind.as_str())));
        }
        assert!(prompt.contains("metric|bar|line|pie"));
    }

    #[test]
    fn test_prompt_uses_protocol_markers() {
        let prompt = SystemPrompt::new("SQLite").render();
        assert!(prompt.contains(SQL_START));
        assert!(prompt.contains(SQL_END));
        assert!(prompt.contains(CHART_START));
        assert!(prompt.contains(CHART_END));
        assert!(prompt.contains("SQLite database"));
    }

    #[test]
    fn test_prompt_schema_section() {
        let without = SystemPrompt::new("DuckDB").render();
        assert!(!without.contains("SCHEMA START"));

        let with = SystemPrompt::new("DuckDB")
            .with_tables(vec![orders()])
            .render();
        assert!(with.contains("Table: orders"));
        assert!(with.contains("- order_date (DATE)"));
    }

    #[test]
    fn test_prompt_example_parses() {
        // The worked example must itself follow the protocol
        let prompt = SystemPrompt::new("DuckDB").render();
        let example = &prompt[prompt.find("Example:").unwrap()..];
        let parsed = parse(example);
        assert_eq!(parsed.sql.as_deref(), Some("SELECT COUNT(*) FROM customers"));
        assert_eq!(parsed.chart_kind(), Some(ChartKind::Metric));
    }
}
