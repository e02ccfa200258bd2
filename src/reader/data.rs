//! Built-in sample dataset
//!
//! A small food-distribution schema (customers, orders, order lines and SKUs)
//! used by `--load-sample-data` and by tests. The statements only use types and
//! literals that both DuckDB and SQLite accept.

use super::Reader;
use crate::Result;

/// Tables created by [`SAMPLE_DATA`], in creation order
pub const SAMPLE_TABLES: &[&str] = &["customers", "skus", "orders", "order_lines"];

pub const SAMPLE_DATA: &str = "
CREATE TABLE customers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    cuisine TEXT,
    branch_count INTEGER,
    created_at DATE
);
INSERT INTO customers VALUES
    ('c1', 'Trattoria Roma', 'Italian', 3, '2023-02-11'),
    ('c2', 'Sakura House', 'Japanese', 1, '2023-05-02'),
    ('c3', 'La Piñata', 'Mexican', 2, '2023-08-19'),
    ('c4', 'Golden Wok', 'Chinese', 5, '2024-01-07'),
    ('c5', 'Le Petit Bistro', 'French', 1, '2024-03-22');

CREATE TABLE skus (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    unit TEXT,
    category TEXT
);
INSERT INTO skus VALUES
    ('s1', 'Tomatoes', 'kg', 'Produce'),
    ('s2', 'Mozzarella', 'kg', 'Dairy'),
    ('s3', 'Salmon', 'kg', 'Seafood'),
    ('s4', 'Rice', 'bag', 'Dry Goods'),
    ('s5', 'Olive Oil', 'bottle', 'Dry Goods');

CREATE TABLE orders (
    id TEXT PRIMARY KEY,
    customer_id TEXT NOT NULL,
    order_date DATE NOT NULL,
    status TEXT NOT NULL
);
INSERT INTO orders VALUES
    ('o1', 'c1', '2024-01-05', 'delivered'),
    ('o2', 'c2', '2024-01-18', 'delivered'),
    ('o3', 'c1', '2024-02-03', 'delivered'),
    ('o4', 'c3', '2024-02-21', 'cancelled'),
    ('o5', 'c4', '2024-03-09', 'delivered'),
    ('o6', 'c5', '2024-03-30', 'pending'),
    ('o7', 'c4', '2024-04-12', 'delivered'),
    ('o8', 'c2', '2024-04-25', 'pending');

CREATE TABLE order_lines (
    id TEXT PRIMARY KEY,
    order_id TEXT NOT NULL,
    sku_id TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    price DOUBLE NOT NULL
);
INSERT INTO order_lines VALUES
    ('l1', 'o1', 's1', 20, 2.5),
    ('l2', 'o1', 's2', 5, 11.0),
    ('l3', 'o2', 's3', 8, 24.0),
    ('l4', 'o2', 's4', 10, 18.5),
    ('l5', 'o3', 's5', 6, 9.75),
    ('l6', 'o4', 's1', 15, 2.5),
    ('l7', 'o5', 's4', 30, 18.5),
    ('l8', 'o5', 's3', 4, 24.0),
    ('l9', 'o6', 's2', 7, 11.0),
    ('l10', 'o7', 's5', 12, 9.75),
    ('l11', 'o8', 's3', 3, 24.0);
";

/// Create and populate the sample tables
pub async fn load_sample_data(reader: &dyn Reader) -> Result<()> {
    reader.execute_batch(SAMPLE_DATA).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn check(reader: &dyn Reader) {
        load_sample_data(reader).await.unwrap();

        let schema = reader.schema().await.unwrap();
        let mut names: Vec<_> = schema.iter().map(|t| t.name.as_str()).collect();
        names.sort();
        let mut expected = SAMPLE_TABLES.to_vec();
        expected.sort();
        assert_eq!(names, expected);

        let rows = reader
            .execute_sql("SELECT COUNT(*) AS n FROM orders WHERE status = 'delivered'")
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], json!(5));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_sample_data_sqlite() {
        let reader = super::super::SQLiteReader::from_connection_string("sqlite://memory").unwrap();
        check(&reader).await;
    }

    #[cfg(feature = "duckdb")]
    #[tokio::test]
    async fn test_sample_data_duckdb() {
        let reader = super::super::DuckDBReader::from_connection_string("duckdb://memory").unwrap();
        check(&reader).await;
    }
}
