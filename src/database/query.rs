//! Query execution and result rendering.

use crate::constants::LOG_QUERY_TRUNCATE_LENGTH;
use crate::database::connection::DbConnection;
use crate::database::types::{extract_column, SqlValue};
use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Result of a query execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in result order. Empty for statements that return no
    /// result set.
    pub columns: Vec<String>,

    /// Result rows, values in column order.
    pub rows: Vec<Vec<SqlValue>>,

    /// Rows affected by INSERT/UPDATE/DELETE statements.
    pub rows_affected: u64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
        }
    }

    /// Render as comma-separated text: one header line with column names,
    /// then one line per row with `NULL` for missing values. Statements
    /// without a result set render their affected-row count instead.
    pub fn to_text(&self) -> String {
        if self.columns.is_empty() {
            return format!(
                "Query executed successfully. Rows affected: {}",
                self.rows_affected
            );
        }

        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        lines.push(self.columns.join(","));
        for row in &self.rows {
            lines.push(
                row.iter()
                    .map(SqlValue::to_display_string)
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }
        lines.join("\n")
    }

    /// First column of every row, rendered as text. Used for name listings.
    pub fn first_column(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.first())
            .map(SqlValue::to_display_string)
            .collect()
    }
}

/// Whether a statement should be run through the result-set path.
pub fn returns_rows(sql: &str) -> bool {
    let first = sql
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    matches!(
        first.as_str(),
        "select" | "with" | "exec" | "execute" | "declare"
    )
}

/// Execute arbitrary SQL, dispatching between the result-set and
/// affected-rows paths based on the statement verb.
pub async fn execute(conn: &mut DbConnection, sql: &str) -> Result<QueryResult, ServerError> {
    if returns_rows(sql) {
        run_query(conn, sql).await
    } else {
        run_statement(conn, sql).await
    }
}

/// Execute a statement expected to return a result set.
pub async fn run_query(conn: &mut DbConnection, sql: &str) -> Result<QueryResult, ServerError> {
    use futures_util::stream::TryStreamExt;

    let start = Instant::now();
    debug!(
        "Executing query: {}",
        truncate_for_log(sql, LOG_QUERY_TRUNCATE_LENGTH)
    );

    let mut stream = conn.simple_query(sql).await.map_err(ServerError::from)?;

    let mut result = QueryResult::empty();
    while let Some(item) = stream.try_next().await.map_err(ServerError::from)? {
        match item {
            tiberius::QueryItem::Metadata(meta) => {
                // A later result set replaces the column header
                result.columns = meta
                    .columns()
                    .iter()
                    .map(|col| col.name().to_string())
                    .collect();
            }
            tiberius::QueryItem::Row(row) => {
                let values = (0..row.columns().len())
                    .map(|idx| extract_column(&row, idx))
                    .collect();
                result.rows.push(values);
            }
        }
    }

    debug!(
        "Query returned {} rows in {} ms",
        result.rows.len(),
        start.elapsed().as_millis()
    );
    Ok(result)
}

/// Execute a statement that modifies data and report affected rows.
pub async fn run_statement(conn: &mut DbConnection, sql: &str) -> Result<QueryResult, ServerError> {
    let start = Instant::now();
    debug!(
        "Executing statement: {}",
        truncate_for_log(sql, LOG_QUERY_TRUNCATE_LENGTH)
    );

    let outcome = conn.execute(sql, &[]).await.map_err(ServerError::from)?;
    let rows_affected = outcome.rows_affected().iter().sum();

    debug!(
        "Statement affected {} rows in {} ms",
        rows_affected,
        start.elapsed().as_millis()
    );
    Ok(QueryResult {
        columns: Vec::new(),
        rows: Vec::new(),
        rows_affected,
    })
}

/// Truncate a string for logging purposes. The cut falls on a char
/// boundary so multibyte content never splits mid-character.
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_classification() {
        assert!(returns_rows("SELECT * FROM users"));
        assert!(returns_rows("  select 1"));
        assert!(returns_rows("WITH cte AS (SELECT 1 AS n) SELECT n FROM cte"));
        assert!(returns_rows("EXEC sp_who"));

        assert!(!returns_rows("INSERT INTO users VALUES (1)"));
        assert!(!returns_rows("UPDATE users SET name = 'x'"));
        assert!(!returns_rows("DELETE FROM users"));
        assert!(!returns_rows("CREATE TABLE t (id INT)"));
        assert!(!returns_rows(""));
    }

    #[test]
    fn test_to_text_with_rows() {
        let result = QueryResult {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![
                vec![SqlValue::I32(1), SqlValue::String("Alice".to_string())],
                vec![SqlValue::I32(2), SqlValue::Null],
            ],
            rows_affected: 0,
        };

        assert_eq!(result.to_text(), "id,name\n1,Alice\n2,NULL");
    }

    #[test]
    fn test_to_text_without_result_set() {
        let result = QueryResult {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: 3,
        };
        assert_eq!(
            result.to_text(),
            "Query executed successfully. Rows affected: 3"
        );
    }

    #[test]
    fn test_first_column() {
        let result = QueryResult {
            columns: vec!["TABLE_NAME".to_string()],
            rows: vec![
                vec![SqlValue::String("orders".to_string())],
                vec![SqlValue::String("customers".to_string())],
            ],
            rows_affected: 0,
        };
        assert_eq!(result.first_column(), vec!["orders", "customers"]);
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(
            truncate_for_log("this is a long string", 10),
            "this is a ..."
        );
    }

    #[test]
    fn test_truncate_backs_off_multibyte_boundary() {
        // 'é' spans bytes 99..101, so the cut must back off to 99
        let sql = format!("{}é{}", "a".repeat(99), "b".repeat(20));
        let truncated = truncate_for_log(&sql, 100);
        assert_eq!(truncated, format!("{}...", "a".repeat(99)));

        // A limit past the multibyte char cuts cleanly after it
        let truncated = truncate_for_log(&sql, 101);
        assert_eq!(truncated, format!("{}é...", "a".repeat(99)));
    }
}
