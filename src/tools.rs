//! MCP Tools for SQL Server operations.
//!
//! - `execute_sql`: Execute arbitrary SQL and return results as text
//! - `get_auth_info`: Report the active authentication method and connection identity
//! - `clear_token_cache`: Drop the cached Entra ID token

use crate::config::DbConfig;
use crate::database::query::{self, returns_rows, truncate_for_log, QueryResult};
use crate::error::ServerError;
use crate::server::MssqlEntraServer;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content};
use rmcp::{tool, tool_router, ErrorData};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, warn};

/// Input for the `execute_sql` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteSqlInput {
    /// The SQL query to execute.
    pub query: String,
}

// The generated router constructor is called from `server.rs`, so it
// needs pub visibility.
#[tool_router(vis = "pub")]
impl MssqlEntraServer {
    /// Execute arbitrary SQL against the configured database.
    #[tool(description = "Execute an SQL query on the SQL Server")]
    pub async fn execute_sql(
        &self,
        Parameters(input): Parameters<ExecuteSqlInput>,
    ) -> Result<CallToolResult, ErrorData> {
        if input.query.trim().is_empty() {
            return Ok(CallToolResult::error(vec![Content::text(
                "Query is required",
            )]));
        }

        debug!("Calling execute_sql: {}", truncate_for_log(&input.query, 100));

        let result = self.run_sql(&input.query).await;
        match result {
            Ok(r) => Ok(CallToolResult::success(vec![Content::text(
                format_sql_output(&self.config, &input.query, &r),
            )])),
            Err(e) => {
                warn!("Error executing SQL '{}': {}", truncate_for_log(&input.query, 100), e);
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "Error executing query: {}",
                    e
                ))]))
            }
        }
    }

    /// Report authentication method and connection identity details.
    #[tool(
        description = "Get information about the current authentication method and connection"
    )]
    pub async fn get_auth_info(&self) -> Result<CallToolResult, ErrorData> {
        match self.auth_info().await {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) => {
                warn!("Error getting auth info: {}", e);
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "Error getting authentication info: {}",
                    e
                ))]))
            }
        }
    }

    /// Drop the cached Entra ID token.
    #[tool(
        description = "Clear the cached Entra ID access token, forcing re-authentication on the next connection"
    )]
    pub async fn clear_token_cache(&self) -> Result<CallToolResult, ErrorData> {
        self.token_cache.clear();
        Ok(CallToolResult::success(vec![Content::text(
            "Token cache cleared. The next connection will acquire a fresh access token.",
        )]))
    }
}

/// Identity probe run by `get_auth_info`.
const AUTH_INFO_QUERY: &str =
    "SELECT @@VERSION, DB_NAME(), SYSTEM_USER, USER_NAME(), HOST_NAME()";

impl MssqlEntraServer {
    async fn run_sql(&self, sql: &str) -> Result<QueryResult, ServerError> {
        let conn = self.connections.acquire().await?;
        let mut guard = conn.lock().await;
        let result = query::execute(&mut guard, sql).await;

        if let Err(ref e) = result {
            // A broken connection heals on the next acquire, but dropping the
            // slot now avoids one doomed probe round-trip
            if matches!(e, ServerError::ConnectionFailed { .. }) {
                drop(guard);
                self.connections.invalidate().await;
            }
        }
        result
    }

    async fn auth_info(&self) -> Result<String, ServerError> {
        let conn = self.connections.acquire().await?;
        let mut guard = conn.lock().await;
        let result = query::run_query(&mut guard, AUTH_INFO_QUERY).await?;
        drop(guard);

        let row = result.rows.first();
        let field = |idx: usize| {
            row.and_then(|r| r.get(idx))
                .filter(|v| !v.is_null())
                .map(|v| v.to_display_string())
                .unwrap_or_else(|| "Unknown".to_string())
        };
        let version: String = field(0).chars().take(100).collect();

        Ok(format!(
            "Authentication Information:\n\
             Method: {}\n\
             Server: {}\n\
             Database: {}\n\
             System User: {}\n\
             Database User: {}\n\
             Host: {}\n\
             Azure Auth Available: {}\n\
             SQL Server Version: {}...",
            self.config.auth_method,
            self.config.server,
            field(1),
            field(2),
            field(3),
            field(4),
            cfg!(feature = "azure-auth"),
            version,
        ))
    }
}

/// Render a query result the way clients expect: a name listing for table
/// enumeration queries, comma-separated rows for other SELECTs, and an
/// affected-row summary for everything else.
fn format_sql_output(config: &DbConfig, sql: &str, result: &QueryResult) -> String {
    if is_table_listing(sql) {
        let mut lines = vec![format!("Tables_in_{}", config.database)];
        lines.extend(result.first_column());
        return lines.join("\n");
    }

    if returns_rows(sql) && result.columns.is_empty() {
        return "Query executed successfully (no results returned)".to_string();
    }

    result.to_text()
}

/// Table enumeration queries get a MySQL-style `Tables_in_<db>` header for
/// client compatibility.
fn is_table_listing(sql: &str) -> bool {
    let upper = sql.trim_start().to_uppercase();
    upper.starts_with("SELECT")
        && upper.contains("INFORMATION_SCHEMA.TABLES")
        && upper.contains("TABLE_NAME")
        && !upper.contains("COUNT(*)")
}
