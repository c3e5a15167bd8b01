//! Centralized constants for the MSSQL Entra MCP Server.

use std::time::Duration;

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Default connection timeout as Duration.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration =
    Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS);

/// Safety buffer subtracted from a token's expiry when deciding usability.
/// A token within this margin of expiring is treated as already expired so
/// it is never handed to the driver moments before it lapses mid-handshake.
pub const TOKEN_EXPIRY_BUFFER_SECS: i64 = 300;

/// Application name reported to the server on connect.
pub const APPLICATION_NAME: &str = "mssql-entra-mcp-server";

/// Token scope for Azure SQL Database access.
pub const AZURE_SQL_SCOPE: &str = "https://database.windows.net/.default";

/// Subdirectory under the per-user cache directory holding the token cache.
pub const TOKEN_CACHE_DIR: &str = "mssql-entra-mcp";

/// File name of the single-slot token cache.
pub const TOKEN_CACHE_FILE: &str = "token.json";

/// Maximum rows returned when reading a table resource.
pub const RESOURCE_ROW_LIMIT: usize = 100;

/// Default truncation length for query logging.
pub const LOG_QUERY_TRUNCATE_LENGTH: usize = 100;
