//! MSSQL Entra MCP Server entry point.
//!
//! This binary starts the MCP server using stdio transport for integration
//! with Claude Desktop, Cursor, and other MCP clients.

use anyhow::Result;
use mssql_entra_mcp_server::MssqlEntraServer;
use rmcp::ServiceExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to stderr (stdout is reserved for JSON-RPC)
    init_logging();

    // Log startup information to stderr
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("MSSQL Entra MCP Server v{version} starting...");
    eprintln!("Transport: stdio");

    // Set up panic hook for debugging
    std::panic::set_hook(Box::new(|info| {
        eprintln!("[PANIC] {}", info);
    }));

    // Load configuration from environment
    let server = MssqlEntraServer::from_env()?;
    eprintln!(
        "Configuration loaded: {} on {} ({} authentication)",
        server.config().database,
        server.config().server,
        server.config().auth_method
    );

    // Open the shared connection once up front so misconfiguration fails
    // fast instead of on the first tool call
    server.test_connection().await?;
    eprintln!("Server initialized. Ready to accept requests...");

    // Start serving on stdio transport
    let transport = rmcp::transport::stdio();
    let service = server.serve(transport).await?;

    match service.waiting().await {
        Ok(reason) => eprintln!("Service stopped: {reason:?}"),
        Err(e) => eprintln!("Service error: {e}"),
    }

    Ok(())
}

/// Initialize tracing subscriber with stderr output.
///
/// Logs MUST go to stderr because stdout is used for JSON-RPC communication.
fn init_logging() {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn,mssql_entra_mcp_server=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
