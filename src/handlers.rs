//! ServerHandler implementation for the MSSQL Entra MCP Server.
//!
//! This module implements the rmcp `ServerHandler` trait which defines how
//! the server responds to MCP protocol requests.

use crate::resources::{build_resource_list, read_resource};
use crate::server::MssqlEntraServer;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    Implementation, ListResourcesResult, PaginatedRequestParams, ProtocolVersion,
    ReadResourceRequestParams, ReadResourceResult, ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{tool_handler, ErrorData};
use tracing::info;

/// The `#[tool_handler]` macro wires up tool routing automatically.
/// It generates the `list_tools` and `call_tool` method implementations.
#[tool_handler]
impl ServerHandler for MssqlEntraServer {
    /// Server identification - called during initialization handshake.
    fn get_info(&self) -> ServerInfo {
        info!("MCP client requesting server info");

        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,

            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),

            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                title: Some("MSSQL Entra MCP Server".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },

            instructions: Some(build_instructions(self)),
        }
    }

    /// List available resources: one per user table.
    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        let resources = build_resource_list(self).await;

        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
            meta: None,
        })
    }

    /// Read a specific table resource.
    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        read_resource(self, &request.uri)
            .await
            .map_err(|e| ErrorData::invalid_params(e.to_string(), None))
    }
}

/// Build server instructions based on current configuration.
fn build_instructions(server: &MssqlEntraServer) -> String {
    let mut instructions = String::new();

    instructions.push_str("# MSSQL Entra MCP Server\n\n");
    instructions.push_str(
        "This server provides access to a Microsoft SQL Server database, \
         supporting both SQL and Microsoft Entra ID authentication.\n\n",
    );
    instructions.push_str(&format!(
        "**Connected to database:** `{}` on `{}`\n",
        server.config().database,
        server.config().server
    ));
    instructions.push_str(&format!(
        "**Authentication method:** `{}`\n\n",
        server.config().auth_method
    ));

    instructions.push_str("## Available Operations\n\n");
    instructions.push_str("### Resources\n");
    instructions.push_str("- Each user table is exposed as `mssql://{table}/data`\n");
    instructions.push_str("- Reading a resource returns the first rows of the table\n\n");
    instructions.push_str("### Tools\n");
    instructions.push_str("- `execute_sql`: run an arbitrary SQL query\n");
    instructions.push_str("- `get_auth_info`: inspect the active authentication and identity\n");
    instructions.push_str("- `clear_token_cache`: discard the cached Entra ID access token\n");

    instructions
}
