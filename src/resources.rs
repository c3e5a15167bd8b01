//! MCP Resources exposing table data.
//!
//! Each user table in the configured database is listed as a resource with
//! URI `mssql://{table}/data`. Reading one returns the first rows of the
//! table as comma-separated text.

use crate::constants::RESOURCE_ROW_LIMIT;
use crate::database::query;
use crate::error::ServerError;
use crate::server::MssqlEntraServer;
use rmcp::model::{AnnotateAble, RawResource, ReadResourceResult, Resource, ResourceContents};
use tracing::{info, warn};

const LIST_TABLES_SQL: &str = "SELECT TABLE_NAME \
     FROM INFORMATION_SCHEMA.TABLES \
     WHERE TABLE_TYPE = 'BASE TABLE' \
     ORDER BY TABLE_NAME";

/// List user tables as resources. Listing failures degrade to an empty
/// list rather than a protocol error.
pub async fn build_resource_list(server: &MssqlEntraServer) -> Vec<Resource> {
    let tables = match list_tables(server).await {
        Ok(tables) => tables,
        Err(e) => {
            warn!("Failed to list resources: {}", e);
            return Vec::new();
        }
    };

    info!("Found {} tables", tables.len());
    tables.iter().map(|table| table_resource(table)).collect()
}

/// Read the first rows of the table named in `uri`.
pub async fn read_resource(
    server: &MssqlEntraServer,
    uri: &str,
) -> Result<ReadResourceResult, ServerError> {
    let table = parse_table_uri(uri)
        .ok_or_else(|| ServerError::query(format!("Invalid resource URI: {uri}")))?;
    validate_table_name(&table)?;

    let conn = server.connections().acquire().await?;
    let mut guard = conn.lock().await;
    let sql = format!("SELECT TOP {} * FROM [{}]", RESOURCE_ROW_LIMIT, table);
    let result = query::run_query(&mut guard, &sql).await?;

    Ok(ReadResourceResult {
        contents: vec![ResourceContents::text(result.to_text(), uri.to_string())],
    })
}

async fn list_tables(server: &MssqlEntraServer) -> Result<Vec<String>, ServerError> {
    let conn = server.connections().acquire().await?;
    let mut guard = conn.lock().await;
    let result = query::run_query(&mut guard, LIST_TABLES_SQL).await?;
    Ok(result.first_column())
}

fn table_resource(table: &str) -> Resource {
    let mut resource = RawResource::new(
        format!("mssql://{}/data", table),
        format!("Table: {}", table),
    );
    resource.description = Some(format!("Data in table: {}", table));
    resource.mime_type = Some("text/plain".to_string());
    resource.no_annotation()
}

fn parse_table_uri(uri: &str) -> Option<String> {
    uri.strip_prefix("mssql://")?
        .strip_suffix("/data")
        .filter(|table| !table.is_empty())
        .map(str::to_string)
}

/// The table name is spliced into bracket-quoted SQL, so restrict it to
/// characters that cannot escape the quoting.
fn validate_table_name(name: &str) -> Result<(), ServerError> {
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '-'));
    if !valid {
        return Err(ServerError::query(format!("Invalid table name: {name}")));
    }
    Ok(())
}
