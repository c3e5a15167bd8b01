//! MCP server struct definition and initialization.

use crate::config::DbConfig;
use crate::database::{
    default_token_source, CredentialProvider, MssqlConnectionManager, TiberiusOpener, TokenCache,
};
use crate::error::ServerError;
use rmcp::handler::server::router::tool::ToolRouter;
use std::sync::Arc;
use tracing::info;

/// The MSSQL Entra MCP Server instance.
///
/// The struct is cloned for each request; everything stateful is shared
/// via `Arc`. All SQL flows through a single connection owned by the
/// connection manager.
#[derive(Clone)]
pub struct MssqlEntraServer {
    /// Database connection configuration, resolved once at startup.
    pub(crate) config: Arc<DbConfig>,

    /// Owner of the single shared connection.
    pub(crate) connections: Arc<MssqlConnectionManager>,

    /// On-disk Entra ID token cache.
    pub(crate) token_cache: TokenCache,

    /// Tool router for dispatching tool calls.
    pub(crate) tool_router: ToolRouter<Self>,
}

impl MssqlEntraServer {
    /// Create a new server instance with the given configuration.
    pub fn new(config: DbConfig) -> Self {
        let config = Arc::new(config);
        let token_cache = TokenCache::new();
        let provider = CredentialProvider::new(token_cache.clone(), default_token_source());
        let connections = Arc::new(MssqlConnectionManager::new(
            Arc::clone(&config),
            provider,
            TiberiusOpener,
        ));

        Self {
            config,
            connections,
            token_cache,
            tool_router: Self::tool_router(),
        }
    }

    /// Create a server from environment variables.
    pub fn from_env() -> Result<Self, ServerError> {
        Ok(Self::new(DbConfig::from_env()?))
    }

    /// Open the shared connection once to verify configuration and
    /// connectivity at startup.
    pub async fn test_connection(&self) -> Result<(), ServerError> {
        self.connections.acquire().await?;
        info!(
            "Successfully connected to {}/{} using {} authentication",
            self.config.server, self.config.database, self.config.auth_method
        );
        Ok(())
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Get a reference to the connection manager.
    pub fn connections(&self) -> &MssqlConnectionManager {
        &self.connections
    }

    /// Get a reference to the token cache.
    pub fn token_cache(&self) -> &TokenCache {
        &self.token_cache
    }
}
