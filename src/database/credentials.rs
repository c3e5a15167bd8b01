//! Credential resolution for each authentication method.
//!
//! [`CredentialProvider`] turns the validated [`DbConfig`] into
//! [`ConnectionParams`] the driver layer can open a connection with. SQL
//! authentication passes the username and password through unchanged; every
//! Entra ID method reduces to a bearer token at the TDS boundary, acquired
//! through the [`TokenSource`] seam. Only the interactive method consults
//! the on-disk token cache; the non-interactive flows acquire a fresh token
//! on every resolve.

use crate::config::{AuthMethod, DbConfig};
use crate::constants::AZURE_SQL_SCOPE;
use crate::database::token_cache::TokenCache;
use crate::error::ServerError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// An access token together with its absolute expiry (Unix seconds).
#[derive(Clone)]
pub struct AcquiredToken {
    pub token: String,
    pub expires_on: i64,
}

/// Boundary to the identity backend.
///
/// The production implementation talks to Entra ID through the Azure
/// identity SDK; tests substitute an in-memory source. `available` reports
/// whether the backend can serve requests at all, so callers can fail fast
/// with a configuration hint instead of a network error.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Whether the identity backend is usable in this build.
    fn available(&self) -> bool;

    /// Acquire a token for `scope` using the flow selected by
    /// `config.auth_method`.
    async fn acquire(&self, config: &DbConfig, scope: &str) -> Result<AcquiredToken, ServerError>;
}

/// Driver-facing credential material.
#[derive(Clone)]
pub enum Credential {
    /// SQL Server authentication.
    SqlPassword { user: String, password: String },

    /// Entra ID access token. `from_cache` marks tokens read from the
    /// on-disk cache, which are the only ones worth invalidating and
    /// re-acquiring after a login rejection.
    Bearer { token: String, from_cache: bool },
}

impl std::fmt::Debug for Credential {
    // Never expose secrets in debug output
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SqlPassword { user, .. } => f
                .debug_struct("SqlPassword")
                .field("user", user)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::Bearer { from_cache, .. } => f
                .debug_struct("Bearer")
                .field("token", &"[REDACTED]")
                .field("from_cache", from_cache)
                .finish(),
        }
    }
}

/// Everything the driver layer needs to open one connection.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub connect_timeout: Duration,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub credential: Credential,
}

impl ConnectionParams {
    fn assemble(config: &DbConfig, credential: Credential) -> Self {
        let (host, port) = config.host_and_port();
        Self {
            host: host.to_string(),
            port,
            database: config.database.clone(),
            connect_timeout: Duration::from_secs(config.connection_timeout),
            encrypt: config.encrypt,
            trust_server_certificate: config.trust_server_certificate,
            credential,
        }
    }

    /// Whether these params carry a token read from the on-disk cache.
    pub fn uses_cached_token(&self) -> bool {
        matches!(
            self.credential,
            Credential::Bearer {
                from_cache: true,
                ..
            }
        )
    }
}

/// Produces [`ConnectionParams`] for the configured authentication method.
pub struct CredentialProvider {
    token_cache: TokenCache,
    token_source: Arc<dyn TokenSource>,
}

impl CredentialProvider {
    pub fn new(token_cache: TokenCache, token_source: Arc<dyn TokenSource>) -> Self {
        Self {
            token_cache,
            token_source,
        }
    }

    /// Drop the cached token so the next resolve acquires a fresh one.
    pub fn invalidate_cached_token(&self) {
        self.token_cache.clear();
    }

    /// Resolve connection parameters, reusing a cached token when the
    /// method supports one.
    pub async fn resolve(&self, config: &DbConfig) -> Result<ConnectionParams, ServerError> {
        self.resolve_with_cache(config, true).await
    }

    /// Resolve connection parameters. `use_cache: false` forces a fresh
    /// token even when a usable cached one exists; the connection layer
    /// uses this for its invalidate-and-retry pass.
    pub async fn resolve_with_cache(
        &self,
        config: &DbConfig,
        use_cache: bool,
    ) -> Result<ConnectionParams, ServerError> {
        if config.auth_method == AuthMethod::Sql {
            let user = config
                .user
                .clone()
                .ok_or_else(|| ServerError::missing_config("MSSQL_USER is required for SQL authentication"))?;
            let password = config
                .password
                .clone()
                .ok_or_else(|| ServerError::missing_config("MSSQL_PASSWORD is required for SQL authentication"))?;
            return Ok(ConnectionParams::assemble(
                config,
                Credential::SqlPassword { user, password },
            ));
        }

        if !self.token_source.available() {
            return Err(ServerError::backend_unavailable(format!(
                "{} authentication requires the Azure identity backend",
                config.auth_method
            )));
        }

        if config.auth_method == AuthMethod::EntraInteractive && use_cache {
            if let Some(cached) = self.token_cache.load(config) {
                info!("Using cached Entra ID token");
                return Ok(ConnectionParams::assemble(
                    config,
                    Credential::Bearer {
                        token: cached.token,
                        from_cache: true,
                    },
                ));
            }
        }

        debug!("Acquiring Entra ID token via {}", config.auth_method);
        let acquired = self.token_source.acquire(config, AZURE_SQL_SCOPE).await?;

        if config.auth_method == AuthMethod::EntraInteractive {
            self.token_cache
                .save(&acquired.token, acquired.expires_on, config);
        }

        Ok(ConnectionParams::assemble(
            config,
            Credential::Bearer {
                token: acquired.token,
                from_cache: false,
            },
        ))
    }
}

/// The default token source for this build: the Azure identity SDK when
/// compiled with `azure-auth`, otherwise a stub that reports the backend
/// unavailable.
pub fn default_token_source() -> Arc<dyn TokenSource> {
    #[cfg(feature = "azure-auth")]
    {
        Arc::new(azure::AzureTokenSource)
    }
    #[cfg(not(feature = "azure-auth"))]
    {
        Arc::new(BackendUnavailable)
    }
}

/// Stub used when the crate is built without the `azure-auth` feature.
pub struct BackendUnavailable;

#[async_trait]
impl TokenSource for BackendUnavailable {
    fn available(&self) -> bool {
        false
    }

    async fn acquire(
        &self,
        config: &DbConfig,
        _scope: &str,
    ) -> Result<AcquiredToken, ServerError> {
        Err(ServerError::backend_unavailable(format!(
            "{} authentication requires the Azure identity backend",
            config.auth_method
        )))
    }
}

#[cfg(feature = "azure-auth")]
mod azure {
    use super::{AcquiredToken, TokenSource};
    use crate::config::{AuthMethod, DbConfig};
    use crate::error::ServerError;
    use async_trait::async_trait;
    use azure_core::credentials::{Secret, TokenCredential};
    use azure_identity::{
        AzureCliCredential, ClientSecretCredential, DefaultAzureCredential,
        ManagedIdentityCredential, ManagedIdentityCredentialOptions, UserAssignedId,
    };
    use tracing::{debug, warn};

    /// Well-known first-party public client, used for the password grant
    /// when no application registration is configured.
    const AZURE_CLI_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

    /// Tenant used when the configuration does not pin one.
    const DEFAULT_TENANT: &str = "organizations";

    /// Token acquisition through the Azure identity SDK.
    pub struct AzureTokenSource;

    #[async_trait]
    impl TokenSource for AzureTokenSource {
        fn available(&self) -> bool {
            true
        }

        async fn acquire(
            &self,
            config: &DbConfig,
            scope: &str,
        ) -> Result<AcquiredToken, ServerError> {
            match config.auth_method {
                AuthMethod::Sql => Err(ServerError::auth(
                    "SQL authentication does not use access tokens",
                )),
                AuthMethod::EntraPassword => password_grant(config, scope).await,
                AuthMethod::EntraServicePrincipal => service_principal(config, scope).await,
                AuthMethod::EntraManagedIdentity => managed_identity(config, scope).await,
                AuthMethod::EntraIntegrated => ambient(scope).await,
                AuthMethod::EntraInteractive => interactive(scope).await,
            }
        }
    }

    async fn service_principal(config: &DbConfig, scope: &str) -> Result<AcquiredToken, ServerError> {
        let client_id = config.client_id.clone().ok_or_else(|| {
            ServerError::missing_config("MSSQL_CLIENT_ID is required for service principal authentication")
        })?;
        let client_secret = config.client_secret.clone().ok_or_else(|| {
            ServerError::missing_config("MSSQL_CLIENT_SECRET is required for service principal authentication")
        })?;
        let tenant_id = config.tenant_id.as_deref().unwrap_or(DEFAULT_TENANT);

        let credential = ClientSecretCredential::new(
            tenant_id,
            client_id,
            Secret::new(client_secret),
            None,
        )
        .map_err(|e| ServerError::auth_with_source("Failed to create service principal credential", e))?;

        fetch(credential.as_ref(), scope).await
    }

    async fn managed_identity(config: &DbConfig, scope: &str) -> Result<AcquiredToken, ServerError> {
        let options = config.client_id.clone().map(|client_id| {
            ManagedIdentityCredentialOptions {
                user_assigned_id: Some(UserAssignedId::ClientId(client_id)),
                ..Default::default()
            }
        });
        let credential = ManagedIdentityCredential::new(options)
            .map_err(|e| ServerError::auth_with_source("Failed to create managed identity credential", e))?;

        fetch(credential.as_ref(), scope).await
    }

    async fn ambient(scope: &str) -> Result<AcquiredToken, ServerError> {
        let credential = DefaultAzureCredential::new()
            .map_err(|e| ServerError::auth_with_source("Failed to create default credential", e))?;
        fetch(credential.as_ref(), scope).await
    }

    /// Ambient credential chain first, Azure CLI as the explicit fallback.
    async fn interactive(scope: &str) -> Result<AcquiredToken, ServerError> {
        if let Ok(credential) = DefaultAzureCredential::new() {
            match fetch(credential.as_ref(), scope).await {
                Ok(token) => return Ok(token),
                Err(e) => warn!("Default credential chain failed, trying Azure CLI: {}", e),
            }
        }

        let credential = AzureCliCredential::new(None)
            .map_err(|e| ServerError::auth_with_source("Failed to create Azure CLI credential", e))?;
        fetch(credential.as_ref(), scope).await
    }

    async fn fetch(
        credential: &dyn TokenCredential,
        scope: &str,
    ) -> Result<AcquiredToken, ServerError> {
        let response = credential
            .get_token(&[scope], None)
            .await
            .map_err(|e| ServerError::auth_with_source("Failed to acquire Entra ID token", e))?;

        Ok(AcquiredToken {
            token: response.token.secret().to_string(),
            expires_on: response.expires_on.unix_timestamp(),
        })
    }

    #[derive(serde::Deserialize)]
    struct PasswordGrantResponse {
        access_token: String,
        expires_in: i64,
    }

    /// Resource-owner password grant against the Entra token endpoint. The
    /// identity SDK does not expose this flow, so the request is made
    /// directly.
    async fn password_grant(config: &DbConfig, scope: &str) -> Result<AcquiredToken, ServerError> {
        let user = config.user.clone().ok_or_else(|| {
            ServerError::missing_config("MSSQL_USER is required for Entra ID password authentication")
        })?;
        let password = config.password.clone().ok_or_else(|| {
            ServerError::missing_config("MSSQL_PASSWORD is required for Entra ID password authentication")
        })?;
        let tenant = config.tenant_id.as_deref().unwrap_or(DEFAULT_TENANT);
        let client_id = config.client_id.as_deref().unwrap_or(AZURE_CLI_CLIENT_ID);

        let url = format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token");
        debug!("Requesting password-grant token from tenant {}", tenant);

        let response = reqwest::Client::new()
            .post(&url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", client_id),
                ("scope", scope),
                ("username", &user),
                ("password", &password),
            ])
            .send()
            .await
            .map_err(|e| ServerError::auth_with_source("Token endpoint request failed", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServerError::auth(format!(
                "Token endpoint rejected password grant ({}): {}",
                status, body
            )));
        }

        let grant: PasswordGrantResponse = response
            .json()
            .await
            .map_err(|e| ServerError::auth_with_source("Malformed token endpoint response", e))?;

        Ok(AcquiredToken {
            token: grant.access_token,
            expires_on: chrono::Utc::now().timestamp() + grant.expires_in,
        })
    }
}
