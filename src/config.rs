//! Configuration management for the MSSQL Entra MCP Server.
//!
//! Configuration is loaded from environment variables following the 12-factor
//! app pattern. The resulting [`DbConfig`] is resolved once at startup and
//! passed by reference everywhere else; core logic never re-reads the
//! process environment.

use crate::constants::DEFAULT_CONNECTION_TIMEOUT_SECS;
use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported authentication methods.
///
/// Adding a method is a compile-time checked change: one variant here plus
/// one arm in `CredentialProvider::resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// SQL Server authentication (username/password).
    Sql,
    /// Entra ID integrated authentication (ambient OS identity).
    EntraIntegrated,
    /// Entra ID username/password authentication.
    EntraPassword,
    /// Entra ID service principal (client credentials) authentication.
    EntraServicePrincipal,
    /// Entra ID managed identity authentication.
    EntraManagedIdentity,
    /// Entra ID interactive/default authentication with an access token.
    EntraInteractive,
}

impl AuthMethod {
    /// Get the canonical configuration string for this method.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Sql => "sql",
            AuthMethod::EntraIntegrated => "entra_integrated",
            AuthMethod::EntraPassword => "entra_password",
            AuthMethod::EntraServicePrincipal => "entra_service_principal",
            AuthMethod::EntraManagedIdentity => "entra_managed_identity",
            AuthMethod::EntraInteractive => "entra_interactive",
        }
    }

    /// Whether this method needs the identity backend (everything but SQL).
    pub fn requires_identity_backend(&self) -> bool {
        !matches!(self, AuthMethod::Sql)
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sql" => Ok(AuthMethod::Sql),
            "entra_integrated" => Ok(AuthMethod::EntraIntegrated),
            "entra_password" => Ok(AuthMethod::EntraPassword),
            "entra_service_principal" => Ok(AuthMethod::EntraServicePrincipal),
            "entra_managed_identity" => Ok(AuthMethod::EntraManagedIdentity),
            "entra_interactive" => Ok(AuthMethod::EntraInteractive),
            other => Err(ServerError::unsupported_auth_method(other)),
        }
    }
}

/// Database connection configuration.
///
/// Which optional fields must be present depends on [`AuthMethod`]; the
/// invariants are enforced by [`DbConfig::from_env`] / [`DbConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// SQL Server address, optionally carrying a `,port` suffix.
    pub server: String,

    /// Database name.
    pub database: String,

    /// Selected authentication method.
    pub auth_method: AuthMethod,

    /// Username (SQL and Entra password authentication).
    pub user: Option<String>,

    /// Password (SQL and Entra password authentication).
    pub password: Option<String>,

    /// Client ID (service principal, user-assigned managed identity).
    pub client_id: Option<String>,

    /// Client secret (service principal).
    pub client_secret: Option<String>,

    /// Entra tenant ID (optional for service principal).
    pub tenant_id: Option<String>,

    /// Connection timeout in seconds.
    pub connection_timeout: u64,

    /// Enable TLS encryption.
    pub encrypt: bool,

    /// Trust server certificate (for self-signed certs).
    pub trust_server_certificate: bool,
}

impl DbConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// ## Required
    /// - `MSSQL_SERVER`: SQL Server address (may include `,port`)
    /// - `MSSQL_DATABASE`: Database name
    ///
    /// ## Optional
    /// - `MSSQL_AUTH_METHOD`: one of `sql`, `entra_integrated`,
    ///   `entra_password`, `entra_service_principal`,
    ///   `entra_managed_identity`, `entra_interactive` (default: `sql`)
    /// - `MSSQL_USER` / `MSSQL_PASSWORD`: credentials for `sql` and
    ///   `entra_password`
    /// - `MSSQL_CLIENT_ID` / `MSSQL_CLIENT_SECRET` / `MSSQL_TENANT_ID`:
    ///   service principal credentials; `MSSQL_CLIENT_ID` alone selects a
    ///   user-assigned managed identity
    /// - `MSSQL_CONNECTION_TIMEOUT`: seconds (default: 30)
    /// - `MSSQL_ENCRYPT`: yes/true/1 (default: true)
    /// - `MSSQL_TRUST_SERVER_CERTIFICATE`: yes/true/1 (default: false)
    pub fn from_env() -> Result<Self, ServerError> {
        let server = require_env("MSSQL_SERVER")?;
        let database = require_env("MSSQL_DATABASE")?;

        let auth_method = match std::env::var("MSSQL_AUTH_METHOD") {
            Ok(raw) => raw.parse()?,
            Err(_) => AuthMethod::Sql,
        };

        let connection_timeout = std::env::var("MSSQL_CONNECTION_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CONNECTION_TIMEOUT_SECS);

        let config = Self {
            server,
            database,
            auth_method,
            user: non_empty_env("MSSQL_USER"),
            password: non_empty_env("MSSQL_PASSWORD"),
            client_id: non_empty_env("MSSQL_CLIENT_ID"),
            client_secret: non_empty_env("MSSQL_CLIENT_SECRET"),
            tenant_id: non_empty_env("MSSQL_TENANT_ID"),
            connection_timeout,
            encrypt: flag_env("MSSQL_ENCRYPT", true),
            trust_server_certificate: flag_env("MSSQL_TRUST_SERVER_CERTIFICATE", false),
        };

        config.validate()?;
        Ok(config)
    }

    /// Enforce the per-method required-field table.
    pub fn validate(&self) -> Result<(), ServerError> {
        match self.auth_method {
            AuthMethod::Sql => {
                if self.user.is_none() || self.password.is_none() {
                    return Err(ServerError::missing_config(
                        "SQL authentication requires MSSQL_USER and MSSQL_PASSWORD",
                    ));
                }
            }
            AuthMethod::EntraPassword => {
                if self.user.is_none() || self.password.is_none() {
                    return Err(ServerError::missing_config(
                        "Entra ID password authentication requires MSSQL_USER and MSSQL_PASSWORD",
                    ));
                }
            }
            AuthMethod::EntraServicePrincipal => {
                if self.client_id.is_none() || self.client_secret.is_none() {
                    return Err(ServerError::missing_config(
                        "Entra ID service principal authentication requires \
                         MSSQL_CLIENT_ID and MSSQL_CLIENT_SECRET",
                    ));
                }
            }
            // client_id is optional: present selects a user-assigned identity
            AuthMethod::EntraManagedIdentity => {}
            AuthMethod::EntraIntegrated | AuthMethod::EntraInteractive => {}
        }
        Ok(())
    }

    /// Split `server` into host and port. A `,port` suffix follows SQL Server
    /// address convention (`host,1433`); absent means the default port.
    pub fn host_and_port(&self) -> (&str, u16) {
        match self.server.split_once(',') {
            Some((host, port)) => (host, port.trim().parse().unwrap_or(1433)),
            None => (self.server.as_str(), 1433),
        }
    }
}

fn require_env(name: &'static str) -> Result<String, ServerError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ServerError::missing_config(format!(
            "{name} environment variable is required"
        ))),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag_env(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "yes" | "true" | "1"),
        Err(_) => default,
    }
}
