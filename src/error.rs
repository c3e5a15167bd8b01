//! Error types for the MSSQL Entra MCP Server.
//!
//! The taxonomy distinguishes fatal configuration problems from recoverable
//! runtime failures. Token cache errors are deliberately absent from most
//! signatures: caching is an optimization, so those errors are logged and
//! swallowed at the call site instead of propagated.

use thiserror::Error;

/// Domain-specific errors for the MSSQL Entra MCP Server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Required configuration is absent or inconsistent. Fatal: the process
    /// cannot serve requests.
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    /// The configured authentication method string is not recognized.
    #[error("Unsupported authentication method: {0}")]
    UnsupportedAuthMethod(String),

    /// The identity backend (Azure identity SDK) is not compiled in or not
    /// usable. Fatal for the selected method only.
    #[error("Identity backend unavailable: {0}")]
    AuthBackendUnavailable(String),

    /// Token acquisition or login failed. Recoverable: the next request
    /// retries from scratch.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Opening or talking to the database failed. Recoverable.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Token cache read/write problem. Never surfaced across the tool
    /// boundary; callers degrade to "no cached token".
    #[error("Token cache error: {0}")]
    TokenCache(String),

    /// Query execution error reported by the server.
    #[error("Query execution error: {message}")]
    QueryExecution {
        message: String,
        sql_error_code: Option<i32>,
    },
}

impl ServerError {
    /// Create a missing-configuration error.
    pub fn missing_config(msg: impl Into<String>) -> Self {
        Self::MissingConfig(msg.into())
    }

    /// Create an unsupported-auth-method error.
    pub fn unsupported_auth_method(method: impl Into<String>) -> Self {
        Self::UnsupportedAuthMethod(method.into())
    }

    /// Create an identity-backend-unavailable error.
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::AuthBackendUnavailable(msg.into())
    }

    /// Create an authentication error.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: msg.into(),
            source: None,
        }
    }

    /// Create an authentication error with an underlying cause.
    pub fn auth_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::AuthenticationFailed {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connection error with an underlying cause.
    pub fn connection_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConnectionFailed {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a token cache error.
    pub fn token_cache(msg: impl Into<String>) -> Self {
        Self::TokenCache(msg.into())
    }

    /// Create a query execution error.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::QueryExecution {
            message: msg.into(),
            sql_error_code: None,
        }
    }

    /// Whether the next request may succeed without operator intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. }
                | Self::ConnectionFailed { .. }
                | Self::TokenCache(_)
                | Self::QueryExecution { .. }
        )
    }

    /// Get a user-friendly suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::MissingConfig(_) => Some("Check your MSSQL_* environment variables"),
            Self::UnsupportedAuthMethod(_) => Some(
                "Set MSSQL_AUTH_METHOD to one of: sql, entra_integrated, entra_password, \
                 entra_service_principal, entra_managed_identity, entra_interactive",
            ),
            Self::AuthBackendUnavailable(_) => {
                Some("Rebuild with: cargo build --features azure-auth")
            }
            Self::AuthenticationFailed { .. } => {
                Some("Verify your credentials and Entra ID configuration")
            }
            Self::ConnectionFailed { .. } => {
                Some("Check server hostname, port, and network connectivity")
            }
            Self::QueryExecution { .. } => None,
            Self::TokenCache(_) => None,
        }
    }
}

impl From<tiberius::error::Error> for ServerError {
    fn from(e: tiberius::error::Error) -> Self {
        use tiberius::error::Error;

        match &e {
            Error::Server(token) => {
                let code = token.code() as i32;
                // 18456: login failed
                if code == 18456 {
                    ServerError::auth(format!("Login failed: {}", token.message()))
                } else {
                    ServerError::QueryExecution {
                        message: token.message().to_string(),
                        sql_error_code: Some(code),
                    }
                }
            }
            Error::Io { .. } => ServerError::connection_with_source("IO error", e),
            Error::Tls(_) => ServerError::connection_with_source("TLS error", e),
            Error::Routing { .. } => ServerError::connection_with_source("Server routing error", e),
            _ => ServerError::connection_with_source("Driver error", e),
        }
    }
}
