//! Database connectivity, authentication, and query execution.

pub mod connection;
pub mod credentials;
pub mod query;
pub mod token_cache;
pub mod types;

pub use connection::{
    ConnectionManager, ConnectionOpener, DbConnection, MssqlConnectionManager, TiberiusOpener,
};
pub use credentials::{
    default_token_source, AcquiredToken, ConnectionParams, Credential, CredentialProvider,
    TokenSource,
};
pub use query::QueryResult;
pub use token_cache::{CachedToken, TokenCache};
pub use types::SqlValue;
