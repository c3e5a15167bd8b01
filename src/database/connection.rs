//! Shared connection management.
//!
//! One connection serves all requests, guarded by a mutex so statements
//! never interleave on the wire. [`ConnectionManager::acquire`] health-probes
//! the existing connection and transparently replaces it when the probe
//! fails, holding the slot lock across the whole check so concurrent callers
//! cannot race a reconnect: when many requests arrive on a cold slot,
//! exactly one connection is opened and everyone shares it.

use crate::config::DbConfig;
use crate::constants::APPLICATION_NAME;
use crate::database::credentials::{ConnectionParams, Credential, CredentialProvider};
use crate::error::ServerError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

/// A live tiberius connection.
pub type DbConnection = tiberius::Client<Compat<TcpStream>>;

/// Driver boundary: opens and health-probes connections.
///
/// Production uses [`TiberiusOpener`]; tests substitute a counting mock.
#[async_trait]
pub trait ConnectionOpener: Send + Sync {
    type Conn: Send;

    /// Open a new connection with the given parameters.
    async fn open(&self, params: &ConnectionParams) -> Result<Self::Conn, ServerError>;

    /// Whether the connection still responds.
    async fn probe(&self, conn: &mut Self::Conn) -> bool;
}

/// Opens TDS connections via tiberius.
pub struct TiberiusOpener;

#[async_trait]
impl ConnectionOpener for TiberiusOpener {
    type Conn = DbConnection;

    async fn open(&self, params: &ConnectionParams) -> Result<DbConnection, ServerError> {
        let mut config = tiberius::Config::new();
        config.host(&params.host);
        config.port(params.port);
        config.database(&params.database);
        config.application_name(APPLICATION_NAME);

        if params.encrypt {
            config.encryption(tiberius::EncryptionLevel::Required);
        } else {
            config.encryption(tiberius::EncryptionLevel::Off);
        }
        if params.trust_server_certificate {
            config.trust_cert();
        }

        match &params.credential {
            Credential::SqlPassword { user, password } => {
                config.authentication(tiberius::AuthMethod::sql_server(user, password));
            }
            Credential::Bearer { token, .. } => {
                config.authentication(tiberius::AuthMethod::aad_token(token));
            }
        }

        let address = format!("{}:{}", params.host, params.port);
        debug!("Connecting to {}", address);

        let tcp = tokio::time::timeout(params.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                ServerError::connection(format!(
                    "Connection to {} timed out after {:?}",
                    address, params.connect_timeout
                ))
            })?
            .map_err(|e| {
                ServerError::connection_with_source(format!("Failed to connect to {}", address), e)
            })?;

        tcp.set_nodelay(true)
            .map_err(|e| ServerError::connection_with_source("Failed to set TCP_NODELAY", e))?;

        let client = tiberius::Client::connect(config, tcp.compat_write())
            .await
            .map_err(ServerError::from)?;

        debug!("Connection established");
        Ok(client)
    }

    async fn probe(&self, conn: &mut DbConnection) -> bool {
        match conn.simple_query("SELECT 1").await {
            Ok(stream) => stream.into_results().await.is_ok(),
            Err(_) => false,
        }
    }
}

/// Owns the single shared connection.
pub struct ConnectionManager<O: ConnectionOpener> {
    config: Arc<DbConfig>,
    provider: CredentialProvider,
    opener: O,
    slot: Mutex<Option<Arc<Mutex<O::Conn>>>>,
}

/// The manager wired to the real driver.
pub type MssqlConnectionManager = ConnectionManager<TiberiusOpener>;

impl<O: ConnectionOpener> ConnectionManager<O> {
    pub fn new(config: Arc<DbConfig>, provider: CredentialProvider, opener: O) -> Self {
        Self {
            config,
            provider,
            opener,
            slot: Mutex::new(None),
        }
    }

    /// Hand out the shared connection, opening or replacing it as needed.
    pub async fn acquire(&self) -> Result<Arc<Mutex<O::Conn>>, ServerError> {
        let mut slot = self.slot.lock().await;

        if let Some(existing) = slot.as_ref() {
            let healthy = {
                let mut conn = existing.lock().await;
                self.opener.probe(&mut conn).await
            };
            if healthy {
                return Ok(Arc::clone(existing));
            }
            warn!("Connection failed health probe, reconnecting");
            *slot = None;
        }

        let conn = self.open_fresh().await?;
        let shared = Arc::new(Mutex::new(conn));
        *slot = Some(Arc::clone(&shared));
        Ok(shared)
    }

    /// Drop the shared connection so the next acquire opens a new one.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
        debug!("Connection slot invalidated");
    }

    /// Open a connection, retrying exactly once with a fresh token when an
    /// attempt made with a cached token fails.
    async fn open_fresh(&self) -> Result<O::Conn, ServerError> {
        let params = self.provider.resolve(&self.config).await?;
        let used_cached_token = params.uses_cached_token();

        match self.opener.open(&params).await {
            Ok(conn) => {
                info!(
                    "Connected to {}/{} via {}",
                    self.config.server, self.config.database, self.config.auth_method
                );
                Ok(conn)
            }
            Err(e)
                if used_cached_token
                    && matches!(
                        e,
                        ServerError::AuthenticationFailed { .. }
                            | ServerError::ConnectionFailed { .. }
                    ) =>
            {
                warn!("Cached token rejected, acquiring a fresh one: {}", e);
                self.provider.invalidate_cached_token();
                let params = self.provider.resolve_with_cache(&self.config, false).await?;
                let conn = self.opener.open(&params).await?;
                info!(
                    "Connected to {}/{} with a fresh token",
                    self.config.server, self.config.database
                );
                Ok(conn)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthMethod;
    use crate::database::credentials::{AcquiredToken, TokenSource};
    use crate::database::token_cache::TokenCache;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct MockState {
        attempts: AtomicUsize,
        probes: AtomicUsize,
        healthy: AtomicBool,
        reject_cached_tokens: AtomicBool,
        reject_all_tokens: AtomicBool,
    }

    #[derive(Clone)]
    struct MockOpener {
        state: Arc<MockState>,
    }

    impl MockOpener {
        fn new() -> Self {
            Self {
                state: Arc::new(MockState {
                    attempts: AtomicUsize::new(0),
                    probes: AtomicUsize::new(0),
                    healthy: AtomicBool::new(true),
                    reject_cached_tokens: AtomicBool::new(false),
                    reject_all_tokens: AtomicBool::new(false),
                }),
            }
        }
    }

    #[async_trait]
    impl ConnectionOpener for MockOpener {
        type Conn = usize;

        async fn open(&self, params: &ConnectionParams) -> Result<usize, ServerError> {
            let id = self.state.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let is_token = matches!(params.credential, Credential::Bearer { .. });
            if self.state.reject_all_tokens.load(Ordering::SeqCst) && is_token {
                return Err(ServerError::auth("Login failed for token"));
            }
            if self.state.reject_cached_tokens.load(Ordering::SeqCst) && params.uses_cached_token()
            {
                return Err(ServerError::auth("Login failed for cached token"));
            }
            Ok(id)
        }

        async fn probe(&self, _conn: &mut usize) -> bool {
            self.state.probes.fetch_add(1, Ordering::SeqCst);
            self.state.healthy.load(Ordering::SeqCst)
        }
    }

    struct StaticTokenSource {
        acquisitions: AtomicUsize,
    }

    #[async_trait]
    impl TokenSource for StaticTokenSource {
        fn available(&self) -> bool {
            true
        }

        async fn acquire(
            &self,
            _config: &DbConfig,
            _scope: &str,
        ) -> Result<AcquiredToken, ServerError> {
            let n = self.acquisitions.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AcquiredToken {
                token: format!("fresh-token-{n}"),
                expires_on: chrono::Utc::now().timestamp() + 3600,
            })
        }
    }

    fn config(method: AuthMethod) -> Arc<DbConfig> {
        Arc::new(DbConfig {
            server: "db1".to_string(),
            database: "sales".to_string(),
            auth_method: method,
            user: Some("alice".to_string()),
            password: Some("pw".to_string()),
            client_id: None,
            client_secret: None,
            tenant_id: None,
            connection_timeout: 30,
            encrypt: true,
            trust_server_certificate: false,
        })
    }

    fn manager_in(
        dir: &TempDir,
        config: Arc<DbConfig>,
        opener: MockOpener,
    ) -> (ConnectionManager<MockOpener>, TokenCache) {
        let cache = TokenCache::with_path(dir.path().join("token.json"));
        let provider = CredentialProvider::new(
            cache.clone(),
            Arc::new(StaticTokenSource {
                acquisitions: AtomicUsize::new(0),
            }),
        );
        (ConnectionManager::new(config, provider, opener), cache)
    }

    #[tokio::test]
    async fn test_acquire_reuses_healthy_connection() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        let (manager, _) = manager_in(&dir, config(AuthMethod::Sql), opener.clone());

        let first = manager.acquire().await.unwrap();
        let second = manager.acquire().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(opener.state.attempts.load(Ordering::SeqCst), 1);
        // Cold slot skips the probe; the second acquire probes once
        assert_eq!(opener.state.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_probe_replaces_connection() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        let (manager, _) = manager_in(&dir, config(AuthMethod::Sql), opener.clone());

        let first = manager.acquire().await.unwrap();
        opener.state.healthy.store(false, Ordering::SeqCst);
        let second = manager.acquire().await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(opener.state.attempts.load(Ordering::SeqCst), 2);
        assert_ne!(*first.lock().await, *second.lock().await);
    }

    #[tokio::test]
    async fn test_concurrent_acquires_open_one_connection() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        let (manager, _) = manager_in(&dir, config(AuthMethod::Sql), opener.clone());
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.acquire().await }));
        }

        let mut conns = Vec::new();
        for handle in handles {
            conns.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(opener.state.attempts.load(Ordering::SeqCst), 1);
        for conn in &conns[1..] {
            assert!(Arc::ptr_eq(&conns[0], conn));
        }
    }

    #[tokio::test]
    async fn test_rejected_cached_token_retries_with_fresh() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        opener.state.reject_cached_tokens.store(true, Ordering::SeqCst);
        let cfg = config(AuthMethod::EntraInteractive);
        let (manager, cache) = manager_in(&dir, Arc::clone(&cfg), opener.clone());

        // Seed the cache with a token the server will reject
        cache.save("stale-token", chrono::Utc::now().timestamp() + 3600, &cfg);

        manager.acquire().await.unwrap();

        // Rejected once, then succeeded with a fresh token
        assert_eq!(opener.state.attempts.load(Ordering::SeqCst), 2);
        // The stale record was replaced by the freshly acquired token
        assert_eq!(cache.load(&cfg).unwrap().token, "fresh-token-1");
    }

    #[tokio::test]
    async fn test_token_rejection_retries_exactly_once() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        opener.state.reject_all_tokens.store(true, Ordering::SeqCst);
        let cfg = config(AuthMethod::EntraInteractive);
        let (manager, cache) = manager_in(&dir, Arc::clone(&cfg), opener.clone());

        cache.save("stale-token", chrono::Utc::now().timestamp() + 3600, &cfg);

        let err = manager.acquire().await.unwrap_err();
        assert!(matches!(err, ServerError::AuthenticationFailed { .. }));
        // One attempt with the cached token, one with a fresh token, no loop
        assert_eq!(opener.state.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fresh_token_rejection_does_not_retry() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        opener.state.reject_all_tokens.store(true, Ordering::SeqCst);
        let cfg = config(AuthMethod::EntraInteractive);
        let (manager, _) = manager_in(&dir, cfg, opener.clone());

        // Cold cache: the first attempt already uses a fresh token
        let err = manager.acquire().await.unwrap_err();
        assert!(matches!(err, ServerError::AuthenticationFailed { .. }));
        assert_eq!(opener.state.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reconnect() {
        let dir = TempDir::new().unwrap();
        let opener = MockOpener::new();
        let (manager, _) = manager_in(&dir, config(AuthMethod::Sql), opener.clone());

        let first = manager.acquire().await.unwrap();
        manager.invalidate().await;
        let second = manager.acquire().await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(opener.state.attempts.load(Ordering::SeqCst), 2);
    }
}
