//! Persistent cache for Entra ID access tokens.
//!
//! A single-slot JSON file under the per-user cache directory keeps the last
//! acquired token across process restarts so the interactive flow does not
//! prompt on every start. Losing the cache only forces re-authentication, so
//! every failure here degrades: writes are logged and swallowed, reads
//! collapse to "no usable token".

use crate::config::DbConfig;
use crate::constants::{TOKEN_CACHE_DIR, TOKEN_CACHE_FILE, TOKEN_EXPIRY_BUFFER_SECS};
use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// A cached access token with its issuance context.
///
/// The record is keyed by (server, database) only, not by auth method or
/// principal: two principals sharing a user cache directory will overwrite
/// each other's token. This mirrors the original cache layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedToken {
    /// The opaque bearer token string.
    pub token: String,

    /// Absolute expiry, seconds since the Unix epoch.
    pub expires_on: i64,

    /// Server the token was issued for.
    pub server: String,

    /// Database the token was issued for.
    pub database: String,

    /// Wall-clock time the token was cached, seconds since the Unix epoch.
    pub cached_at: i64,
}

impl CachedToken {
    /// A token is usable iff `now < expires_on - buffer` and it was issued
    /// for the same (server, database) pair.
    fn is_usable(&self, config: &DbConfig, now: i64) -> bool {
        self.server == config.server
            && self.database == config.database
            && now < self.expires_on - TOKEN_EXPIRY_BUFFER_SECS
    }
}

/// File-backed single-slot token cache.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    /// Create a cache at the default per-user location
    /// (`<cache dir>/mssql-entra-mcp/token.json`).
    pub fn new() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            path: base.join(TOKEN_CACHE_DIR).join(TOKEN_CACHE_FILE),
        }
    }

    /// Create a cache at an explicit path.
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Path of the cache file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Persist a token. Failures are logged and swallowed because losing
    /// the cache only forces re-authentication.
    pub fn save(&self, token: &str, expires_on: i64, config: &DbConfig) {
        let record = CachedToken {
            token: token.to_string(),
            expires_on,
            server: config.server.clone(),
            database: config.database.clone(),
            cached_at: chrono::Utc::now().timestamp(),
        };

        if let Err(e) = self.try_save(&record) {
            warn!("Failed to persist token cache: {}", e);
        } else {
            debug!(
                "Cached token for {}/{} (expires_on: {})",
                config.server, config.database, expires_on
            );
        }
    }

    /// Load the cached token if it is present and usable for `config`.
    ///
    /// Absent, unreadable, malformed, mismatched, and expired-within-buffer
    /// records all return `None`.
    pub fn load(&self, config: &DbConfig) -> Option<CachedToken> {
        self.load_at(config, chrono::Utc::now().timestamp())
    }

    /// `load` with an explicit notion of "now" for expiry arithmetic.
    pub fn load_at(&self, config: &DbConfig, now: i64) -> Option<CachedToken> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return None,
        };

        let record: CachedToken = match serde_json::from_str(&contents) {
            Ok(r) => r,
            Err(e) => {
                warn!("Ignoring malformed token cache: {}", e);
                return None;
            }
        };

        if !record.is_usable(config, now) {
            debug!("Cached token is stale or issued for a different target");
            return None;
        }

        Some(record)
    }

    /// Delete the cache file. Absence is not an error.
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Token cache cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clear token cache: {}", e),
        }
    }

    fn try_save(&self, record: &CachedToken) -> Result<(), ServerError> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| ServerError::token_cache("cache path has no parent directory"))?;

        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| ServerError::token_cache(format!("create {}: {}", dir.display(), e)))?;
            restrict_permissions(dir, 0o700);
        }

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| ServerError::token_cache(format!("serialize: {}", e)))?;

        // Atomic replace: readers never observe a partial record.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| ServerError::token_cache(format!("write {}: {}", tmp.display(), e)))?;
        restrict_permissions(&tmp, 0o600);
        fs::rename(&tmp, &self.path)
            .map_err(|e| ServerError::token_cache(format!("rename: {}", e)))?;

        Ok(())
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner-only permissions, best effort on non-unix platforms.
#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        warn!("Failed to restrict permissions on {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path, _mode: u32) {}
