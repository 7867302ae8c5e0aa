//! Durable server registry
//!
//! Two-table SQLite cache under `~/.checkerbase/server_registry.db`:
//!
//! - `verified_configs` - one row per domain, the config that last
//!   authenticated successfully, with an expiry
//! - `server_candidates` - many rows per domain, unique on
//!   `(domain, hostname, port)`, discovered but not yet proven
//!
//! Timestamps are stored as RFC 3339 UTC strings with fixed precision, so
//! expiry comparisons work lexicographically in SQL. Schema creation is
//! idempotent and runs on first access; the connection lives behind an
//! async mutex because callers serialize through it anyway.

use super::{ConfigSource, SecurityMode, ServerConfig, UsernameFormat};
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS verified_configs (
    domain          TEXT PRIMARY KEY,
    hostname        TEXT NOT NULL,
    port            INTEGER NOT NULL,
    security        TEXT NOT NULL,
    username_format TEXT NOT NULL,
    source          TEXT NOT NULL,
    priority        INTEGER NOT NULL,
    verified_at     TEXT NOT NULL,
    expires_at      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS server_candidates (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    domain          TEXT NOT NULL,
    hostname        TEXT NOT NULL,
    port            INTEGER NOT NULL,
    security        TEXT NOT NULL,
    username_format TEXT NOT NULL,
    source          TEXT NOT NULL,
    priority        INTEGER NOT NULL,
    expires_at      TEXT NOT NULL,
    UNIQUE(domain, hostname, port)
);
CREATE INDEX IF NOT EXISTS idx_candidates_domain ON server_candidates(domain);
CREATE INDEX IF NOT EXISTS idx_candidates_expires ON server_candidates(expires_at);
CREATE INDEX IF NOT EXISTS idx_verified_expires ON verified_configs(expires_at);
";

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn expiry_string(ttl: Duration) -> String {
    (Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()))
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed cache of verified and candidate configs
pub struct ServerRegistry {
    path: PathBuf,
    conn: OnceCell<Mutex<Connection>>,
}

impl ServerRegistry {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            conn: OnceCell::new(),
        }
    }

    /// Default on-disk location: `~/.checkerbase/server_registry.db`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home
            .join(crate::constants::paths::APP_DIR)
            .join(crate::constants::paths::REGISTRY_FILE))
    }

    async fn conn(&self) -> Result<&Mutex<Connection>> {
        self.conn
            .get_or_try_init(|| async {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let conn = Connection::open(&self.path)
                    .with_context(|| format!("Failed to open registry at {}", self.path.display()))?;
                // journal_mode returns the resulting mode as a row
                let _mode: String =
                    conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
                conn.execute_batch(SCHEMA)?;
                debug!("Registry ready at {}", self.path.display());
                Ok::<_, anyhow::Error>(Mutex::new(conn))
            })
            .await
    }

    /// Unexpired verified config for `domain`, if any
    pub async fn get_verified(&self, domain: &str) -> Result<Option<ServerConfig>> {
        let conn = self.conn().await?;
        let conn = conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT hostname, port, security, username_format, source, priority \
             FROM verified_configs WHERE domain = ?1 AND expires_at > ?2",
        )?;
        let config = stmt
            .query_row(params![domain, now_string()], row_to_config)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(config)
    }

    /// Upsert the verified config for `domain`
    pub async fn set_verified(
        &self,
        domain: &str,
        config: &ServerConfig,
        ttl: Duration,
    ) -> Result<()> {
        let conn = self.conn().await?;
        let conn = conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO verified_configs \
             (domain, hostname, port, security, username_format, source, priority, verified_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                domain,
                config.hostname,
                config.port,
                config.security.as_str(),
                config.username_format.as_str(),
                config.source.as_str(),
                config.priority,
                now_string(),
                expiry_string(ttl),
            ],
        )?;
        Ok(())
    }

    /// Unexpired candidates for `domain`, sorted by priority ascending
    pub async fn get_candidates(&self, domain: &str) -> Result<Vec<ServerConfig>> {
        let conn = self.conn().await?;
        let conn = conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT hostname, port, security, username_format, source, priority \
             FROM server_candidates WHERE domain = ?1 AND expires_at > ?2 \
             ORDER BY priority ASC, hostname ASC",
        )?;
        let rows = stmt.query_map(params![domain, now_string()], row_to_config)?;
        let mut configs = Vec::new();
        for row in rows {
            configs.push(row?);
        }
        Ok(configs)
    }

    /// Replace all candidates for `domain` in one transaction
    ///
    /// Delete-then-insert keeps stale rows from surviving a re-discovery;
    /// `INSERT OR REPLACE` tolerates duplicate `(domain, hostname, port)`
    /// entries within `configs` itself.
    pub async fn set_candidates(
        &self,
        domain: &str,
        configs: &[ServerConfig],
        ttl: Duration,
    ) -> Result<()> {
        let conn = self.conn().await?;
        let mut conn = conn.lock().await;
        let expires = expiry_string(ttl);

        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM server_candidates WHERE domain = ?1",
            params![domain],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO server_candidates \
                 (domain, hostname, port, security, username_format, source, priority, expires_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for config in configs {
                stmt.execute(params![
                    domain,
                    config.hostname,
                    config.port,
                    config.security.as_str(),
                    config.username_format.as_str(),
                    config.source.as_str(),
                    config.priority,
                    expires,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Drop expired rows from both tables; returns how many went
    pub async fn clean_expired(&self) -> Result<usize> {
        let conn = self.conn().await?;
        let conn = conn.lock().await;
        let now = now_string();
        let verified = conn.execute(
            "DELETE FROM verified_configs WHERE expires_at <= ?1",
            params![now],
        )?;
        let candidates = conn.execute(
            "DELETE FROM server_candidates WHERE expires_at <= ?1",
            params![now],
        )?;
        let removed = verified + candidates;
        if removed > 0 {
            debug!("Removed {} expired registry row(s)", removed);
        }
        Ok(removed)
    }
}

fn row_to_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<ServerConfig> {
    let security: String = row.get(2)?;
    let username_format: String = row.get(3)?;
    let source: String = row.get(4)?;
    Ok(ServerConfig {
        hostname: row.get(0)?,
        port: row.get(1)?,
        security: SecurityMode::from_str_lossy(&security),
        username_format: UsernameFormat::from_str_lossy(&username_format),
        source: ConfigSource::from_str_lossy(&source),
        priority: row.get(5)?,
    })
}
