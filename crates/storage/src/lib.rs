use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Mutex,
};

use shared::domain::{Session, DEFAULT_ROLE};

pub const AUTH_TOKEN_KEY: &str = "auth_token";
pub const IDENTITY_KEY: &str = "user_identity";
pub const IS_HOST_KEY: &str = "is_host";
pub const ROLE_KEY: &str = "user_role";

/// Every entry that makes up one persisted session record.
pub const SESSION_KEYS: [&str; 4] = [AUTH_TOKEN_KEY, IDENTITY_KEY, IS_HOST_KEY, ROLE_KEY];

pub type SessionEntries = BTreeMap<String, String>;

/// Durable home of the session record.
///
/// Implementations read and write all entries of the record as one unit, so a
/// reader never sees a token from one session next to the role of another.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self) -> Result<Option<Session>>;
    async fn save_session(&self, session: &Session) -> Result<()>;
    /// Removes every session entry. Succeeds when nothing is stored.
    async fn clear_session(&self) -> Result<()>;
}

pub fn encode_session(session: &Session) -> SessionEntries {
    SessionEntries::from([
        (AUTH_TOKEN_KEY.to_string(), session.token.clone()),
        (IDENTITY_KEY.to_string(), session.identity.clone()),
        (IS_HOST_KEY.to_string(), session.is_host.to_string()),
        (ROLE_KEY.to_string(), session.role.clone()),
    ])
}

/// Rebuilds a session from raw entries. A missing or empty token means there is
/// no session, whatever the other entries hold.
pub fn decode_session(entries: &SessionEntries) -> Option<Session> {
    let token = entries
        .get(AUTH_TOKEN_KEY)
        .filter(|token| !token.is_empty())?;

    let role = entries
        .get(ROLE_KEY)
        .filter(|role| !role.is_empty())
        .cloned()
        .unwrap_or_else(|| DEFAULT_ROLE.to_string());

    Some(Session {
        token: token.clone(),
        identity: entries.get(IDENTITY_KEY).cloned().unwrap_or_default(),
        is_host: entries.get(IS_HOST_KEY).map(String::as_str) == Some("true"),
        role,
    })
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid sqlite url '{database_url}'"))?
            .create_if_missing(true);

        // Every connection to an in-memory database gets its own empty database.
        let pool = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(connect_options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(connect_options)
                .await?
        };

        let storage = Self { pool };
        storage.ensure_schema().await?;
        Ok(storage)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_entries (
                key        TEXT PRIMARY KEY NOT NULL,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure session_entries table exists")?;
        Ok(())
    }

    /// Reads all session entries in a single statement.
    pub async fn session_entries(&self) -> Result<SessionEntries> {
        let rows = sqlx::query(
            "SELECT key, value FROM session_entries WHERE key IN (?, ?, ?, ?)",
        )
        .bind(AUTH_TOKEN_KEY)
        .bind(IDENTITY_KEY)
        .bind(IS_HOST_KEY)
        .bind(ROLE_KEY)
        .fetch_all(&self.pool)
        .await
        .context("failed to read session entries")?;

        let mut entries = SessionEntries::new();
        for row in rows {
            entries.insert(row.try_get("key")?, row.try_get("value")?);
        }
        Ok(entries)
    }

    /// Writes one raw entry. Session writes go through [`SessionStore::save_session`].
    #[cfg(test)]
    pub(crate) async fn put_entry(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_entries (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write session entry '{key}'"))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn remove_entry(&self, key: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM session_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to remove session entry '{key}'"))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionStore for Storage {
    async fn load_session(&self) -> Result<Option<Session>> {
        Ok(decode_session(&self.session_entries().await?))
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (key, value) in encode_session(session) {
            sqlx::query(
                "INSERT INTO session_entries (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
            )
            .bind(&key)
            .bind(&value)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to write session entry '{key}'"))?;
        }

        tx.commit().await.context("failed to commit session record")?;
        Ok(())
    }

    async fn clear_session(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM session_entries WHERE key IN (?, ?, ?, ?)")
            .bind(AUTH_TOKEN_KEY)
            .bind(IDENTITY_KEY)
            .bind(IS_HOST_KEY)
            .bind(ROLE_KEY)
            .execute(&mut *tx)
            .await
            .context("failed to clear session entries")?;

        tx.commit().await.context("failed to commit session clear")?;
        Ok(())
    }
}

/// Process-local session store with the same record semantics as [`Storage`].
#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<SessionEntries>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn entries(&self) -> Result<SessionEntries> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SessionEntries>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_session(&self) -> Result<Option<Session>> {
        Ok(decode_session(&*self.lock()?))
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        self.lock()?.extend(encode_session(session));
        Ok(())
    }

    async fn clear_session(&self) -> Result<()> {
        let mut guard = self.lock()?;
        for key in SESSION_KEYS {
            guard.remove(key);
        }
        Ok(())
    }
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
