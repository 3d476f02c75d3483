use std::sync::Arc;

use anyhow::{Context, Result};
use shared::domain::{Session, SessionState};
use storage::SessionStore;
use tokio::sync::{watch, Mutex};
use tracing::info;

/// Single owner of the authentication state.
///
/// `establish` and `clear` are the only mutators. Each one updates the durable
/// record first and publishes the in-memory state after the write succeeded, so
/// subscribers and storage never disagree about whether a user is signed in.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    state: watch::Sender<SessionState>,
    // Serialises store writes with their publication.
    write_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Anonymous);
        Arc::new(Self {
            store,
            state,
            write_lock: Mutex::new(()),
        })
    }

    /// Builds the manager and restores any persisted session. Call once at startup.
    pub async fn initialize(store: Arc<dyn SessionStore>) -> Result<Arc<Self>> {
        let manager = Self::new(store);
        manager.restore().await?;
        Ok(manager)
    }

    pub async fn restore(&self) -> Result<Option<Session>> {
        let _guard = self.write_lock.lock().await;
        let restored = self
            .store
            .load_session()
            .await
            .context("failed to restore session")?;

        match &restored {
            Some(session) => info!(
                "session: restored role={} host={}",
                session.role, session.is_host
            ),
            None => info!("session: nothing to restore"),
        }

        self.state.send_replace(SessionState::from(restored.clone()));
        Ok(restored)
    }

    pub async fn establish(&self, session: Session) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store
            .save_session(&session)
            .await
            .context("failed to persist session")?;

        info!(
            "session: established role={} host={}",
            session.role, session.is_host
        );
        self.state.send_replace(SessionState::Authenticated(session));
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store
            .clear_session()
            .await
            .context("failed to clear persisted session")?;

        let previous = self.state.send_replace(SessionState::Anonymous);
        if previous.is_authenticated() {
            info!("session: cleared");
        }
        Ok(())
    }

    pub fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    /// Read-only view for presentation code; fires on every establish/clear/restore.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/session_manager_tests.rs"]
mod tests;
