//! Keyed collection of live sessions.
//!
//! The map itself sits behind a short-lived lock that is always released
//! before any session lock is taken. Each session carries its own async
//! mutex, held for the full duration of a command, which is what serializes
//! concurrent runs against the same shell.

use crate::session::BashSession;
use shellbox_api_types::{CreateBashSessionRequest, CreateSessionResponse, RuntimeError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub type SessionHandle = Arc<tokio::sync::Mutex<BashSession>>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the name, start the shell, and keep it only if startup
    /// succeeds. The name is claimed before the (slow) start so a
    /// concurrent create with the same name fails fast.
    pub async fn create(
        &self,
        request: CreateBashSessionRequest,
    ) -> Result<CreateSessionResponse, RuntimeError> {
        let name = request.session.clone();
        let handle = Arc::new(tokio::sync::Mutex::new(BashSession::new(request)));
        {
            let mut sessions = self.sessions.lock().unwrap();
            if sessions.contains_key(&name) {
                return Err(RuntimeError::session_exists(&name));
            }
            sessions.insert(name.clone(), Arc::clone(&handle));
        }

        let started = {
            let mut session = handle.lock().await;
            session.start().await
        };
        match started {
            Ok(response) => {
                info!(session = %name, "session started");
                Ok(response)
            }
            Err(err) => {
                self.sessions.lock().unwrap().remove(&name);
                // reap the half-started shell, if one exists
                if let Err(close_err) = handle.lock().await.close().await {
                    warn!(session = %name, error = %close_err, "failed to clean up after failed start");
                }
                Err(err)
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<SessionHandle, RuntimeError> {
        self.sessions
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::session_does_not_exist(name))
    }

    /// Remove and close. The entry disappears immediately (a second remove
    /// reports "does not exist"); the close itself waits on the session
    /// lock, i.e. on any in-flight command, whose own deadline bounds the
    /// wait. Close failures are logged, not returned.
    pub async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        let handle = self
            .sessions
            .lock()
            .unwrap()
            .remove(name)
            .ok_or_else(|| RuntimeError::session_does_not_exist(name))?;
        let mut session = handle.lock().await;
        if let Err(err) = session.close().await {
            warn!(session = name, error = %err, "failed to close session");
        }
        info!(session = name, "session closed");
        Ok(())
    }

    pub async fn close_all(&self) {
        let names: Vec<String> = self.sessions.lock().unwrap().keys().cloned().collect();
        for name in names {
            if let Err(err) = self.remove(&name).await {
                warn!(session = %name, error = %err, "failed to close session during shutdown");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
