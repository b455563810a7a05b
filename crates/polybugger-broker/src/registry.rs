//! Process-wide session registry.
//!
//! A mutex-guarded map of session id to session with a capacity cap and a
//! periodic idle sweeper. Mutating registry operations hold the map lock;
//! per-session operations never do.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use polybugger_session::{Session, SessionState};

use crate::error::BrokerError;

/// Registry limits and sweeping cadence.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum concurrent sessions.
    pub max_sessions: usize,
    /// Idle cutoff: RUNNING/STOPPED sessions untouched for this long get
    /// terminated.
    pub session_timeout: Duration,
    /// How often the sweeper wakes.
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            session_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// The session map.
#[derive(Debug)]
pub struct Registry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    config: RegistryConfig,
}

impl Registry {
    /// Empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// The configured limits.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Insert a new session; fails when the registry is full.
    pub fn insert(&self, session: Session) -> Result<Arc<Session>, BrokerError> {
        let mut sessions = self.sessions.lock().expect("registry poisoned");
        if sessions.len() >= self.config.max_sessions {
            return Err(BrokerError::CapacityExceeded {
                max: self.config.max_sessions,
            });
        }
        let session = Arc::new(session);
        sessions.insert(session.id().to_string(), session.clone());
        Ok(session)
    }

    /// Look a session up by id.
    pub fn get(&self, id: &str) -> Result<Arc<Session>, BrokerError> {
        self.sessions
            .lock()
            .expect("registry poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| BrokerError::SessionNotFound(id.to_string()))
    }

    /// Snapshot of all sessions.
    pub fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .expect("registry poisoned")
            .values()
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.id().cmp(b.id()));
        sessions
    }

    /// Remove a session from the map (the caller keeps the Arc alive for
    /// teardown).
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().expect("registry poisoned").remove(id)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("registry poisoned").len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One sweep pass: terminate live sessions idle past the cutoff.
    /// Returns the ids that were terminated.
    pub async fn sweep_idle(&self) -> Vec<String> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(self.config.session_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));

        // Snapshot under the lock, terminate outside it.
        let stale: Vec<Arc<Session>> = self
            .list()
            .into_iter()
            .filter(|s| {
                matches!(
                    s.state(),
                    SessionState::Running | SessionState::Stopped
                ) && s.last_activity() < cutoff
            })
            .collect();

        let mut terminated = Vec::new();
        for session in stale {
            tracing::info!(session = session.id(), "terminating idle session");
            if session.terminate().await.is_ok() {
                terminated.push(session.id().to_string());
            }
        }
        terminated
    }

    /// Spawn the periodic sweeper.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        let interval = registry.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let terminated = registry.sweep_idle().await;
                if !terminated.is_empty() {
                    tracing::info!(count = terminated.len(), "idle sweep terminated sessions");
                }
            }
        })
    }
}
