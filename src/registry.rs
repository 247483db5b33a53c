//! Session registry: identifier to handle lookup.
//!
//! The map is the only shared mutable structure in the engine. The registry
//! holds handles and not-yet-attached output receivers; it never reaches into
//! a session's state.

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{ParleyError, Result};
use crate::pipeline::OutboundPacket;
use crate::provider::Providers;
use crate::session::{
    Services, SessionActor, SessionHandle, SessionId, SessionSettings, SettingsUpdate, Submission,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

struct Entry {
    handle: SessionHandle,
    output: Option<mpsc::Receiver<OutboundPacket>>,
}

pub struct SessionRegistry {
    services: Arc<Services>,
    sessions: Mutex<HashMap<SessionId, Entry>>,
}

impl SessionRegistry {
    pub fn new(config: Config, catalog: Catalog, providers: Providers) -> Self {
        Self::with_services(Arc::new(Services::new(config, catalog, providers)))
    }

    /// Builds a registry whose catalog comes from `config.catalog.dir`, or an
    /// empty catalog when no directory is set.
    pub fn from_config(config: Config, providers: Providers) -> Result<Self> {
        let catalog = match &config.catalog.dir {
            Some(dir) => Catalog::load_dir(dir)?,
            None => Catalog::default(),
        };
        debug!(
            characters = catalog.characters.len(),
            scripts = catalog.scripts.len(),
            "catalog loaded"
        );
        Ok(Self::new(config, catalog, providers))
    }

    pub fn with_services(services: Arc<Services>) -> Self {
        Self {
            services,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.services.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.services.catalog
    }

    /// Creates a session from the configured defaults plus `update`.
    ///
    /// The outbound receiver is parked until [`attach_output`] takes it. Until
    /// then the session can queue at most `outbound_capacity` packets before
    /// its turns wait on the reader.
    ///
    /// [`attach_output`]: SessionRegistry::attach_output
    pub async fn create(&self, update: Option<SettingsUpdate>) -> Result<SessionId> {
        self.spawn_session(update, true).await
    }

    /// Creates a session whose outbound packets are discarded. Used for
    /// sessions driven over the control socket, which carries no audio.
    pub async fn create_detached(&self, update: Option<SettingsUpdate>) -> Result<SessionId> {
        self.spawn_session(update, false).await
    }

    async fn spawn_session(
        &self,
        update: Option<SettingsUpdate>,
        keep_output: bool,
    ) -> Result<SessionId> {
        let mut settings = SessionSettings::from_config(&self.services.config.session);
        if let Some(update) = update {
            update.validate(&self.services.catalog)?;
            settings.apply(&update);
        }

        let id = SessionId::generate();
        let (handle, output, _task) =
            SessionActor::spawn(id.clone(), self.services.clone(), settings);
        let output = keep_output.then_some(output);
        self.sessions
            .lock()
            .await
            .insert(id.clone(), Entry { handle, output });
        info!(session = %id, detached = !keep_output, "session created");
        Ok(id)
    }

    /// Looks up a live session. Entries whose actor exited are dropped.
    pub async fn get(&self, id: &SessionId) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock().await;
        let Some(entry) = sessions.get(id) else {
            return Err(ParleyError::session_not_found(id));
        };
        if !entry.handle.is_closed() {
            return Ok(entry.handle.clone());
        }
        sessions.remove(id);
        debug!(session = %id, "removed exited session");
        Err(ParleyError::session_not_found(id))
    }

    /// Takes the outbound packet receiver. Only the first caller gets it, and
    /// detached sessions never have one.
    pub async fn attach_output(&self, id: &SessionId) -> Result<mpsc::Receiver<OutboundPacket>> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .get_mut(id)
            .filter(|entry| !entry.handle.is_closed())
            .ok_or_else(|| ParleyError::session_not_found(id))?;
        entry
            .output
            .take()
            .ok_or_else(|| ParleyError::OutputAlreadyAttached { id: id.to_string() })
    }

    /// Closes the session and removes it. A second call reports not found.
    pub async fn destroy(&self, id: &SessionId) -> Result<()> {
        let entry = self
            .sessions
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| ParleyError::session_not_found(id))?;
        // The actor may already have exited on idle timeout.
        if let Err(e) = entry.handle.close().await {
            debug!(session = %id, error = %e, "session already stopped");
        }
        info!(session = %id, "session destroyed");
        Ok(())
    }

    pub async fn submit_text(&self, id: &SessionId, text: &str) -> Result<Submission> {
        self.get(id).await?.submit_text(text).await
    }

    pub async fn configure(&self, id: &SessionId, update: SettingsUpdate) -> Result<SessionSettings> {
        self.get(id).await?.configure(update).await
    }

    /// Drops entries whose actor has exited. Returns how many were removed.
    pub async fn reap_closed(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.handle.is_closed());
        let reaped = before - sessions.len();
        if reaped > 0 {
            debug!(reaped, "reaped closed sessions");
        }
        reaped
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Closes every session.
    pub async fn shutdown(&self) {
        let entries: Vec<(SessionId, Entry)> = self.sessions.lock().await.drain().collect();
        for (id, entry) in entries {
            if let Err(e) = entry.handle.close().await {
                debug!(session = %id, error = %e, "session already stopped");
            }
        }
    }
}
