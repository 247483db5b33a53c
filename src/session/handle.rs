//! Cloneable handle to a running session actor.

use crate::error::{ParleyError, Result};
use crate::ingest::AudioInput;
use crate::session::actor::{SessionCommand, Submission};
use crate::session::state::{
    InputSource, SessionId, SessionSettings, SessionSnapshot, SettingsUpdate,
};
use tokio::sync::{mpsc, oneshot};

/// Message sender for one session. Never touches session state directly.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, commands: mpsc::Sender<SessionCommand>) -> Self {
        Self { id, commands }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The actor has exited.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Submits typed user text.
    pub async fn submit_text(&self, text: &str) -> Result<Submission> {
        self.submit(text, InputSource::Text).await
    }

    pub async fn submit(&self, text: &str, source: InputSource) -> Result<Submission> {
        let text = text.to_string();
        self.request(|reply| SessionCommand::SubmitText {
            text,
            source,
            reply,
        })
        .await
    }

    /// Applies a settings change to subsequent turns.
    pub async fn configure(&self, update: SettingsUpdate) -> Result<SessionSettings> {
        self.request(|reply| SessionCommand::Configure { update, reply })
            .await?
    }

    /// Opens a new audio input for one utterance.
    pub async fn open_audio_input(&self) -> Result<AudioInput> {
        self.request(|reply| SessionCommand::OpenAudioInput { reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// Closes the session and waits for the actor to acknowledge.
    pub async fn close(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Close { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| self.not_found())?;
        reply_rx.await.map_err(|_| self.not_found())
    }

    fn not_found(&self) -> ParleyError {
        ParleyError::session_not_found(&self.id)
    }
}
