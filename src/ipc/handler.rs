//! Control handler backed by the session registry.

use crate::ipc::protocol::{ControlRequest, ControlResponse};
use crate::ipc::server::ControlHandler;
use crate::registry::SessionRegistry;
use crate::session::Submission;
use std::sync::Arc;
use tracing::debug;

pub struct RegistryHandler {
    registry: Arc<SessionRegistry>,
}

impl RegistryHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

#[async_trait::async_trait]
impl ControlHandler for RegistryHandler {
    async fn handle(&self, request: ControlRequest) -> ControlResponse {
        debug!(?request, "control request");
        let result = match request {
            ControlRequest::CreateSession { settings } => self
                .registry
                .create_detached(settings)
                .await
                .map(|session_id| ControlResponse::Created { session_id }),
            ControlRequest::CloseSession { session_id } => self
                .registry
                .destroy(&session_id)
                .await
                .map(|()| ControlResponse::Ok),
            ControlRequest::SubmitText { session_id, text } => self
                .registry
                .submit_text(&session_id, &text)
                .await
                .map(|submission| match submission {
                    Submission::Accepted { epoch } => ControlResponse::Accepted { epoch },
                    Submission::Ignored => ControlResponse::Ignored,
                }),
            ControlRequest::Configure { session_id, update } => self
                .registry
                .configure(&session_id, update)
                .await
                .map(|_| ControlResponse::Ok),
            ControlRequest::Catalog => {
                let catalog = self.registry.catalog();
                Ok(ControlResponse::Catalog {
                    characters: catalog.characters.keys().cloned().collect(),
                    scripts: catalog.scripts.keys().cloned().collect(),
                })
            }
            ControlRequest::Ping => Ok(ControlResponse::Pong),
        };
        result.unwrap_or_else(ControlResponse::error)
    }
}
