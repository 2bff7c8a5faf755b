use super::client::AgentClient;
use super::server::{AgentServer, spawn_agent_server};
use super::stream::{SessionStream, spawn_session_stream};
use crate::config::AgentSettings;
use crate::domains::query;
use crate::domains::workspaces::{Workspace, WorkspaceEngine};
use crate::errors::HostError;
use std::sync::Arc;

/// One live agent backend bound to a workspace. Closing is idempotent and
/// the server handle also closes itself if the session is simply dropped.
#[derive(Debug)]
pub struct Session {
    pub session_id: String,
    pub workspace: Workspace,
    server: Arc<AgentServer>,
    client: AgentClient,
    provider: String,
    model: String,
}

impl Session {
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn is_closed(&self) -> bool {
        self.server.is_closed()
    }

    pub fn close(&self) {
        self.server.close();
    }
}

/// Runs agent backends against workspaces and exposes their event streams.
pub struct SessionOrchestrator {
    engine: Arc<WorkspaceEngine>,
    settings: AgentSettings,
}

impl SessionOrchestrator {
    pub fn new(engine: Arc<WorkspaceEngine>, settings: AgentSettings) -> Self {
        Self { engine, settings }
    }

    /// Materialise the workspace, boot a server against it, preflight the
    /// configured (provider, model) and create the agent session. Every
    /// failure past the boot closes the server before surfacing.
    pub async fn start_session(
        &self,
        repos: &[String],
        quiet: bool,
    ) -> Result<Session, HostError> {
        let workspace = self.engine.ensure_workspace(repos, quiet).await?;
        let server = Arc::new(spawn_agent_server(&workspace.path, &self.settings).await?);
        let client = AgentClient::new(server.base_url());

        if let Err(err) =
            validate_provider_model(&client, &self.settings.provider, &self.settings.model).await
        {
            server.close();
            return Err(err);
        }

        let session_id = match client.create_session().await {
            Ok(id) => id,
            Err(err) => {
                server.close();
                return Err(err);
            }
        };

        log::info!(
            "Session {session_id} ready for workspace '{}' on port {}",
            workspace.key,
            server.port()
        );

        Ok(Session {
            session_id,
            workspace,
            server,
            client,
            provider: self.settings.provider.clone(),
            model: self.settings.model.clone(),
        })
    }

    /// Issue one prompt within a thread session. The subscription is opened
    /// before the submission fires so no event can be missed; the server
    /// stays up for the next prompt.
    pub async fn prompt(
        &self,
        session: &Session,
        text: &str,
    ) -> Result<SessionStream, HostError> {
        let subscription = session.client.subscribe().await?;

        let client = session.client.clone();
        let session_id = session.session_id.clone();
        let provider = session.provider.clone();
        let model = session.model.clone();
        let text = text.to_string();
        let submit = async move { client.prompt(&session_id, &provider, &model, &text).await };

        Ok(spawn_session_stream(
            session.session_id.clone(),
            subscription,
            submit,
            None,
        ))
    }

    /// Single-shot question: session lifecycle `start → prompt → close on
    /// stream termination`. Mentions in the question extend the explicit
    /// repository list; resource notes are prepended as orientation context.
    pub async fn ask(
        &self,
        explicit: &[String],
        question: &str,
        quiet: bool,
    ) -> Result<SessionStream, HostError> {
        let parsed = query::parse(question);
        let set = query::merge([explicit.to_vec(), parsed.repos.clone()]);

        let session = self.start_session(&set, quiet).await?;
        let text = compose_prompt(&session.workspace, &parsed.prompt);

        let subscription = match session.client.subscribe().await {
            Ok(subscription) => subscription,
            Err(err) => {
                session.close();
                return Err(err);
            }
        };

        let client = session.client.clone();
        let session_id = session.session_id.clone();
        let provider = session.provider.clone();
        let model = session.model.clone();
        let submit = async move { client.prompt(&session_id, &provider, &model, &text).await };

        let server = session.server.clone();
        Ok(spawn_session_stream(
            session.session_id.clone(),
            subscription,
            submit,
            Some(Box::new(move || server.close())),
        ))
    }

    /// Safe to call more than once; the close is idempotent.
    pub fn end_session(&self, session: &Session) {
        session.close();
    }
}

/// Preflight the configured (provider, model) against the backend's
/// advertised capabilities. A failed listing call cannot disprove the
/// request, so it fails open; a successful listing that contradicts the
/// request fails closed with the specific mismatch.
async fn validate_provider_model(
    client: &AgentClient,
    provider: &str,
    model: &str,
) -> Result<(), HostError> {
    let listing = match client.list_providers().await {
        Ok(listing) => listing,
        Err(err) => {
            log::warn!("Provider listing unavailable; continuing without validation: {err}");
            return Ok(());
        }
    };

    let Some(info) = listing.all.iter().find(|p| p.id == provider) else {
        return Err(HostError::InvalidProvider {
            provider_id: provider.to_string(),
            available: listing.all.iter().map(|p| p.id.clone()).collect(),
        });
    };

    if !listing.connected.is_empty() && !listing.connected.iter().any(|id| id == provider) {
        return Err(HostError::ProviderNotConnected {
            provider_id: provider.to_string(),
            connected: listing.connected.clone(),
        });
    }

    if !info.models.is_empty() && !info.models.contains_key(model) {
        return Err(HostError::InvalidModel {
            provider_id: provider.to_string(),
            model_id: model.to_string(),
            available: info.model_ids(),
        });
    }

    Ok(())
}

fn compose_prompt(workspace: &Workspace, prompt: &str) -> String {
    let notes: Vec<String> = workspace
        .members
        .iter()
        .filter_map(|member| {
            member
                .notes
                .as_ref()
                .map(|notes| format!("- {}: {notes}", member.relative_path))
        })
        .collect();

    if notes.is_empty() {
        prompt.to_string()
    } else {
        format!("Repository notes:\n{}\n\n{}", notes.join("\n"), prompt)
    }
}
