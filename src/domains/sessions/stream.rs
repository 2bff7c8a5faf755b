use super::client::EventSubscription;
use super::events::{self, AgentEvent};
use crate::errors::HostError;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Events for one prompt within one session, as the consumer sees them:
/// foreign-session events are filtered out, `session.idle` ends the stream,
/// `session.error` and prompt-submission failures end it with an error. An
/// attached cleanup runs exactly once on any termination path, including
/// the consumer dropping the stream mid-answer.
pub struct SessionStream {
    rx: mpsc::Receiver<Result<AgentEvent, HostError>>,
    worker: JoinHandle<()>,
    cleanup: Option<Cleanup>,
}

impl std::fmt::Debug for SessionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStream").finish_non_exhaustive()
    }
}

impl SessionStream {
    /// Next event, or `None` once the stream has terminated. A delivered
    /// error is terminal.
    pub async fn next(&mut self) -> Option<Result<AgentEvent, HostError>> {
        match self.rx.recv().await {
            Some(item) => Some(item),
            None => {
                self.run_cleanup();
                None
            }
        }
    }

    /// Drain the stream and assemble the answer: the concatenated latest
    /// text of every text part, in first-seen order.
    pub async fn into_answer(mut self) -> Result<String, HostError> {
        let mut order: Vec<String> = Vec::new();
        let mut parts: HashMap<String, String> = HashMap::new();
        let mut anonymous = 0usize;

        while let Some(item) = self.next().await {
            let event = item?;
            if event.kind != events::MESSAGE_PART_UPDATED {
                continue;
            }
            let Some(text) = event.part_text() else {
                continue;
            };
            let id = match event.part_id() {
                Some(id) => id.to_string(),
                None => {
                    anonymous += 1;
                    format!("anonymous-{anonymous}")
                }
            };
            if !parts.contains_key(&id) {
                order.push(id.clone());
            }
            parts.insert(id, text.to_string());
        }

        Ok(order
            .iter()
            .filter_map(|id| parts.get(id).map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn run_cleanup(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.worker.abort();
        self.run_cleanup();
    }
}

/// Wire a subscription and a concurrent prompt submission into a
/// `SessionStream`. The submission has not started when this is called; the
/// worker drives it alongside event forwarding so that the first terminal
/// outcome (submission failure, `session.idle`, `session.error`, or the
/// subscription closing) settles the stream, and a submission error is never
/// lost while the stream is silent.
pub fn spawn_session_stream<F>(
    session_id: String,
    mut subscription: EventSubscription,
    submit: F,
    cleanup: Option<Cleanup>,
) -> SessionStream
where
    F: Future<Output = Result<(), HostError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(256);

    let worker = tokio::spawn(async move {
        let mut submit = std::pin::pin!(submit);
        let mut submit_pending = true;

        loop {
            tokio::select! {
                result = &mut submit, if submit_pending => {
                    submit_pending = false;
                    if let Err(err) = result {
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }
                event = subscription.events.recv() => {
                    let Some(event) = event else {
                        let _ = tx
                            .send(Err(HostError::AgentError {
                                name: "stream.closed".to_string(),
                                message: "event stream ended before the session went idle"
                                    .to_string(),
                            }))
                            .await;
                        break;
                    };

                    match event.session_id() {
                        Some(id) if id != session_id => continue,
                        _ => {}
                    }
                    let for_this_session = event.session_id() == Some(session_id.as_str());

                    if for_this_session && event.kind == events::SESSION_IDLE {
                        break;
                    }
                    if for_this_session && event.kind == events::SESSION_ERROR {
                        let _ = tx
                            .send(Err(HostError::AgentError {
                                name: event.error_name().unwrap_or("unknown").to_string(),
                                message: event
                                    .error_message()
                                    .unwrap_or("agent reported an error")
                                    .to_string(),
                            }))
                            .await;
                        break;
                    }

                    if tx.send(Ok(event)).await.is_err() {
                        // Consumer cancelled; nothing left to deliver to.
                        break;
                    }
                }
            }
        }
    });

    SessionStream {
        rx,
        worker,
        cleanup,
    }
}
