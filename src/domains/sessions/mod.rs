pub mod client;
pub mod events;
pub mod orchestrator;
pub mod server;
pub mod stream;

pub use client::{AgentClient, EventSubscription, ProviderInfo, ProviderList};
pub use events::AgentEvent;
pub use orchestrator::{Session, SessionOrchestrator};
pub use server::AgentServer;
pub use stream::SessionStream;
