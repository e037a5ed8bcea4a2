//! Voice-facing surface of the Templine relay.
//!
//! - **assistant**: turns a caller utterance into a spoken reply
//! - **session**: per-connection caller identity
//! - **relay**: conversation relay WebSocket
//! - **server**: axum router, health endpoint and server lifecycle
//! - **shutdown**: Ctrl+C / SIGTERM handling

pub mod assistant;
pub mod relay;
pub mod server;
pub mod session;
pub mod shutdown;

pub use assistant::{Assistant, AssistantError, Intent};
pub use relay::{RelaySession, APOLOGY, RELAY_PATH};
pub use server::{build_router, serve, AppState};
pub use session::{SessionContext, SessionRegistry};
pub use shutdown::shutdown_signal;
