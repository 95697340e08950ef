//! sage_agent — the protocol state machines
//!
//! Client:  `Fresh → Resolved → Encapsulated → SessionOpen → Closed`
//! Server:  listening; `handle_invite` establishes a session and emits
//!          a signed acknowledgement; `handle_message` decrypts,
//!          dispatches, and answers encrypted.
//!
//! Failure discipline: a failed or cancelled handshake leaves no
//! session in the store, no pending state anywhere. The server
//! registers a session only as the last step before answering; the
//! client registers only after verifying the acknowledgement.

pub mod client;
pub mod error;
pub mod server;

pub use client::{AgentClient, ClientConfig, ClientState};
pub use error::AgentError;
pub use server::{spawn_reaper, AgentServer, EchoHandler, MessageHandler, ServerConfig};
