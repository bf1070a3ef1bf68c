use serde::{Deserialize, Serialize};
use shared::domain::{Message, ReadReceipt};

pub mod config;
pub mod connect;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod listen;
pub mod presence;
pub mod pull_form;
pub mod reload;
pub mod session;
pub mod signer;
pub mod transport;

pub use config::{ChatEndpoints, ListenSettings};
pub use credentials::{Cookie, CredentialStore, MemoryCredentialStore};
pub use error::{ChatError, ErrorKind, ListenError};
pub use listen::{ListenLoop, ListenerHandle, PollOutcome};
pub use pull_form::{ChannelState, Identity, StickyRoute};
pub use session::ChatSession;
pub use signer::{FormMetaSigner, RequestSigner};

/// Why a listener stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The backend reported the session as logged out.
    LoggedOut,
    /// Stopped through `ListenerHandle::close`.
    Closed,
    /// The listener task went away without reporting, e.g. a runtime shutdown.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message(Message),
    ReadReceipt(ReadReceipt),
    /// A recoverable failure; the listener keeps going.
    Error(ListenError),
    /// Sent exactly once, after the last poll.
    Terminated(TerminationReason),
}

#[cfg(test)]
#[path = "tests/mock_backend.rs"]
mod mock_backend;
