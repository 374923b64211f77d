//! Client core — connection setup and the session state machine.

pub mod commands;
pub mod session;
pub mod ui;

pub use session::Session;
pub use ui::{terminal, UiEvent, UiHandle, UiInput};

use crate::codec::CodecError;

/// Client configuration. Defaults are the deployment contract.
#[derive(Debug, Clone)]
pub struct Config {
    /// The server's control-connection address.
    pub server_addr: String,
    /// Local address for the inbound data connection.
    pub data_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: "localhost:7777".into(),
            data_addr: "localhost:7778".into(),
        }
    }
}

/// Terminal conditions of a client session.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// EOF from the server on either connection.
    #[error("server closed the connection")]
    Disconnected,
    /// The server refused admission.
    #[error("server refused the connection: {0}")]
    Refused(String),
    /// The interface channels closed under the session.
    #[error("user interface closed")]
    UiClosed,
    /// A frame that does not fit the state machine's expectation.
    #[error("out of sync with server: {0}")]
    OutOfSync(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
