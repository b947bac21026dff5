use std::path::PathBuf;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<WsError>,
    },

    #[error("websocket transport failed: {0}")]
    Transport(#[source] Box<WsError>),

    #[error("connection closed abnormally: {reason}")]
    ConnectionLost { reason: String },

    #[error("failed to encode client message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("session is closed")]
    Closed,
}

impl From<WsError> for SessionError {
    fn from(err: WsError) -> Self {
        Self::Transport(Box::new(err))
    }
}

#[derive(Debug, Error)]
pub enum WorkbenchError {
    #[error("received content for `{path}`, which has no streaming buffer")]
    UnknownBuffer { path: String },

    #[error("refusing to write `{path}` outside the output directory")]
    UnsafePath { path: String },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
