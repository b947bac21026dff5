//! Session/transport adapter: delivers streamed agent responses from the
//! websocket to the classifier and hands classified events to consumers.

mod auth;
mod config;
mod connection;
mod error;
mod router;
mod session;
mod workbench;

pub use auth::AuthProvider;
pub use auth::StaticToken;
pub use config::API_TOKEN_ENV;
pub use config::CONFIG_FILE_NAME;
pub use config::ConfigError;
pub use config::SessionConfig;
pub use config::api_token_from_env;
pub use connection::SessionConnection;
pub use connection::websocket_url;
pub use error::SessionError;
pub use error::WorkbenchError;
pub use router::ResponseRouter;
pub use router::SessionEvent;
pub use session::ChatSession;
pub use session::SessionHandle;
pub use workbench::BufferStatus;
pub use workbench::EditorBuffer;
pub use workbench::MessageStatus;
pub use workbench::Role;
pub use workbench::TranscriptMessage;
pub use workbench::Workbench;
pub use workbench::WriteReport;
