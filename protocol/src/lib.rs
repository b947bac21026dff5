//! Messages exchanged with the agent service over the session websocket.
//!
//! Every frame is a JSON object with a `type` discriminator.

mod messages;

pub use messages::ClientMessage;
pub use messages::ServerMessage;
pub use messages::parse_server_message;
