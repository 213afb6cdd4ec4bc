use serde::{Deserialize, Serialize};

use crate::errors::ChannelErrorKind;
use crate::models::ChatMessage;

/// Events sent over the WebSocket channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Recent transcript, oldest first. Sent once, to the joining connection only.
    History(Vec<String>),

    /// A message accepted into the log
    Message(ChatMessage),

    /// Another user opened a channel
    Joined(String),

    /// A user closed their channel
    Left(String),

    /// The handshake carried no valid session; the channel is closed after this.
    NoSession,

    /// A message from this connection was not accepted
    Error { error: ChannelErrorKind },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    Message(String),
}
