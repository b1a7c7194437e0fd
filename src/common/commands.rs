use tokio::sync::oneshot;

use super::types::ChatMessage;

/// Commands sent from a channel handle to its worker task.
#[derive(Debug)]
pub enum ChannelCommand {
    /// Write a message over the live connection. The worker answers `true`
    /// when the frame was written, `false` when the connection is down.
    SendMessage {
        message: ChatMessage,
        ack: oneshot::Sender<bool>,
    },
    SetTyping(bool),
    /// Tear the channel down; no reconnect is attempted afterwards.
    Close,
}
