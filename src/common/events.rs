use std::time::Duration;

use super::types::{ChatMessage, Notification};

/// Connection state of a realtime chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by a chat channel, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Message history fetched when the channel was opened; always first.
    History(Vec<ChatMessage>),
    MessageReceived(ChatMessage),
    Typing { user_id: String, is_typing: bool },
    Notification(Notification),
    StateChanged(ConnectionState),
    /// A reconnect attempt will be made after `delay`.
    ReconnectScheduled { attempt: u32, delay: Duration },
}
