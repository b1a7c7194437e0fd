pub mod commands;
pub mod events;
pub mod types;

pub use commands::ChannelCommand;
pub use events::{ChannelEvent, ConnectionState};
pub use types::{
    AuthTokens, ChatMessage, ChatRoom, Delivery, Notification, Page, Role, UnreadCounts, User,
};
