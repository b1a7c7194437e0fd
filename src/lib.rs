//! Client core for the services marketplace: session handling with
//! transparent token refresh, typed REST calls, realtime room chat and
//! unread-badge polling.

pub mod api;
pub mod chat;
pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod poller;
pub mod session;
pub mod storage;
pub mod validation;

pub use chat::{ChannelHandle, ChannelOptions, ChatChannel, RoomState};
pub use error::{ClientError, Result};
pub use network::ApiClient;
pub use poller::UnreadPoller;
pub use session::SessionContext;
