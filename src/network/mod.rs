pub mod client;
pub mod socket;
pub mod transport;

pub use client::ApiClient;
pub use socket::{ChannelConnection, ChannelConnector, Frame, WebSocketConnector};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
