use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::common::types::id_as_string;
use crate::common::{ChatMessage, Notification};
use crate::error::{ClientError, Result};

/// Typing indicator as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingFrame {
    #[serde(
        default,
        deserialize_with = "id_as_string",
        skip_serializing_if = "String::is_empty"
    )]
    pub user_id: String,
    pub is_typing: bool,
}

/// JSON text frame exchanged over a room connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Frame {
    Message(ChatMessage),
    Typing(TypingFrame),
    Notification(Notification),
}

/// A live, room-scoped bidirectional connection.
#[async_trait]
pub trait ChannelConnection: Send {
    async fn send(&mut self, frame: &Frame) -> Result<()>;

    /// Next inbound frame; `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Option<Result<Frame>>;

    async fn close(&mut self);
}

/// Opens room connections.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(
        &self,
        room_id: &str,
        token: Option<&str>,
    ) -> Result<Box<dyn ChannelConnection>>;
}

/// WebSocket connector: `<ws_base>/chat/<room>/?token=<access>`.
pub struct WebSocketConnector {
    ws_base_url: String,
}

impl WebSocketConnector {
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn room_url(&self, room_id: &str, token: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/chat/{}/", self.ws_base_url, room_id))
            .map_err(|err| ClientError::Config(format!("invalid websocket url: {err}")))?;
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(
        &self,
        room_id: &str,
        token: Option<&str>,
    ) -> Result<Box<dyn ChannelConnection>> {
        let url = self.room_url(room_id, token)?;
        log::debug!("Connecting to {}{}", url.origin().ascii_serialization(), url.path());

        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ClientError::Socket(err.to_string()))?;
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ChannelConnection for WebSocketConnection {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|err| ClientError::Socket(err.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => return Some(Ok(frame)),
                    Err(err) => {
                        log::debug!("Ignoring unrecognised frame ({err}): {text}");
                    }
                },
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(ClientError::Socket(err.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            log::debug!("Error while closing chat socket: {err}");
        }
    }
}
