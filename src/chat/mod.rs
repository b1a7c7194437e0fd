//! Realtime chat: one channel per open room, fed by REST history and a
//! reconnecting socket worker.

mod state;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::{ChannelCommand, ChannelEvent, ChatMessage, ConnectionState, Delivery};
use crate::config::AppConfig;
use crate::error::{ClientError, Result};
use crate::network::ApiClient;
use crate::network::socket::ChannelConnector;
use crate::validation;

pub use state::RoomState;
use worker::ChannelWorker;

const COMMAND_BUFFER: usize = 32;
/// How long a socket write may take before the message goes over REST.
const SOCKET_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    pub reconnect_delay: Duration,
    pub history_page_size: u32,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            history_page_size: 50,
        }
    }
}

impl From<&AppConfig> for ChannelOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay(),
            history_page_size: config.history_page_size,
        }
    }
}

pub struct ChatChannel;

impl ChatChannel {
    /// Loads the room's recent history, then starts the socket worker.
    pub async fn open(
        room_id: impl Into<String>,
        api: ApiClient,
        connector: Arc<dyn ChannelConnector>,
        options: ChannelOptions,
    ) -> Result<ChannelHandle> {
        let room_id = room_id.into();
        if room_id.trim().is_empty() {
            return Err(ClientError::validation("room", "Room id is required"));
        }

        let history = api
            .chat()
            .messages(&room_id, options.history_page_size)
            .await?
            .results;
        log::info!("Loaded {} messages for room {room_id}", history.len());

        let (command_sender, command_receiver) = mpsc::channel(COMMAND_BUFFER);
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let (state_sender, connection) = watch::channel(ConnectionState::Disconnected);

        let worker = ChannelWorker::new(
            room_id.clone(),
            api.session().clone(),
            connector,
            options.reconnect_delay,
            command_receiver,
            event_sender,
            state_sender,
        );
        let worker = tokio::spawn(worker.run());

        Ok(ChannelHandle {
            room: RoomState::new(room_id),
            api,
            pending_history: Some(history),
            command_sender,
            event_receiver,
            connection,
            worker: Some(worker),
        })
    }
}

/// Owner of an open room. Dropping it stops the worker.
pub struct ChannelHandle {
    room: RoomState,
    api: ApiClient,
    pending_history: Option<Vec<ChatMessage>>,
    command_sender: mpsc::Sender<ChannelCommand>,
    event_receiver: mpsc::UnboundedReceiver<ChannelEvent>,
    connection: watch::Receiver<ConnectionState>,
    worker: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    pub fn room_id(&self) -> &str {
        self.room.room_id()
    }

    pub fn state(&self) -> &RoomState {
        &self.room
    }

    /// Live connection state as tracked by the worker.
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Next channel event, already applied to [`state`](Self::state).
    /// History always comes first. `None` once the worker has stopped.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        let event = match self.pending_history.take() {
            Some(history) => ChannelEvent::History(history),
            None => self.event_receiver.recv().await?,
        };
        self.room.apply(&event);
        Some(event)
    }

    /// Appends an optimistic echo and delivers it over the socket, or over
    /// REST when the socket is down. Delivery problems only show up as the
    /// echo's `delivery`; the returned copy reflects the outcome.
    pub async fn send_message(&mut self, body: &str) -> Result<ChatMessage> {
        let body = validation::message_body(body)?;
        let client_id = Uuid::new_v4().to_string();
        let sender = match self.api.session().user() {
            Ok(user) => user.map(|u| u.id).unwrap_or_default(),
            Err(err) => {
                log::debug!("Cached user unavailable: {err}");
                String::new()
            }
        };

        let echo = ChatMessage {
            id: String::new(),
            room: self.room.room_id().to_string(),
            sender,
            body: body.clone(),
            created_at: Utc::now(),
            client_id: Some(client_id.clone()),
            delivery: Delivery::Pending,
        };
        self.room.push_local(echo.clone());

        if self.connection_state() == ConnectionState::Connected
            && self.write_to_socket(echo.clone()).await
        {
            self.room.mark_sent(&client_id);
        } else {
            let room_id = self.room.room_id().to_string();
            match self
                .api
                .chat()
                .send_message(&room_id, &body, Some(&client_id))
                .await
            {
                Ok(confirmed) => {
                    self.room.reconcile(&client_id, confirmed);
                }
                Err(err) => {
                    log::warn!("Could not send message to room {room_id}: {err}");
                    self.room.mark_failed(&client_id);
                }
            }
        }

        Ok(self.room.local(&client_id).cloned().unwrap_or(echo))
    }

    async fn write_to_socket(&self, message: ChatMessage) -> bool {
        let (ack, written) = oneshot::channel();
        let command = ChannelCommand::SendMessage { message, ack };
        let delivery = async {
            self.command_sender.send(command).await.ok()?;
            written.await.ok()
        };
        match tokio::time::timeout(SOCKET_WRITE_TIMEOUT, delivery).await {
            Ok(written) => written.unwrap_or(false),
            Err(_) => {
                log::warn!("Socket write to room {} timed out", self.room.room_id());
                false
            }
        }
    }

    /// Best effort; ignored while disconnected.
    pub async fn set_typing(&self, is_typing: bool) {
        if self.connection_state() != ConnectionState::Connected {
            return;
        }
        if self
            .command_sender
            .send(ChannelCommand::SetTyping(is_typing))
            .await
            .is_err()
        {
            log::debug!("Typing update dropped: channel worker gone");
        }
    }

    pub async fn mark_read(&self) -> Result<()> {
        self.api.chat().mark_read(self.room.room_id()).await
    }

    /// Stops the worker and closes the socket. No event is delivered and
    /// no reconnect is attempted afterwards.
    pub async fn close(mut self) {
        self.event_receiver.close();
        let _ = self.command_sender.send(ChannelCommand::Close).await;
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                log::warn!("Chat worker ended abnormally: {err}");
            }
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
