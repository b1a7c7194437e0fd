use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::common::{ChannelCommand, ChannelEvent, ConnectionState};
use crate::network::socket::{ChannelConnection, ChannelConnector, Frame, TypingFrame};
use crate::session::SessionContext;

enum Exit {
    /// The connection dropped; reconnect.
    Lost,
    /// Closed by the handle; stop for good.
    Closed,
}

/// Owns the room connection: connects, pumps frames both ways and
/// reconnects after a fixed delay until the handle closes it.
pub(crate) struct ChannelWorker {
    room_id: String,
    session: SessionContext,
    connector: Arc<dyn ChannelConnector>,
    reconnect_delay: Duration,
    command_receiver: mpsc::Receiver<ChannelCommand>,
    event_sender: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
}

impl ChannelWorker {
    pub(crate) fn new(
        room_id: String,
        session: SessionContext,
        connector: Arc<dyn ChannelConnector>,
        reconnect_delay: Duration,
        command_receiver: mpsc::Receiver<ChannelCommand>,
        event_sender: mpsc::UnboundedSender<ChannelEvent>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            room_id,
            session,
            connector,
            reconnect_delay,
            command_receiver,
            event_sender,
            state,
        }
    }

    pub(crate) async fn run(mut self) {
        log::info!("Chat worker for room {} started", self.room_id);
        let mut attempt = 0u32;

        loop {
            if !self.set_state(ConnectionState::Connecting) {
                break;
            }

            let Some(connected) = self.connect().await else {
                break;
            };
            if let Some(mut connection) = connected {
                attempt = 0;
                if !self.set_state(ConnectionState::Connected) {
                    connection.close().await;
                    break;
                }
                match self.pump(connection.as_mut()).await {
                    Exit::Closed => {
                        connection.close().await;
                        break;
                    }
                    Exit::Lost => log::warn!("Lost connection to room {}", self.room_id),
                }
            }

            if !self.set_state(ConnectionState::Disconnected) {
                break;
            }
            attempt += 1;
            let scheduled = ChannelEvent::ReconnectScheduled {
                attempt,
                delay: self.reconnect_delay,
            };
            if !self.emit(scheduled) || !self.wait_for_retry().await {
                break;
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        log::info!("Chat worker for room {} stopped", self.room_id);
    }

    /// Outer `None`: closed while connecting. Inner `None`: connect failed.
    async fn connect(&mut self) -> Option<Option<Box<dyn ChannelConnection>>> {
        let token = match self.session.access_token() {
            Ok(token) => token,
            Err(err) => {
                log::warn!("Could not read access token for chat: {err}");
                None
            }
        };
        let connector = self.connector.clone();
        let connecting = connector.connect(&self.room_id, token.as_deref());
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    return Some(match result {
                        Ok(connection) => Some(connection),
                        Err(err) => {
                            log::warn!("Could not connect to room {}: {err}", self.room_id);
                            None
                        }
                    });
                }
                command = self.command_receiver.recv() => {
                    if !handle_offline(command) {
                        return None;
                    }
                }
            }
        }
    }

    async fn pump(&mut self, connection: &mut dyn ChannelConnection) -> Exit {
        loop {
            tokio::select! {
                command = self.command_receiver.recv() => match command {
                    Some(ChannelCommand::SendMessage { message, ack }) => {
                        let written = match connection.send(&Frame::Message(message)).await {
                            Ok(()) => true,
                            Err(err) => {
                                log::warn!("Failed to write chat message: {err}");
                                false
                            }
                        };
                        let _ = ack.send(written);
                        if !written {
                            return Exit::Lost;
                        }
                    }
                    Some(ChannelCommand::SetTyping(is_typing)) => {
                        let frame = Frame::Typing(TypingFrame {
                            user_id: String::new(),
                            is_typing,
                        });
                        if let Err(err) = connection.send(&frame).await {
                            log::warn!("Failed to write typing frame: {err}");
                            return Exit::Lost;
                        }
                    }
                    Some(ChannelCommand::Close) | None => return Exit::Closed,
                },
                frame = connection.recv() => match frame {
                    Some(Ok(frame)) => {
                        if !self.dispatch(frame) {
                            return Exit::Closed;
                        }
                    }
                    Some(Err(err)) => {
                        log::warn!("Chat socket error: {err}");
                        return Exit::Lost;
                    }
                    None => {
                        log::info!("Room {} closed by the server", self.room_id);
                        return Exit::Lost;
                    }
                }
            }
        }
    }

    fn dispatch(&self, frame: Frame) -> bool {
        let event = match frame {
            Frame::Message(mut message) => {
                if message.room.is_empty() {
                    message.room = self.room_id.clone();
                }
                ChannelEvent::MessageReceived(message)
            }
            Frame::Typing(typing) => ChannelEvent::Typing {
                user_id: typing.user_id,
                is_typing: typing.is_typing,
            },
            Frame::Notification(notification) => ChannelEvent::Notification(notification),
        };
        self.emit(event)
    }

    async fn wait_for_retry(&mut self) -> bool {
        let delay = tokio::time::sleep(self.reconnect_delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return true,
                command = self.command_receiver.recv() => {
                    if !handle_offline(command) {
                        return false;
                    }
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) -> bool {
        self.state.send_replace(state);
        self.emit(ChannelEvent::StateChanged(state))
    }

    /// Never waits on the handle, so commands keep flowing while events
    /// pile up undrained. `false` once the handle stopped listening.
    fn emit(&self, event: ChannelEvent) -> bool {
        self.event_sender.send(event).is_ok()
    }
}

/// Answers a command received while no connection is up. Returns `false`
/// when the channel should stop.
fn handle_offline(command: Option<ChannelCommand>) -> bool {
    match command {
        Some(ChannelCommand::SendMessage { ack, .. }) => {
            let _ = ack.send(false);
            true
        }
        Some(ChannelCommand::SetTyping(_)) => true,
        Some(ChannelCommand::Close) | None => false,
    }
}
