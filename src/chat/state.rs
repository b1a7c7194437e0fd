use std::collections::BTreeSet;

use crate::common::{ChannelEvent, ChatMessage, ConnectionState, Delivery};

/// Local view of one open room: what the chat screen renders.
#[derive(Debug, Clone)]
pub struct RoomState {
    room_id: String,
    connection: ConnectionState,
    messages: Vec<ChatMessage>,
    typing_users: BTreeSet<String>,
}

impl RoomState {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            connection: ConnectionState::Disconnected,
            messages: Vec::new(),
            typing_users: BTreeSet::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn typing_users(&self) -> &BTreeSet<String> {
        &self.typing_users
    }

    /// Replaces the log with `history`, keeping local echoes it does not
    /// already contain.
    pub fn load_history(&mut self, history: Vec<ChatMessage>) {
        let pending: Vec<ChatMessage> = self
            .messages
            .drain(..)
            .filter(|local| {
                local.client_id.is_some()
                    && !history.iter().any(|m| {
                        (m.client_id.is_some() && m.client_id == local.client_id)
                            || (!local.id.is_empty() && m.id == local.id)
                    })
            })
            .collect();
        self.messages = history;
        self.messages.extend(pending);
    }

    /// Appends an optimistic echo of a message this client is sending.
    pub fn push_local(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Appends a message received over the socket, folding it into the
    /// matching local echo when it carries a known `client_id`.
    pub fn apply_inbound(&mut self, message: ChatMessage) {
        if let Some(client_id) = message.client_id.clone() {
            if self.reconcile(&client_id, message.clone()) {
                return;
            }
        }
        if !message.id.is_empty() && self.messages.iter().any(|m| m.id == message.id) {
            log::debug!("Dropping duplicate message {}", message.id);
            return;
        }
        self.messages.push(message);
    }

    /// Replaces the echo tagged `client_id` with the server's copy.
    /// Returns `false` when no such echo exists.
    pub fn reconcile(&mut self, client_id: &str, mut confirmed: ChatMessage) -> bool {
        let Some(slot) = self.find_local(client_id) else {
            return false;
        };
        confirmed.client_id = Some(client_id.to_string());
        confirmed.delivery = Delivery::Sent;
        if confirmed.room.is_empty() {
            confirmed.room = slot.room.clone();
        }
        *slot = confirmed;
        true
    }

    pub fn mark_sent(&mut self, client_id: &str) {
        if let Some(slot) = self.find_local(client_id) {
            if slot.delivery == Delivery::Pending {
                slot.delivery = Delivery::Sent;
            }
        }
    }

    pub fn mark_failed(&mut self, client_id: &str) {
        if let Some(slot) = self.find_local(client_id) {
            slot.delivery = Delivery::Failed;
        }
    }

    /// The local copy of the message tagged `client_id`.
    pub fn local(&self, client_id: &str) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .find(|m| m.client_id.as_deref() == Some(client_id))
    }

    pub fn set_typing(&mut self, user_id: &str, is_typing: bool) {
        if is_typing {
            self.typing_users.insert(user_id.to_string());
        } else {
            self.typing_users.remove(user_id);
        }
    }

    pub fn apply(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::History(history) => self.load_history(history.clone()),
            ChannelEvent::MessageReceived(message) => self.apply_inbound(message.clone()),
            ChannelEvent::Typing { user_id, is_typing } => self.set_typing(user_id, *is_typing),
            ChannelEvent::StateChanged(state) => {
                self.connection = *state;
                if *state != ConnectionState::Connected {
                    self.typing_users.clear();
                }
            }
            ChannelEvent::Notification(_) | ChannelEvent::ReconnectScheduled { .. } => {}
        }
    }

    fn find_local(&mut self, client_id: &str) -> Option<&mut ChatMessage> {
        self.messages
            .iter_mut()
            .find(|m| m.client_id.as_deref() == Some(client_id))
    }
}
