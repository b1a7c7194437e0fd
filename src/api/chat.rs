use serde::{Deserialize, Serialize};

use crate::common::{ChatMessage, ChatRoom, Page};
use crate::error::Result;
use crate::network::ApiClient;
use crate::network::transport::ApiRequest;

#[derive(Serialize)]
struct SendBody<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
}

#[derive(Deserialize)]
pub(crate) struct CountReply {
    #[serde(default, alias = "unread_count")]
    pub(crate) count: u64,
}

/// Request/response side of chat.
pub struct ChatApi<'a> {
    client: &'a ApiClient,
}

impl<'a> ChatApi<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    pub async fn rooms(&self) -> Result<Page<ChatRoom>> {
        self.client.fetch(ApiRequest::get("/chat/rooms/")).await
    }

    /// Most recent `page_size` messages of `room_id`, in server order.
    pub async fn messages(&self, room_id: &str, page_size: u32) -> Result<Page<ChatMessage>> {
        let request = ApiRequest::get(format!("/chat/rooms/{room_id}/messages/"))
            .query("page_size", page_size);
        let mut page: Page<ChatMessage> = self.client.fetch(request).await?;
        for message in &mut page.results {
            if message.room.is_empty() {
                message.room = room_id.to_string();
            }
        }
        Ok(page)
    }

    pub async fn send_message(
        &self,
        room_id: &str,
        body: &str,
        client_id: Option<&str>,
    ) -> Result<ChatMessage> {
        let request = ApiRequest::post(format!("/chat/rooms/{room_id}/messages/send/"))
            .json(&SendBody {
                content: body,
                client_id,
            })?;
        let mut message: ChatMessage = self.client.fetch(request).await?;
        if message.room.is_empty() {
            message.room = room_id.to_string();
        }
        if message.client_id.is_none() {
            message.client_id = client_id.map(str::to_string);
        }
        Ok(message)
    }

    pub async fn mark_read(&self, room_id: &str) -> Result<()> {
        self.client
            .execute(ApiRequest::post(format!("/chat/rooms/{room_id}/mark-read/")))
            .await
    }

    pub async fn unread_count(&self) -> Result<u64> {
        let reply: CountReply = self
            .client
            .fetch(ApiRequest::get("/chat/unread-count/"))
            .await?;
        Ok(reply.count)
    }
}
