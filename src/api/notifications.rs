use crate::common::{Notification, Page};
use crate::error::Result;
use crate::network::ApiClient;
use crate::network::transport::ApiRequest;

use super::chat::CountReply;

pub struct NotificationsApi<'a> {
    client: &'a ApiClient,
}

impl<'a> NotificationsApi<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> Result<Page<Notification>> {
        self.client.fetch(ApiRequest::get("/notifications/")).await
    }

    pub async fn unread_count(&self) -> Result<u64> {
        let reply: CountReply = self
            .client
            .fetch(ApiRequest::get("/notifications/unread-count/"))
            .await?;
        Ok(reply.count)
    }

    pub async fn mark_read(&self, id: &str) -> Result<()> {
        self.client
            .execute(ApiRequest::post(format!("/notifications/{id}/mark-read/")))
            .await
    }

    pub async fn mark_all_read(&self) -> Result<()> {
        self.client
            .execute(ApiRequest::post("/notifications/mark-all-read/"))
            .await
    }
}
