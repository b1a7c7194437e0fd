use serde::Serialize;

use crate::common::User;
use crate::error::Result;
use crate::network::ApiClient;
use crate::network::transport::ApiRequest;

const PROFILE_PATH: &str = "/users/profile/";

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

pub struct UsersApi<'a> {
    client: &'a ApiClient,
}

impl<'a> UsersApi<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    /// Fetches the signed-in profile and refreshes the cached copy.
    pub async fn profile(&self) -> Result<User> {
        let user: User = self.client.fetch(ApiRequest::get(PROFILE_PATH)).await?;
        self.client.session().set_user(&user)?;
        Ok(user)
    }

    pub async fn update_profile(&self, patch: &ProfilePatch) -> Result<User> {
        let request = ApiRequest::patch(PROFILE_PATH).json(patch)?;
        let user: User = self.client.fetch(request).await?;
        self.client.session().set_user(&user)?;
        Ok(user)
    }
}
