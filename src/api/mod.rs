//! Typed wrappers over the REST endpoints the client flows use.

pub mod auth;
pub mod chat;
pub mod notifications;
pub mod payments;
pub mod users;

pub use auth::{AuthApi, Credentials, FederatedIdentity, OtpChallenge, ProfileFields, Registration};
pub use chat::ChatApi;
pub use notifications::NotificationsApi;
pub use payments::{PaymentInitiation, PaymentOutcome, PaymentRequest, PaymentResult, PaymentsApi};
pub use users::{ProfilePatch, UsersApi};

use crate::network::ApiClient;

impl ApiClient {
    pub fn auth(&self) -> AuthApi<'_> {
        AuthApi::new(self)
    }

    pub fn users(&self) -> UsersApi<'_> {
        UsersApi::new(self)
    }

    pub fn chat(&self) -> ChatApi<'_> {
        ChatApi::new(self)
    }

    pub fn notifications(&self) -> NotificationsApi<'_> {
        NotificationsApi::new(self)
    }

    pub fn payments(&self) -> PaymentsApi<'_> {
        PaymentsApi::new(self)
    }
}
