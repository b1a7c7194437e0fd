use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;

use crate::api::auth::ResendCooldown;
use crate::error::{ClientError, Result};
use crate::session::{LogoutReason, SessionContext};

use super::transport::{ApiRequest, ApiResponse, HttpTransport};

/// REST client that attaches the session credential to every request and
/// recovers from an expired access token at most once per request.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    session: SessionContext,
    /// OTP resend countdowns by phone, shared between clones.
    otp_cooldowns: Arc<Mutex<HashMap<String, ResendCooldown>>>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn HttpTransport>, session: SessionContext) -> Self {
        Self {
            transport,
            session,
            otp_cooldowns: Arc::default(),
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Time left before another OTP may be sent to `phone`.
    pub(crate) fn otp_cooldown_remaining(&self, phone: &str) -> std::time::Duration {
        let mut cooldowns = self
            .otp_cooldowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        cooldowns.retain(|_, cooldown| !cooldown.can_resend());
        cooldowns
            .get(phone)
            .map(ResendCooldown::remaining)
            .unwrap_or_default()
    }

    pub(crate) fn record_otp_sent(&self, phone: &str, cooldown: &ResendCooldown) {
        self.otp_cooldowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(phone.to_string(), cooldown.clone());
    }

    /// Sends `request`, returning whatever status the backend answered with.
    ///
    /// A 401 on an authenticated request triggers one refresh-and-resend.
    /// When that is impossible the session is cleared and the caller gets
    /// `Unauthorized` (no refresh credential) or `SessionExpired`
    /// (refresh failed).
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        if request.authenticated && !request.is_refresh {
            request.bearer = self.session.access_token()?;
        }

        let response = self.transport.execute(request.clone()).await?;
        if response.status != 401
            || request.retried
            || request.is_refresh
            || !request.authenticated
        {
            return Ok(response);
        }

        request.retried = true;

        // Another request may have refreshed while this one was in flight.
        let current = self.session.access_token()?;
        if current.is_some() && request.bearer.is_some() && current != request.bearer {
            log::debug!("Resending {} with the already refreshed token", request.path);
            request.bearer = current;
            return self.transport.execute(request).await;
        }

        if self.session.refresh_token()?.is_none() {
            log::warn!(
                "{} {} rejected and no refresh token is stored",
                request.method,
                request.path
            );
            self.session.clear(LogoutReason::MissingRefreshToken)?;
            return Err(ClientError::Unauthorized);
        }

        match self.session.refresh(self.transport.clone()).await {
            Ok(access) => {
                log::debug!("Resending {} {} after refresh", request.method, request.path);
                request.bearer = Some(access);
                self.transport.execute(request).await
            }
            Err(failure) => {
                log::warn!(
                    "{} {} failed and the session could not be refreshed: {failure}",
                    request.method,
                    request.path
                );
                Err(ClientError::SessionExpired)
            }
        }
    }

    /// Sends `request` and decodes a successful JSON body.
    pub async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.checked(request).await?;
        Ok(serde_json::from_value(response.body)?)
    }

    /// Sends `request`, discarding the body of a successful response.
    pub async fn execute(&self, request: ApiRequest) -> Result<()> {
        self.checked(request).await.map(|_| ())
    }

    async fn checked(&self, request: ApiRequest) -> Result<ApiResponse> {
        let authenticated = request.authenticated;
        let response = self.send(request).await?;
        if response.is_success() {
            Ok(response)
        } else if response.status == 401 && authenticated {
            Err(ClientError::Unauthorized)
        } else {
            Err(response.into())
        }
    }
}
