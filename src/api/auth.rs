use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::common::{AuthTokens, User};
use crate::error::{ClientError, Result};
use crate::network::ApiClient;
use crate::network::transport::ApiRequest;
use crate::session::{LogoutReason, SessionState};
use crate::validation;

/// Optional profile data sent along with the first OTP verification.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Identity assertion from the federated sign-in provider.
#[derive(Debug, Clone, Serialize)]
pub struct FederatedIdentity {
    pub uid: String,
    pub email: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "photoURL")]
    pub photo_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub user_type: crate::common::Role,
}

/// Response of OTP verification and federated sign-in.
#[derive(Debug, Deserialize)]
struct NestedTokens {
    #[serde(default)]
    tokens: Option<AuthTokens>,
    #[serde(default)]
    user: Option<User>,
}

/// Response of password login.
#[derive(Debug, Deserialize)]
struct FlatTokens {
    access: String,
    refresh: String,
    #[serde(default)]
    user: Option<User>,
}

#[derive(Serialize)]
struct PhoneBody<'a> {
    phone: &'a str,
}

#[derive(Serialize)]
struct VerifyBody<'a> {
    phone: &'a str,
    otp: &'a str,
    #[serde(flatten)]
    profile: &'a ProfileFields,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh: &'a str,
}

/// Countdown gating how soon an OTP may be requested again.
#[derive(Debug, Clone)]
pub struct ResendCooldown {
    period: Duration,
    started: Option<Instant>,
}

impl ResendCooldown {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            started: None,
        }
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn remaining(&self) -> Duration {
        match self.started {
            Some(started) => self.period.saturating_sub(started.elapsed()),
            None => Duration::ZERO,
        }
    }

    pub fn can_resend(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// A phone number that has been sent an OTP and awaits verification.
#[derive(Debug, Clone)]
pub struct OtpChallenge {
    phone: String,
    cooldown: ResendCooldown,
}

impl OtpChallenge {
    pub fn phone(&self) -> &str {
        &self.phone
    }

    pub fn resend_in(&self) -> Duration {
        self.cooldown.remaining()
    }

    /// Requests a fresh code; refused while the cooldown is running.
    pub async fn resend(&mut self, auth: &AuthApi<'_>) -> Result<()> {
        let remaining = self.cooldown.remaining().max(auth.cooldown_remaining(&self.phone));
        if !remaining.is_zero() {
            return Err(cooldown_running(remaining));
        }
        auth.request_otp(&self.phone).await?;
        self.cooldown.start();
        auth.client.record_otp_sent(&self.phone, &self.cooldown);
        Ok(())
    }

    pub async fn verify(
        &self,
        auth: &AuthApi<'_>,
        otp: &str,
        profile: &ProfileFields,
    ) -> Result<Option<User>> {
        auth.verify_otp(&self.phone, otp, profile).await
    }
}

/// Sign-in, sign-out and account creation.
pub struct AuthApi<'a> {
    client: &'a ApiClient,
}

impl<'a> AuthApi<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    /// Sends a one-time code to `phone` and starts the resend countdown.
    /// Refused while an earlier code to the same phone is cooling down.
    pub async fn send_otp(&self, phone: &str, cooldown: Duration) -> Result<OtpChallenge> {
        let phone = validation::phone(phone)?;
        let remaining = self.cooldown_remaining(&phone);
        if !remaining.is_zero() {
            return Err(cooldown_running(remaining));
        }
        self.request_otp(&phone).await?;

        let mut cooldown = ResendCooldown::new(cooldown);
        cooldown.start();
        self.client.record_otp_sent(&phone, &cooldown);
        Ok(OtpChallenge { phone, cooldown })
    }

    fn cooldown_remaining(&self, phone: &str) -> Duration {
        self.client.otp_cooldown_remaining(phone)
    }

    async fn request_otp(&self, phone: &str) -> Result<()> {
        let request = ApiRequest::post("/users/send-otp/")
            .anonymous()
            .json(&PhoneBody { phone })?;
        self.client.execute(request).await?;
        log::info!("OTP requested");
        Ok(())
    }

    /// Verifies `otp` for `phone` and establishes the session.
    pub async fn verify_otp(
        &self,
        phone: &str,
        otp: &str,
        profile: &ProfileFields,
    ) -> Result<Option<User>> {
        let phone = validation::phone(phone)?;
        let otp = validation::otp(otp)?;
        let request = ApiRequest::post("/users/verify-otp/")
            .anonymous()
            .json(&VerifyBody {
                phone: &phone,
                otp: &otp,
                profile,
            })?;

        let reply: NestedTokens = self
            .client
            .fetch(request)
            .await
            .map_err(prefer_otp_message)?;
        self.establish_nested(reply)
    }

    /// Exchanges a federated identity assertion for a session.
    pub async fn google_login(&self, identity: &FederatedIdentity) -> Result<Option<User>> {
        let request = ApiRequest::post("/users/google/")
            .anonymous()
            .json(identity)?;
        let reply: NestedTokens = self.client.fetch(request).await?;
        self.establish_nested(reply)
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<Option<User>> {
        validation::email(&credentials.email)?;
        let request = ApiRequest::post("/users/login/")
            .anonymous()
            .json(credentials)?;
        let reply: FlatTokens = self.client.fetch(request).await?;

        let tokens = AuthTokens {
            access: reply.access,
            refresh: reply.refresh,
        };
        self.client.session().establish(&tokens, reply.user.as_ref())?;
        Ok(reply.user)
    }

    pub async fn register(&self, registration: &Registration) -> Result<()> {
        validation::email(&registration.email)?;
        validation::password(&registration.password)?;
        let request = ApiRequest::post("/users/register/")
            .anonymous()
            .json(registration)?;
        self.client.execute(request).await
    }

    /// Ends the session. The backend call is best effort; local state is
    /// cleared regardless of its outcome.
    pub async fn logout(&self) -> Result<()> {
        let session = self.client.session();
        let was_signed_in = session.state() != SessionState::NoSession;
        match session.refresh_token() {
            Ok(Some(refresh)) => {
                let outcome = match ApiRequest::post("/users/logout/")
                    .json(&RefreshBody { refresh: &refresh })
                {
                    Ok(request) => self.client.execute(request).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = outcome {
                    log::warn!("Logout request failed, clearing local session anyway: {err}");
                }
            }
            Ok(None) => {}
            Err(err) => log::warn!("Could not read refresh token during logout: {err}"),
        }
        // A failed refresh during the request already cleared and announced it.
        if was_signed_in && session.state() == SessionState::NoSession {
            return Ok(());
        }
        session.clear(LogoutReason::UserRequested)
    }

    fn establish_nested(&self, reply: NestedTokens) -> Result<Option<User>> {
        let tokens = reply
            .tokens
            .ok_or_else(|| ClientError::Protocol("sign-in response carried no tokens".into()))?;
        self.client
            .session()
            .establish(&tokens, reply.user.as_ref())?;
        Ok(reply.user)
    }
}

fn cooldown_running(remaining: Duration) -> ClientError {
    ClientError::validation(
        "otp",
        format!("Resend OTP in {}s", remaining.as_secs().max(1)),
    )
}

fn prefer_otp_message(err: ClientError) -> ClientError {
    match err {
        ClientError::Api {
            status,
            message,
            field_errors,
        } => {
            let message = field_errors
                .get("otp")
                .and_then(|messages| messages.first().cloned())
                .unwrap_or(message);
            ClientError::Api {
                status,
                message,
                field_errors,
            }
        }
        other => other,
    }
}
