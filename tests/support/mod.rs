//! In-memory stand-ins for the marketplace backend and the chat socket.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use servicehub_client::common::AuthTokens;
use servicehub_client::error::{ClientError, Result};
use servicehub_client::network::socket::{ChannelConnection, ChannelConnector, Frame};
use servicehub_client::network::{ApiClient, ApiRequest, ApiResponse, HttpTransport};
use servicehub_client::session::{REFRESH_PATH, SessionContext};
use servicehub_client::storage::SessionStore;

pub const OTP_PHONE: &str = "+8801700000000";
pub const OTP_CODE: &str = "123456";

pub struct BackendState {
    /// The only access token the backend currently accepts.
    pub valid_access: String,
    pub refresh_calls: usize,
    pub requests: Vec<ApiRequest>,
    pub history: Vec<Value>,
    pub chat_send_fails: bool,
    sent: usize,
}

/// Scripted marketplace backend.
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new(valid_access: &str) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BackendState {
                valid_access: valid_access.to_string(),
                refresh_calls: 0,
                requests: Vec::new(),
                history: Vec::new(),
                chat_send_fails: false,
                sent: 0,
            }),
        })
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut BackendState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn refresh_calls(&self) -> usize {
        self.with_state(|s| s.refresh_calls)
    }

    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.with_state(|s| {
            s.requests
                .iter()
                .filter(|r| r.path == path)
                .cloned()
                .collect()
        })
    }

    fn authorized(&self, request: &ApiRequest) -> bool {
        let valid = self.with_state(|s| s.valid_access.clone());
        request.bearer.as_deref() == Some(valid.as_str())
    }
}

fn unauthorized() -> ApiResponse {
    ApiResponse::new(
        401,
        json!({"detail": "Given token not valid for any token type"}),
    )
}

fn profile() -> Value {
    json!({
        "id": 1,
        "first_name": "Rahim",
        "last_name": "Uddin",
        "phone": OTP_PHONE,
        "user_type": "customer"
    })
}

#[async_trait]
impl HttpTransport for FakeBackend {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.with_state(|s| s.requests.push(request.clone()));
        let body = request.body.clone().unwrap_or(Value::Null);

        if request.path == REFRESH_PATH {
            // Keeps the exchange pending long enough for other callers to join.
            tokio::task::yield_now().await;
            return Ok(self.with_state(|s| {
                s.refresh_calls += 1;
                if body["refresh"] == "refresh-1" {
                    s.valid_access = format!("access-{}", s.refresh_calls + 1);
                    ApiResponse::new(200, json!({"access": s.valid_access}))
                } else {
                    ApiResponse::new(401, json!({"detail": "Token is invalid or expired"}))
                }
            }));
        }

        match request.path.as_str() {
            "/users/send-otp/" => Ok(ApiResponse::new(200, json!({"message": "OTP sent"}))),
            "/users/verify-otp/" => {
                if body["otp"] == OTP_CODE && body["phone"] == OTP_PHONE {
                    let access = self.with_state(|s| s.valid_access.clone());
                    Ok(ApiResponse::new(
                        200,
                        json!({
                            "tokens": {"access": access, "refresh": "refresh-1"},
                            "user": profile()
                        }),
                    ))
                } else {
                    Ok(ApiResponse::new(
                        400,
                        json!({"detail": "Verification failed", "otp": ["Invalid or expired OTP"]}),
                    ))
                }
            }
            _ if !self.authorized(&request) => Ok(unauthorized()),
            "/users/logout/" => Ok(ApiResponse::new(205, Value::Null)),
            "/users/profile/" if request.method == Method::PATCH => {
                let mut updated = profile();
                if let (Some(target), Some(patch)) = (updated.as_object_mut(), body.as_object()) {
                    for (key, value) in patch {
                        target.insert(key.clone(), value.clone());
                    }
                }
                Ok(ApiResponse::new(200, updated))
            }
            "/users/profile/" => Ok(ApiResponse::new(200, profile())),
            "/chat/rooms/" => Ok(ApiResponse::new(
                200,
                json!([{"id": 7, "name": "Plumbing job", "unread_count": 2}]),
            )),
            "/notifications/" => Ok(ApiResponse::new(
                200,
                json!({
                    "count": 1,
                    "next": null,
                    "previous": null,
                    "results": [{
                        "id": 3,
                        "title": "Booking confirmed",
                        "notification_type": "booking",
                        "is_read": false
                    }]
                }),
            )),
            "/payments/initiate/" => Ok(ApiResponse::new(
                200,
                json!({
                    "success": true,
                    "gateway_url": "https://sandbox.gateway.test/pay/TX9",
                    "tran_id": "TX9",
                    "payment_id": 41
                }),
            )),
            path if path.ends_with("/mark-read/") => Ok(ApiResponse::new(200, json!({}))),
            path if path.ends_with("/messages/send/") => Ok(self.with_state(|s| {
                if s.chat_send_fails {
                    return ApiResponse::new(503, json!({"detail": "Service unavailable"}));
                }
                s.sent += 1;
                ApiResponse::new(
                    201,
                    json!({
                        "id": format!("srv-{}", s.sent),
                        "sender": 1,
                        "content": body["content"],
                        "client_id": body["client_id"],
                        "created_at": "2024-05-01T10:05:00Z"
                    }),
                )
            })),
            path if path.ends_with("/messages/") => {
                let history = self.with_state(|s| s.history.clone());
                Ok(ApiResponse::new(
                    200,
                    json!({"count": history.len(), "results": history}),
                ))
            }
            other => Ok(ApiResponse::new(404, json!({"detail": format!("{other} not found")}))),
        }
    }
}

pub fn history_message(id: u32, body: &str) -> Value {
    json!({
        "id": id,
        "chatroom": 7,
        "sender": 2,
        "content": body,
        "created_at": format!("2024-05-01T10:0{id}:00Z")
    })
}

pub fn anonymous_client(backend: &Arc<FakeBackend>) -> ApiClient {
    let session = SessionContext::open(SessionStore::in_memory().unwrap(), "/login").unwrap();
    ApiClient::new(backend.clone(), session)
}

/// Client whose stored session holds `access` and the refresh token the
/// backend honours.
pub fn signed_in_client(backend: &Arc<FakeBackend>, access: &str) -> ApiClient {
    let client = anonymous_client(backend);
    client
        .session()
        .establish(
            &AuthTokens {
                access: access.to_string(),
                refresh: "refresh-1".to_string(),
            },
            None,
        )
        .unwrap();
    client
}

/// Server half of an accepted fake connection.
pub struct ServerEnd {
    pub to_client: mpsc::UnboundedSender<Frame>,
    pub from_client: mpsc::UnboundedReceiver<Frame>,
}

struct FakeConnection {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Frame>,
    stalled: bool,
}

#[async_trait]
impl ChannelConnection for FakeConnection {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        if self.stalled {
            std::future::pending::<()>().await;
        }
        self.outbound
            .send(frame.clone())
            .map_err(|_| ClientError::Socket("peer went away".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Connector that either refuses or hands the server end to the test.
pub struct FakeConnector {
    attempts: AtomicUsize,
    tokens: Mutex<Vec<Option<String>>>,
    refusals: Mutex<VecDeque<bool>>,
    refuse_all: bool,
    stall_writes: AtomicBool,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl FakeConnector {
    pub fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        Self::build(false)
    }

    pub fn refusing() -> Arc<Self> {
        Self::build(true).0
    }

    fn build(refuse_all: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, servers) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            attempts: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
            refusals: Mutex::new(VecDeque::new()),
            refuse_all,
            stall_writes: AtomicBool::new(false),
            accepted,
        });
        (connector, servers)
    }

    /// Refuses the next connection attempt only.
    pub fn refuse_next(&self) {
        self.refusals.lock().unwrap().push_back(true);
    }

    /// Connections made from now on never finish a write.
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn connect(
        &self,
        _room_id: &str,
        token: Option<&str>,
    ) -> Result<Box<dyn ChannelConnection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(token.map(str::to_string));

        let refused = self.refuse_all || self.refusals.lock().unwrap().pop_front().is_some();
        if refused {
            return Err(ClientError::Socket("connection refused".to_string()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let _ = self.accepted.send(ServerEnd {
            to_client,
            from_client,
        });
        Ok(Box::new(FakeConnection {
            inbound,
            outbound,
            stalled: self.stall_writes.load(Ordering::SeqCst),
        }))
    }
}
