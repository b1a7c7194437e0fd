//! Background refresh of the unread badges.

use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::common::UnreadCounts;
use crate::error::{ClientError, Result};
use crate::network::ApiClient;

/// Polls unread notification and chat counters on a fixed interval.
pub struct UnreadPoller {
    counts: watch::Receiver<UnreadCounts>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl UnreadPoller {
    /// Polls once right away, then every `interval`.
    pub fn spawn(api: ApiClient, interval: Duration) -> Self {
        let (sender, counts) = watch::channel(UnreadCounts::default());
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(run(api, interval, sender, stopped));
        Self {
            counts,
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// Last successfully polled counters.
    pub fn counts(&self) -> UnreadCounts {
        *self.counts.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<UnreadCounts> {
        self.counts.clone()
    }

    /// Cancels polling; an in-flight poll is abandoned.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                log::warn!("Unread poller ended abnormally: {err}");
            }
        }
    }
}

impl Drop for UnreadPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    api: ApiClient,
    interval: Duration,
    counts: watch::Sender<UnreadCounts>,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut stopped => break,
            _ = ticker.tick() => {}
        }

        let polled = tokio::select! {
            _ = &mut stopped => break,
            polled = poll_once(&api) => polled,
        };
        match polled {
            Ok(fresh) => {
                counts.send_if_modified(|current| {
                    let changed = *current != fresh;
                    *current = fresh;
                    changed
                });
            }
            Err(err @ (ClientError::Unauthorized | ClientError::SessionExpired)) => {
                log::info!("Stopping unread polling: {err}");
                break;
            }
            Err(err) if err.is_retryable() => {
                log::warn!("Unread poll failed, keeping previous counts: {err}")
            }
            Err(err) => log::error!("Unread poll rejected, keeping previous counts: {err}"),
        }
    }
    log::debug!("Unread poller stopped");
}

async fn poll_once(api: &ApiClient) -> Result<UnreadCounts> {
    let notifications = api.notifications();
    let chat = api.chat();
    let (notifications, chat) = tokio::try_join!(notifications.unread_count(), chat.unread_count())?;
    Ok(UnreadCounts {
        notifications,
        chat,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::transport::{ApiRequest, ApiResponse, HttpTransport};
    use crate::session::SessionContext;
    use crate::storage::SessionStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Badges {
        notifications: AtomicU64,
        chat: AtomicU64,
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpTransport for Badges {
        async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Ok(ApiResponse::new(503, json!({"detail": "unavailable"})));
            }
            let count = if request.path.starts_with("/notifications/") {
                self.notifications.load(Ordering::SeqCst)
            } else {
                self.chat.load(Ordering::SeqCst)
            };
            Ok(ApiResponse::new(200, json!({"count": count})))
        }
    }

    fn client(badges: &Arc<Badges>) -> ApiClient {
        let session = SessionContext::open(SessionStore::in_memory().unwrap(), "/login").unwrap();
        ApiClient::new(badges.clone(), session)
    }

    #[tokio::test(start_paused = true)]
    async fn polls_immediately_then_on_the_interval() {
        let badges = Arc::new(Badges::default());
        badges.notifications.store(2, Ordering::SeqCst);
        badges.chat.store(5, Ordering::SeqCst);

        let started = tokio::time::Instant::now();
        let poller = UnreadPoller::spawn(client(&badges), Duration::from_secs(30));
        let mut updates = poller.subscribe();

        updates.changed().await.unwrap();
        assert_eq!(
            poller.counts(),
            UnreadCounts {
                notifications: 2,
                chat: 5
            }
        );
        assert!(started.elapsed() < Duration::from_secs(1));

        badges.chat.store(0, Ordering::SeqCst);
        updates.changed().await.unwrap();
        assert_eq!(poller.counts().chat, 0);
        assert!(started.elapsed() >= Duration::from_secs(30));

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failures_keep_stale_counts() {
        let badges = Arc::new(Badges::default());
        badges.notifications.store(4, Ordering::SeqCst);
        let poller = UnreadPoller::spawn(client(&badges), Duration::from_secs(30));
        poller.subscribe().changed().await.unwrap();

        badges.failing.store(true, Ordering::SeqCst);
        let before = badges.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(badges.calls.load(Ordering::SeqCst) > before);
        assert_eq!(poller.counts().notifications, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn no_poll_fires_after_stop() {
        let badges = Arc::new(Badges::default());
        let poller = UnreadPoller::spawn(client(&badges), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(1)).await;
        poller.stop().await;

        let calls = badges.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(badges.calls.load(Ordering::SeqCst), calls);
    }
}
