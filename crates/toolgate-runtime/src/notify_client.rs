//! HTTP client the watch loop uses to reach the broker process.
//!
//! Calls are bounded: a short request timeout and a fixed number of
//! retries with fixed backoff, after which the call is abandoned. The
//! watch loop never awaits these calls. A broker outage logs one WARN for
//! the first failure of a streak and DEBUG for the rest.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use toolgate_core::wire::CreateNotificationRequest;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifyClient {
    http: reqwest::Client,
    base_url: String,
    policy: RetryPolicy,
    /// Consecutive transport failures, shared across cloned handles.
    failure_streak: Arc<AtomicU32>,
}

impl NotifyClient {
    pub fn new(base_url: &str, policy: RetryPolicy) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(policy.timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            policy,
            failure_streak: Arc::new(AtomicU32::new(0)),
        })
    }

    /// POST a notification-create request. Returns whether the broker
    /// accepted it.
    pub async fn create(&self, req: &CreateNotificationRequest) -> bool {
        let url = format!("{}/api/notification", self.base_url);
        let builder = self.http.post(&url).json(req);
        self.send_with_retries(builder, &url, false).await
    }

    /// DELETE a notification on completion detection. A 404 is tolerated
    /// as success (the broker never saw or already evicted the id).
    pub async fn dismiss(&self, correlation_id: &str, is_error: bool) -> bool {
        let url = format!(
            "{}/api/notification/{}?is_error={}",
            self.base_url, correlation_id, is_error
        );
        let builder = self.http.delete(&url);
        self.send_with_retries(builder, &url, true).await
    }

    /// Tell the broker this watcher session is over.
    pub async fn end_session(&self, session_id: &str) -> bool {
        let url = format!("{}/api/session/end", self.base_url);
        let builder = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "session_id": session_id }));
        self.send_with_retries(builder, &url, false).await
    }

    async fn send_with_retries(
        &self,
        builder: reqwest::RequestBuilder,
        url: &str,
        tolerate_404: bool,
    ) -> bool {
        let attempts = self.policy.max_retries + 1;
        for attempt in 0..attempts {
            let Some(request) = builder.try_clone() else {
                warn!(url, "request not retryable");
                return false;
            };
            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() || (tolerate_404 && status.as_u16() == 404) {
                        self.failure_streak.store(0, Ordering::Relaxed);
                        return true;
                    }
                    // The broker answered; retrying will not change a
                    // deliberate rejection.
                    warn!(url, status = status.as_u16(), "broker rejected request");
                    return false;
                }
                Err(e) => {
                    let streak = self.failure_streak.fetch_add(1, Ordering::Relaxed);
                    if streak == 0 {
                        warn!(url, error = %e, "broker unreachable");
                    } else {
                        debug!(url, error = %e, streak = streak + 1, "broker still unreachable");
                    }
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }
        false
    }
}
