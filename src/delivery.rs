//! At-least-once webhook delivery of task results.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::retry::RetryPolicy;

/// Delivery errors for a single attempt.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Webhook returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// HTTP and retry settings for webhook delivery.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("mobile-agent/{}", env!("CARGO_PKG_VERSION")),
            retry: RetryPolicy::exponential(
                5,
                Duration::from_secs(1),
                Duration::from_secs(30),
                Duration::from_millis(500),
            ),
        }
    }
}

impl DeliveryConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Final state of one delivery job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub url: String,
    pub attempts: u32,
    pub delivered: bool,
    /// Status of the last response, if any arrived.
    pub last_status: Option<u16>,
    pub last_error: Option<String>,
}

/// Posts JSON payloads to caller-supplied URLs.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    client: Client,
    config: DeliveryConfig,
}

impl WebhookDelivery {
    pub fn new(config: DeliveryConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Post `payload` until a 2xx arrives or the retry budget runs out.
    ///
    /// Never returns an error: the outcome is in the report and the last
    /// failure is logged.
    pub async fn deliver<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> DeliveryReport {
        let mut report = DeliveryReport {
            url: url.to_string(),
            attempts: 0,
            delivered: false,
            last_status: None,
            last_error: None,
        };

        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(url, error = %e, "cannot serialize webhook payload");
                report.last_error = Some(DeliveryError::from(e).to_string());
                return report;
            }
        };

        let max_attempts = self.config.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            report.attempts = attempt;
            match self.post_once(url, body.clone()).await {
                Ok(status) => {
                    tracing::info!(url, attempt, status, "webhook delivered");
                    report.delivered = true;
                    report.last_status = Some(status);
                    report.last_error = None;
                    return report;
                }
                Err(e) => {
                    if let DeliveryError::Status { status, .. } = &e {
                        report.last_status = Some(*status);
                    }
                    report.last_error = Some(e.to_string());

                    if self.config.retry.should_retry(attempt) {
                        let delay = self.config.retry.delay_for(attempt);
                        tracing::warn!(url, attempt, max_attempts, error = %e, delay_ms = delay.as_millis() as u64, "webhook delivery failed, retrying");
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    } else {
                        tracing::error!(url, attempts = attempt, error = %e, "webhook delivery abandoned");
                    }
                }
            }
        }
        report
    }

    /// Deliver in the background.
    pub fn spawn<T>(self: &Arc<Self>, url: String, payload: T) -> JoinHandle<DeliveryReport>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let delivery = Arc::clone(self);
        tokio::spawn(async move { delivery.deliver(&url, &payload).await })
    }

    async fn post_once(&self, url: &str, body: Vec<u8>) -> Result<u16, DeliveryError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers each connection with the next status, then keeps repeating the last.
    pub(crate) async fn responder(statuses: Vec<u16>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let seen = bodies.clone();

        tokio::spawn(async move {
            let mut index = 0;
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let status = statuses[index.min(statuses.len() - 1)];
                index += 1;
                let request = read_request(&mut socket).await;
                seen.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 {} Test\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                    status
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/hook", addr), bodies)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buffer);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let lower = line.to_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .and_then(|v| v.trim().parse::<usize>().ok())
                    })
                    .unwrap_or(0);
                if buffer.len() >= header_end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buffer).to_string()
    }

    fn fast(attempts: u32) -> WebhookDelivery {
        let retry = RetryPolicy::exponential(attempts, Duration::ZERO, Duration::ZERO, Duration::ZERO);
        WebhookDelivery::new(DeliveryConfig::default().with_retry(retry)).unwrap()
    }

    #[tokio::test]
    async fn test_delivers_after_server_errors() {
        let (url, requests) = responder(vec![500, 502, 200]).await;
        let payload = json!({"task_id": "abc", "status": "success", "history": []});

        let report = fast(5).deliver(&url, &payload).await;

        assert!(report.delivered);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.last_status, Some(200));

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].starts_with("POST /hook"));
        assert!(requests[0].to_lowercase().contains("content-type: application/json"));
        assert!(requests[0].to_lowercase().contains("user-agent: mobile-agent/"));
        assert!(requests[2].contains("\"task_id\":\"abc\""));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (url, requests) = responder(vec![503]).await;

        let report = fast(5).deliver(&url, &json!({"task_id": "x"})).await;

        assert!(!report.delivered);
        assert_eq!(report.attempts, 5);
        assert_eq!(report.last_status, Some(503));
        assert!(report.last_error.unwrap().contains("503"));
        assert_eq!(requests.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let report = fast(3).deliver(&format!("http://{}/hook", addr), &json!({})).await;

        assert!(!report.delivered);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.last_status, None);
        assert!(report.last_error.is_some());
    }

    #[tokio::test]
    async fn test_spawned_delivery() {
        let (url, _) = responder(vec![201]).await;
        let delivery = Arc::new(fast(2));

        let report = delivery.spawn(url, json!({"task_id": "y"})).await.unwrap();
        assert!(report.delivered);
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn test_default_backoff_schedule() {
        let config = DeliveryConfig::default();
        let delays: Vec<u64> = (1..=5).map(|a| config.retry.base_delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(config.retry.max_attempts, 5);
    }
}
