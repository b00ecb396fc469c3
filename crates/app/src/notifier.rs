//! Webhook notifier
//!
//! Announces new watch parties to a Discord-style webhook. Delivery is
//! fire-and-forget: a failed post is logged and never affects the session.

use std::time::Duration;

use aphrodite_net::DirectoryEvent;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> anyhow::Result<Self> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("webhook URL must start with http:// or https://");
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("Aphrodite/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, url })
    }

    /// Forward directory events until shutdown
    pub fn spawn(
        self,
        mut events: broadcast::Receiver<DirectoryEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Webhook notifier started");
            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Ok(event) => self.notify(&event),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "Webhook notifier fell behind");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("Webhook notifier stopped");
        })
    }

    fn notify(&self, event: &DirectoryEvent) {
        let Some(body) = payload(event) else {
            return;
        };
        let request = self.http.post(&self.url).json(&body);
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Webhook delivered");
                }
                Ok(response) => {
                    warn!(status = %response.status(), "Webhook rejected notification");
                }
                Err(e) => {
                    warn!(error = %e, "Webhook delivery failed");
                }
            }
        });
    }
}

/// Webhook body for an event; only new sessions are announced
fn payload(event: &DirectoryEvent) -> Option<Value> {
    match event {
        DirectoryEvent::SessionCreated {
            session_id,
            name,
            host_name,
        } => Some(json!({
            "content": format!("{} started a watch party: {}", host_name, name),
            "embeds": [{
                "title": name,
                "description": format!("Session {}", session_id),
            }],
        })),
        DirectoryEvent::SessionClosed { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_created_session_payload() {
        let session_id = Uuid::new_v4();
        let body = payload(&DirectoryEvent::SessionCreated {
            session_id,
            name: "Finals".into(),
            host_name: "mara".into(),
        })
        .unwrap();

        assert_eq!(body["content"], "mara started a watch party: Finals");
        assert_eq!(body["embeds"][0]["description"], format!("Session {}", session_id));
    }

    #[test]
    fn test_closed_session_not_announced() {
        assert!(payload(&DirectoryEvent::SessionClosed {
            session_id: Uuid::new_v4(),
            epoch: 1,
        })
        .is_none());
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(WebhookNotifier::new("ftp://example.com/hook".into()).is_err());
        assert!(WebhookNotifier::new("https://example.com/hook".into()).is_ok());
    }
}
