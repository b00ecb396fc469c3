//! Playback adapter
//!
//! Wraps a local media player behind [`PlaybackAdapter`]. The sync driver
//! turns coordination messages into adapter calls, and adapter events into
//! commands when this participant is host.

mod simulated;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use aphrodite_core::config::SyncConfig;
use aphrodite_core::{LoadError, MediaInfo};

pub use simulated::SimulatedPlayer;

/// Events buffered per subscriber before the oldest are dropped
const EVENT_CAPACITY: usize = 64;

/// Player accepted the media and can take commands
#[derive(Debug, Clone, PartialEq)]
pub struct Ready {
    pub media_ref: String,
    pub duration_seconds: Option<f64>,
}

/// Player accepted a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("player has no media loaded")]
    NotReady,

    #[error("position {0} is outside the media")]
    OutOfRange(String),

    #[error("transient player failure: {0}")]
    TransientFailure(String),
}

impl PlaybackError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PlaybackError::TransientFailure(_))
    }
}

/// What a player reports to its subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Ready,
    StateChanged {
        position: f64,
        is_playing: bool,
        rate: f64,
        /// The user acted on the player directly, as opposed to following a
        /// call made through the adapter
        local: bool,
    },
    Error {
        reason: String,
    },
}

/// A local media player the sync protocol can drive
#[async_trait]
pub trait PlaybackAdapter: Send + Sync {
    async fn load(&self, media: &MediaInfo) -> Result<Ready, LoadError>;

    async fn play(&self) -> Result<Ack, PlaybackError>;

    async fn pause(&self) -> Result<Ack, PlaybackError>;

    async fn seek_to(&self, position: f64) -> Result<Ack, PlaybackError>;

    async fn set_rate(&self, rate: f64) -> Result<Ack, PlaybackError>;

    fn current_position(&self) -> f64;

    fn is_playing(&self) -> bool;

    fn current_rate(&self) -> f64;

    /// Events emitted from now on; earlier events are not replayed
    fn subscribe(&self) -> Subscription;
}

/// Fan-out point for one adapter's events
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Deliver to current subscribers; dropped when there are none
    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of an adapter's events; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<PlayerEvent>,
}

impl Subscription {
    /// Next event, or `None` once the adapter is gone
    pub async fn next(&mut self) -> Option<PlayerEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Player event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Bounds on a single player call and its retries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub call_timeout: Duration,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            call_timeout: Duration::from_secs(5),
            base_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(sync: &SyncConfig) -> Self {
        Self {
            attempts: sync.player_retry_attempts.max(1),
            call_timeout: sync.player_call_timeout(),
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1));
        let jitter = rand::thread_rng().gen_range(0..=self.base_backoff.as_millis() as u64 / 2);
        exp + Duration::from_millis(jitter)
    }
}

/// Run a player call, retrying transient failures with backoff
///
/// A call that outlives `call_timeout` counts as a transient failure. Other
/// errors are returned immediately.
pub async fn call_with_retry<F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<Ack, PlaybackError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Ack, PlaybackError>>,
{
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(PlaybackError::TransientFailure(format!(
                "{} timed out after {:?}",
                operation, policy.call_timeout
            ))),
        };

        match result {
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                let delay = policy.backoff(attempt);
                debug!(operation, attempt, ?delay, error = %e, "Retrying player call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            call_timeout: Duration::from_millis(50),
            base_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = call_with_retry(&fast_policy(), "play", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(PlaybackError::TransientFailure("buffering".into()))
                } else {
                    Ok(Ack)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(Ack));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = call_with_retry(&fast_policy(), "seek_to", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PlaybackError::TransientFailure("buffering".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(PlaybackError::TransientFailure(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = call_with_retry(&fast_policy(), "seek_to", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PlaybackError::NotReady)
            }
        })
        .await;

        assert_eq!(result, Err(PlaybackError::NotReady));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let result = call_with_retry(&fast_policy(), "play", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Ack)
        })
        .await;

        assert!(matches!(result, Err(PlaybackError::TransientFailure(_))));
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let hub = EventHub::new();
        let mut early = hub.subscribe();
        hub.emit(PlayerEvent::Ready);

        let mut late = hub.subscribe();
        hub.emit(PlayerEvent::Error {
            reason: "decoder".into(),
        });

        assert_eq!(early.next().await, Some(PlayerEvent::Ready));
        assert!(matches!(late.next().await, Some(PlayerEvent::Error { .. })));

        drop(late);
        hub.emit(PlayerEvent::Ready);
        assert!(matches!(early.next().await, Some(PlayerEvent::Error { .. })));
        assert_eq!(early.next().await, Some(PlayerEvent::Ready));
    }
}
