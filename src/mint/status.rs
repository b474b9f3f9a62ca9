//! Single-slot status channel with auto-dismiss.
//!
//! Holds at most one [`StatusMessage`]. Publishing overwrites the current
//! message and cancels any pending dismiss timer; an auto-dismissing message
//! is hidden after its delay and cleared after a short grace period.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default auto-dismiss delay in milliseconds.
pub const DEFAULT_DISMISS_DELAY_MS: u64 = 5000;

/// Default grace between hiding and clearing in milliseconds.
pub const DEFAULT_CLEAR_GRACE_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub severity: Severity,
    pub text: String,
    /// Completion fraction in `[0, 1]`
    pub progress: Option<f64>,
    /// Explorer link attached to the message
    pub link: Option<String>,
    pub auto_dismiss: bool,
    /// Overrides the channel's default dismiss delay
    pub dismiss_delay_ms: Option<u64>,
}

impl StatusMessage {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
            progress: None,
            link: None,
            auto_dismiss: false,
            dismiss_delay_ms: None,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(Severity::Info, text)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(Severity::Success, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(Severity::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Severity::Error, text)
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress.clamp(0.0, 1.0));
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn auto_hide(mut self) -> Self {
        self.auto_dismiss = true;
        self
    }

    pub fn with_dismiss_delay(mut self, delay_ms: u64) -> Self {
        self.auto_dismiss = true;
        self.dismiss_delay_ms = Some(delay_ms);
        self
    }
}

/// What observers see: the message and whether it is still shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub message: StatusMessage,
    pub visible: bool,
}

struct ChannelInner {
    tx: watch::Sender<Option<StatusView>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    dismiss_delay: Duration,
    clear_grace: Duration,
}

/// Shared handle to the status slot.
#[derive(Clone)]
pub struct StatusChannel {
    inner: Arc<ChannelInner>,
}

impl StatusChannel {
    pub fn new(dismiss_delay: Duration, clear_grace: Duration) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            inner: Arc::new(ChannelInner {
                tx,
                timer: Mutex::new(None),
                generation: AtomicU64::new(0),
                dismiss_delay,
                clear_grace,
            }),
        }
    }

    /// Replace the current message.
    ///
    /// Must be called from within a tokio runtime when the message auto-dismisses.
    pub fn publish(&self, message: StatusMessage) {
        match message.severity {
            Severity::Error => error!("{}", message.text),
            Severity::Warning => warn!("{}", message.text),
            _ => info!("{}", message.text),
        }

        let mut timer = self.lock_timer();
        if let Some(pending) = timer.take() {
            pending.abort();
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = message
            .dismiss_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(self.inner.dismiss_delay);
        let auto_dismiss = message.auto_dismiss;

        self.inner.tx.send_replace(Some(StatusView {
            message,
            visible: true,
        }));

        if auto_dismiss {
            let inner = Arc::clone(&self.inner);
            *timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if inner.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                inner.tx.send_modify(|slot| {
                    if let Some(view) = slot.as_mut() {
                        view.visible = false;
                    }
                });

                tokio::time::sleep(inner.clear_grace).await;
                if inner.generation.load(Ordering::SeqCst) == generation {
                    debug!("Status message cleared");
                    inner.tx.send_replace(None);
                }
            }));
        }
    }

    /// Remove the current message and cancel its timers.
    pub fn clear(&self) {
        let mut timer = self.lock_timer();
        if let Some(pending) = timer.take() {
            pending.abort();
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.tx.send_replace(None);
    }

    pub fn current(&self) -> Option<StatusView> {
        self.inner.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<StatusView>> {
        self.inner.tx.subscribe()
    }

    fn lock_timer(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_DISMISS_DELAY_MS),
            Duration::from_millis(DEFAULT_CLEAR_GRACE_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visible_text(channel: &StatusChannel) -> Option<(String, bool)> {
        channel
            .current()
            .map(|view| (view.message.text.clone(), view.visible))
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_dismiss_hides_then_clears() {
        let channel = StatusChannel::default();
        channel.publish(StatusMessage::success("done").auto_hide());

        tokio::time::sleep(Duration::from_millis(4990)).await;
        assert_eq!(visible_text(&channel), Some(("done".to_string(), true)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(visible_text(&channel), Some(("done".to_string(), false)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(channel.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_message_stays() {
        let channel = StatusChannel::default();
        channel.publish(StatusMessage::info("Please approve the transaction"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            visible_text(&channel),
            Some(("Please approve the transaction".to_string(), true))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_republish_keeps_only_latest_timer() {
        let channel = StatusChannel::default();
        channel.publish(StatusMessage::info("first").auto_hide());

        tokio::time::sleep(Duration::from_millis(3000)).await;
        channel.publish(StatusMessage::info("second").auto_hide());

        // Past the first message's deadline
        tokio::time::sleep(Duration::from_millis(2600)).await;
        assert_eq!(visible_text(&channel), Some(("second".to_string(), true)));

        // Past the second message's deadline
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(visible_text(&channel), Some(("second".to_string(), false)));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(channel.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_pending_timer() {
        let channel = StatusChannel::default();
        let mut rx = channel.subscribe();
        channel.publish(StatusMessage::error("All mints failed!").auto_hide());
        channel.clear();
        assert!(channel.current().is_none());

        channel.publish(StatusMessage::info("next"));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(visible_text(&channel), Some(("next".to_string(), true)));
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_progress_is_clamped() {
        let message = StatusMessage::info("x").with_progress(1.5);
        assert_eq!(message.progress, Some(1.0));
    }
}
