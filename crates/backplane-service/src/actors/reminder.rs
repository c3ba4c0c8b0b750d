//! Liveness reminder for a coordinator.
//!
//! The reminder is a background task that pushes
//! [`CoordinatorMessage::LivenessTick`] into the coordinator's mailbox once per
//! period. Ticks go through the mailbox like any other message, so a sweep
//! never runs concurrently with a subscribe or a fan-out.

use super::messages::CoordinatorMessage;

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A running reminder. Stopped by [`cancel`](Self::cancel) or when dropped.
pub struct Reminder {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl Reminder {
    /// Start ticking `mailbox` every `period`. The first tick fires one period
    /// from now.
    pub fn start(
        entity: String,
        period: Duration,
        mailbox: mpsc::WeakSender<CoordinatorMessage>,
        cancel_token: CancellationToken,
    ) -> Self {
        let token = cancel_token.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    () = token.cancelled() => {
                        trace!(
                            target: "backplane.actor.coordinator",
                            entity = %entity,
                            "Reminder cancelled"
                        );
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(sender) = mailbox.upgrade() else {
                            break;
                        };
                        match sender.try_send(CoordinatorMessage::LivenessTick) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                debug!(
                                    target: "backplane.actor.coordinator",
                                    entity = %entity,
                                    "Mailbox full, skipping liveness tick"
                                );
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
        });

        Self { cancel_token, task }
    }

    /// Stop the reminder.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.cancel_token.is_cancelled() && !self.task.is_finished()
    }
}

impl Drop for Reminder {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_period() {
        let (tx, mut rx) = mpsc::channel(8);
        let reminder = Reminder::start(
            "chat/group/g1".to_string(),
            Duration::from_secs(60),
            tx.downgrade(),
            CancellationToken::new(),
        );

        tokio::time::advance(Duration::from_secs(59)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err(), "no tick before the first period");

        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(matches!(rx.try_recv(), Ok(CoordinatorMessage::LivenessTick)));

        reminder.cancel();
        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err(), "no tick after cancel");
        assert!(!reminder.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_mailbox_dropped() {
        let (tx, rx) = mpsc::channel::<CoordinatorMessage>(8);
        let reminder = Reminder::start(
            "chat/user/u1".to_string(),
            Duration::from_secs(1),
            tx.downgrade(),
            CancellationToken::new(),
        );
        drop(tx);
        drop(rx);

        tokio::time::advance(Duration::from_secs(2)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(!reminder.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_reminder_stops_ticks() {
        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let reminder = Reminder::start(
            "chat/connection/c1".to_string(),
            Duration::from_secs(1),
            tx.downgrade(),
            token.clone(),
        );
        drop(reminder);
        assert!(token.is_cancelled());

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err(), "no tick after drop");
    }
}
