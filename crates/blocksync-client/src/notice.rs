//! Transient progress notices for remote work.
//!
//! Every remote create, write, fetch and refresh publishes an `InFlight`
//! notice followed by `Succeeded` or `Failed`. Delivery is best effort:
//! publishing with no subscribers is fine, and a lagging subscriber skips
//! what it missed.

use tokio::sync::broadcast;

/// Kind of remote work a notice describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeTopic {
    Create,
    Write,
    Fetch,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeState {
    InFlight,
    Succeeded,
    Failed(String),
}

impl NoticeState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NoticeState::InFlight)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub topic: NoticeTopic,
    /// Correlates the three states of one operation (a digest, draft id, or
    /// row key).
    pub key: String,
    pub state: NoticeState,
}

/// Broadcast bus of [`Notice`]s.
#[derive(Debug, Clone)]
pub struct NoticeBus {
    tx: broadcast::Sender<Notice>,
}

impl NoticeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers reached.
    pub fn publish(&self, topic: NoticeTopic, key: impl Into<String>, state: NoticeState) -> usize {
        let notice = Notice {
            topic,
            key: key.into(),
            state,
        };
        self.tx.send(notice).unwrap_or(0)
    }

    pub fn in_flight(&self, topic: NoticeTopic, key: impl Into<String>) {
        self.publish(topic, key, NoticeState::InFlight);
    }

    pub fn succeeded(&self, topic: NoticeTopic, key: impl Into<String>) {
        self.publish(topic, key, NoticeState::Succeeded);
    }

    pub fn failed(&self, topic: NoticeTopic, key: impl Into<String>, reason: impl Into<String>) {
        self.publish(topic, key, NoticeState::Failed(reason.into()));
    }

    pub fn subscribe(&self) -> NoticeReceiver {
        NoticeReceiver {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Subscriber side of a [`NoticeBus`].
pub struct NoticeReceiver {
    rx: broadcast::Receiver<Notice>,
}

impl NoticeReceiver {
    /// Next notice, waiting if necessary. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Notice> {
        loop {
            match self.rx.recv().await {
                Ok(notice) => return Some(notice),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "notice subscriber lagged behind");
                }
            }
        }
    }

    /// Next notice without waiting.
    pub fn try_recv(&mut self) -> Option<Notice> {
        loop {
            match self.rx.try_recv() {
                Ok(notice) => return Some(notice),
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Closed) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "notice subscriber lagged behind");
                }
            }
        }
    }

    /// Everything currently buffered.
    pub fn drain(&mut self) -> Vec<Notice> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl std::fmt::Debug for NoticeReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoticeReceiver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = NoticeBus::new(4);
        assert_eq!(bus.publish(NoticeTopic::Write, "d1", NoticeState::InFlight), 0);
    }

    #[test]
    fn test_three_state_sequence() {
        let bus = NoticeBus::new(8);
        let mut rx = bus.subscribe();
        bus.in_flight(NoticeTopic::Create, "[draft]x");
        bus.failed(NoticeTopic::Create, "[draft]x", "rejected");

        let got = rx.drain();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].state, NoticeState::InFlight);
        assert_eq!(got[1].state, NoticeState::Failed("rejected".into()));
        assert!(got[1].state.is_terminal());
    }

    #[test]
    fn test_lagging_subscriber_skips() {
        let bus = NoticeBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.succeeded(NoticeTopic::Fetch, format!("r{i}"));
        }
        let got = rx.drain();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].key, "r4");
    }
}
