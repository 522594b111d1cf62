//! Notification Fan-out
//!
//! Topic-addressed delivery of server messages. Every match has its own
//! topic; the tournament shares one. Subscribers that fall behind skip the
//! messages they missed instead of stalling publishers.

use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::game::state::MatchId;
use crate::network::protocol::ServerMessage;

/// Per-topic channel depth. Snapshots are stale after a few ticks anyway.
const TOPIC_CAPACITY: usize = 64;

/// A delivery address.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
    /// Everyone bound to one match.
    Match(MatchId),
    /// Everyone watching the tournament.
    Tournament,
}

/// Sink for topic-addressed messages.
pub trait Notifier: Send + Sync {
    /// Deliver `message` to every current subscriber of `topic`.
    /// Returns the number of subscribers reached.
    fn publish(&self, topic: &Topic, message: ServerMessage) -> usize;

    /// Subscribe to `topic`, creating it on first use.
    fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<ServerMessage>;

    /// Drop a topic. Current subscribers observe the end of their stream.
    fn close(&self, topic: &Topic);
}

/// In-process fan-out backed by one broadcast channel per topic.
#[derive(Default)]
pub struct TopicHub {
    topics: Mutex<BTreeMap<Topic, broadcast::Sender<ServerMessage>>>,
}

impl TopicHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live topics.
    pub fn topic_count(&self) -> usize {
        self.topics.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Notifier for TopicHub {
    fn publish(&self, topic: &Topic, message: ServerMessage) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        match topics.get(topic) {
            // Err only means nobody is listening right now.
            Some(sender) => sender.send(message).unwrap_or(0),
            None => 0,
        }
    }

    fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<ServerMessage> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    fn close(&self, topic: &Topic) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if topics.remove(topic).is_some() {
            debug!("Closed topic {:?}", topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn test_publish_reaches_only_topic_subscribers() {
        let hub = TopicHub::new();
        let a = Topic::Match(MatchId::from("a"));
        let b = Topic::Match(MatchId::from("b"));

        let mut rx_a = hub.subscribe(&a);
        let mut rx_b = hub.subscribe(&b);

        assert_eq!(hub.publish(&a, ServerMessage::CountdownEnd), 1);

        assert!(matches!(rx_a.recv().await, Ok(ServerMessage::CountdownEnd)));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = TopicHub::new();
        assert_eq!(hub.publish(&Topic::Tournament, ServerMessage::CountdownEnd), 0);
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let hub = TopicHub::new();
        let topic = Topic::Match(MatchId::from("gone"));
        let mut rx = hub.subscribe(&topic);

        hub.close(&topic);
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert_eq!(hub.topic_count(), 0);
    }
}
