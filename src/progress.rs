//! Per-alert progress topics with sequence numbers and bounded replay.
//!
//! Each alert has one topic. Publishing assigns the next sequence number
//! (starting at 1), appends to a bounded backlog and fans out to live
//! subscribers. A subscriber that asks for events the backlog no longer
//! holds, that names a sequence the topic never reached (a position from
//! before an abort reset the topic), or that falls behind the live buffer
//! gets [`OrchestratorError::BacklogOverflow`] and must resync from status.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use alertflow_common::{ProgressEvent, Stage, StageState};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::errors::OrchestratorError;

/// Minimum live fan-out buffer per topic.
const MIN_LIVE_BUFFER: usize = 64;

struct Topic {
    next_sequence: u64,
    backlog: VecDeque<ProgressEvent>,
    sender: broadcast::Sender<ProgressEvent>,
}

impl Topic {
    fn new(live_buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(live_buffer);
        Self {
            next_sequence: 1,
            backlog: VecDeque::new(),
            sender,
        }
    }

    fn latest_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Lowest sequence still replayable, if anything was ever published.
    fn oldest_retained(&self) -> u64 {
        self.backlog
            .front()
            .map(|e| e.sequence)
            .unwrap_or(self.next_sequence)
    }
}

pub struct ProgressChannel {
    capacity: usize,
    topics: DashMap<String, Arc<Mutex<Topic>>>,
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn topic(&self, alert_id: &str) -> Arc<Mutex<Topic>> {
        let live_buffer = self.capacity.max(MIN_LIVE_BUFFER);
        self.topics
            .entry(alert_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Topic::new(live_buffer))))
            .clone()
    }

    /// Assign the next sequence, retain and fan out.
    pub fn publish(
        &self,
        alert_id: &str,
        stage: Stage,
        state: StageState,
        payload: Option<Value>,
    ) -> ProgressEvent {
        let topic = self.topic(alert_id);
        let mut topic = topic.lock().unwrap_or_else(PoisonError::into_inner);

        let event = ProgressEvent {
            alert_id: alert_id.to_string(),
            stage,
            state,
            sequence: topic.next_sequence,
            payload,
            emitted_at: Utc::now(),
        };
        topic.next_sequence += 1;

        topic.backlog.push_back(event.clone());
        while topic.backlog.len() > self.capacity {
            topic.backlog.pop_front();
        }

        // No receivers is not an error: nobody is watching yet.
        let _ = topic.sender.send(event.clone());
        event
    }

    /// Subscribe to an alert's events.
    ///
    /// Without `from_sequence` only live events are delivered. With it,
    /// retained events after that sequence are replayed first.
    pub fn subscribe(
        &self,
        alert_id: &str,
        from_sequence: Option<u64>,
    ) -> Result<Subscription, OrchestratorError> {
        let topic = self.topic(alert_id);
        let topic = topic.lock().unwrap_or_else(PoisonError::into_inner);
        let receiver = topic.sender.subscribe();

        let (replay, last_seen) = match from_sequence {
            None => (VecDeque::new(), topic.latest_sequence()),
            Some(after) => {
                let wanted = after.saturating_add(1);
                let evicted = wanted < topic.oldest_retained() && after < topic.latest_sequence();
                if evicted || after > topic.latest_sequence() {
                    return Err(OrchestratorError::BacklogOverflow {
                        alert_id: alert_id.to_string(),
                        requested: after,
                    });
                }
                let replay = topic
                    .backlog
                    .iter()
                    .filter(|e| e.sequence > after)
                    .cloned()
                    .collect();
                (replay, after)
            }
        };

        Ok(Subscription {
            alert_id: alert_id.to_string(),
            replay,
            receiver,
            last_seen,
        })
    }

    pub fn latest_sequence(&self, alert_id: &str) -> u64 {
        self.topics
            .get(alert_id)
            .map(|t| t.lock().unwrap_or_else(PoisonError::into_inner).latest_sequence())
            .unwrap_or(0)
    }

    /// Retained events, oldest first.
    pub fn backlog(&self, alert_id: &str) -> Vec<ProgressEvent> {
        self.topics
            .get(alert_id)
            .map(|t| {
                t.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .backlog
                    .iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop an alert's topic; live subscribers see the stream end.
    pub fn remove(&self, alert_id: &str) {
        self.topics.remove(alert_id);
    }
}

/// A de-duplicating event stream for one alert.
pub struct Subscription {
    alert_id: String,
    replay: VecDeque<ProgressEvent>,
    receiver: broadcast::Receiver<ProgressEvent>,
    last_seen: u64,
}

impl Subscription {
    pub fn alert_id(&self) -> &str {
        &self.alert_id
    }

    /// Highest sequence delivered so far.
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Next event, `None` once the topic is gone, or an overflow error when
    /// this subscriber fell behind and must resync.
    pub async fn next(&mut self) -> Option<Result<ProgressEvent, OrchestratorError>> {
        if let Some(event) = self.replay.pop_front() {
            self.last_seen = self.last_seen.max(event.sequence);
            return Some(Ok(event));
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) if event.sequence <= self.last_seen => continue,
                Ok(event) => {
                    self.last_seen = event.sequence;
                    return Some(Ok(event));
                }
                Err(RecvError::Lagged(_)) => {
                    return Some(Err(OrchestratorError::BacklogOverflow {
                        alert_id: self.alert_id.clone(),
                        requested: self.last_seen,
                    }));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn publish_n(channel: &ProgressChannel, alert: &str, n: usize) {
        for _ in 0..n {
            channel.publish(alert, Stage::Classification, StageState::Running, None);
        }
    }

    async fn next_event(sub: &mut Subscription) -> ProgressEvent {
        tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("overflow")
    }

    #[test]
    fn test_sequences_start_at_one_per_alert() {
        let channel = ProgressChannel::new(50);
        let a1 = channel.publish("A1", Stage::Classification, StageState::Running, None);
        let a2 = channel.publish("A1", Stage::Classification, StageState::Succeeded, None);
        let b1 = channel.publish("B", Stage::DeepAnalysis, StageState::Running, None);
        assert_eq!(a1.sequence, 1);
        assert_eq!(a2.sequence, 2);
        assert_eq!(b1.sequence, 1);
        assert_eq!(channel.latest_sequence("A1"), 2);
        assert_eq!(channel.latest_sequence("missing"), 0);
    }

    #[test]
    fn test_backlog_is_bounded() {
        let channel = ProgressChannel::new(3);
        publish_n(&channel, "A1", 5);
        let seqs: Vec<u64> = channel.backlog("A1").iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_replay_then_live() {
        let channel = ProgressChannel::new(50);
        publish_n(&channel, "A1", 3);

        let mut sub = channel.subscribe("A1", Some(1)).unwrap();
        assert_eq!(next_event(&mut sub).await.sequence, 2);
        assert_eq!(next_event(&mut sub).await.sequence, 3);

        channel.publish("A1", Stage::DeepAnalysis, StageState::Running, None);
        assert_eq!(next_event(&mut sub).await.sequence, 4);
    }

    #[tokio::test]
    async fn test_live_only_skips_history() {
        let channel = ProgressChannel::new(50);
        publish_n(&channel, "A1", 3);
        let mut sub = channel.subscribe("A1", None).unwrap();
        channel.publish("A1", Stage::DeepAnalysis, StageState::Running, None);
        assert_eq!(next_event(&mut sub).await.sequence, 4);
    }

    #[tokio::test]
    async fn test_replayed_events_are_not_delivered_twice() {
        let channel = ProgressChannel::new(50);
        publish_n(&channel, "A1", 2);
        let mut sub = channel.subscribe("A1", Some(0)).unwrap();
        channel.publish("A1", Stage::DeepAnalysis, StageState::Running, None);

        let seqs = vec![
            next_event(&mut sub).await.sequence,
            next_event(&mut sub).await.sequence,
            next_event(&mut sub).await.sequence,
        ];
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_evicted_sequence_requires_resync() {
        let channel = ProgressChannel::new(3);
        publish_n(&channel, "A1", 10);

        let err = channel.subscribe("A1", Some(2)).err().unwrap();
        assert!(matches!(err, OrchestratorError::BacklogOverflow { requested: 2, .. }));

        // 7 is the last evicted sequence; everything after it is retained.
        assert!(channel.subscribe("A1", Some(7)).is_ok());
        assert!(channel.subscribe("A1", Some(10)).is_ok());
    }

    #[tokio::test]
    async fn test_sequence_ahead_of_topic_requires_resync() {
        let channel = ProgressChannel::new(50);
        publish_n(&channel, "A1", 1);

        let err = channel.subscribe("A1", Some(40)).err().unwrap();
        assert!(matches!(err, OrchestratorError::BacklogOverflow { requested: 40, .. }));

        // Same position after the topic was dropped and restarted.
        publish_n(&channel, "A1", 4);
        channel.remove("A1");
        publish_n(&channel, "A1", 1);
        assert!(channel.subscribe("A1", Some(5)).is_err());

        let mut sub = channel.subscribe("A1", Some(1)).unwrap();
        publish_n(&channel, "A1", 5);
        assert_eq!(next_event(&mut sub).await.sequence, 2);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_told_to_resync() {
        let channel = ProgressChannel::new(1);
        let mut sub = channel.subscribe("A1", None).unwrap();
        publish_n(&channel, "A1", MIN_LIVE_BUFFER + 10);

        let result = sub.next().await.expect("stream ended");
        assert!(matches!(result, Err(OrchestratorError::BacklogOverflow { .. })));
    }

    #[tokio::test]
    async fn test_remove_ends_stream() {
        let channel = ProgressChannel::new(50);
        let mut sub = channel.subscribe("A1", None).unwrap();
        channel.remove("A1");
        let ended = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap();
        assert!(ended.is_none());
    }
}
