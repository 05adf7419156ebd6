//! Alert timeline collaborator.
//!
//! Appends are fire-and-forget: the coordinator enqueues an entry and moves
//! on, a background worker delivers it with a short timeout and a couple of
//! retries, and delivery failures are only logged.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{TimelineKind, TimelineSection};

/// Entries buffered before new ones are dropped.
const QUEUE_CAPACITY: usize = 1024;
const DELIVERY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(200);

#[async_trait]
pub trait TimelineAppender: Send + Sync {
    async fn append_event(&self, alert_id: &str, event_type: &str, payload: &Value) -> Result<()>;
}

/// Writes timeline entries to the structured log.
pub struct LogTimeline;

#[async_trait]
impl TimelineAppender for LogTimeline {
    async fn append_event(&self, alert_id: &str, event_type: &str, payload: &Value) -> Result<()> {
        info!(target: "alertflow::timeline", alert_id, event_type, %payload, "timeline event");
        Ok(())
    }
}

#[derive(Serialize)]
struct TimelineBody<'a> {
    event_type: &'a str,
    payload: &'a Value,
}

/// Posts entries to `{endpoint}/alerts/{id}/timeline`.
pub struct HttpTimeline {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTimeline {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("alertflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for timeline")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TimelineAppender for HttpTimeline {
    async fn append_event(&self, alert_id: &str, event_type: &str, payload: &Value) -> Result<()> {
        let url = format!("{}/alerts/{}/timeline", self.endpoint, alert_id);
        let resp = self
            .client
            .post(&url)
            .json(&TimelineBody { event_type, payload })
            .send()
            .await
            .with_context(|| format!("Failed to reach timeline at {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("Timeline rejected {event_type} for {alert_id}: HTTP {status}");
        }
        Ok(())
    }
}

/// Build the configured appender.
pub fn from_config(section: &TimelineSection) -> Result<Arc<dyn TimelineAppender>> {
    match (section.kind, section.endpoint.as_deref()) {
        (TimelineKind::Http, Some(endpoint)) => Ok(Arc::new(HttpTimeline::new(endpoint)?)),
        (TimelineKind::Http, None) => anyhow::bail!("timeline.kind = \"http\" requires timeline.endpoint"),
        (TimelineKind::Log, _) => Ok(Arc::new(LogTimeline)),
    }
}

#[derive(Debug)]
struct TimelineEntry {
    alert_id: String,
    event_type: String,
    payload: Value,
}

/// Queue in front of an appender, drained by a background task.
#[derive(Clone)]
pub struct QueuedTimeline {
    tx: mpsc::Sender<TimelineEntry>,
}

impl QueuedTimeline {
    /// Start the delivery worker on the current tokio runtime.
    pub fn start(inner: Arc<dyn TimelineAppender>, timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<TimelineEntry>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                deliver(inner.as_ref(), &entry, timeout).await;
            }
            debug!("timeline queue closed");
        });
        Self { tx }
    }

    /// Enqueue an entry without waiting. A full queue drops the entry.
    pub fn enqueue(&self, alert_id: &str, event_type: &str, payload: Value) {
        let entry = TimelineEntry {
            alert_id: alert_id.to_string(),
            event_type: event_type.to_string(),
            payload,
        };
        if let Err(e) = self.tx.try_send(entry) {
            warn!(alert_id, event_type, error = %e, "timeline entry dropped");
        }
    }
}

async fn deliver(appender: &dyn TimelineAppender, entry: &TimelineEntry, timeout: Duration) {
    for attempt in 1..=DELIVERY_ATTEMPTS {
        let call = appender.append_event(&entry.alert_id, &entry.event_type, &entry.payload);
        let error = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no response within {}ms", timeout.as_millis()),
        };
        if attempt == DELIVERY_ATTEMPTS {
            warn!(
                alert_id = %entry.alert_id,
                event_type = %entry.event_type,
                error = %error,
                "timeline append failed, giving up"
            );
        } else {
            debug!(alert_id = %entry.alert_id, attempt, error = %error, "timeline append failed, retrying");
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
}
