//! Upload progress events and the event bus that distributes them.
//!
//! The batch coordinator emits a [`ProgressEvent`] for every scheduling and
//! completion step. Each event is wrapped in a [`JobEvent`] carrying the
//! external job id, so a single bus can serve every running job and each
//! SSE stream filters for its own job.
//!
//! ## Wire Format (SSE)
//!
//! ```text
//! event: file_complete
//! data: {"event_id":"...","job_id":"upload_...","occurred_at":"...","payload":{"type":"file_complete",...}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::upload_job::UploadJobStatus;

// ============================================================================
// Progress events
// ============================================================================

/// One step of a batch, serialized with a snake_case `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A file was scheduled onto a worker slot.
    FileStart {
        file: String,
        index: usize,
        total: usize,
    },
    /// A file finished and its document is `completed`.
    FileComplete {
        file: String,
        index: usize,
        document_id: Uuid,
        chunks_stored: usize,
        chunks_failed: usize,
        duration_ms: u64,
    },
    /// A file failed; its document (if created) is `failed`.
    FileError {
        file: String,
        index: usize,
        error: String,
        duration_ms: u64,
    },
    /// Running counters after a completion.
    BatchProgress {
        processed: usize,
        total: usize,
        successful: usize,
        failed: usize,
        percentage: f64,
        avg_processing_ms: u64,
    },
    /// The batch reached a terminal status.
    BatchComplete {
        status: UploadJobStatus,
        processed: usize,
        successful: usize,
        failed: usize,
        total: usize,
    },
}

impl ProgressEvent {
    /// Event name used as the SSE `event:` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::FileStart { .. } => "file_start",
            ProgressEvent::FileComplete { .. } => "file_complete",
            ProgressEvent::FileError { .. } => "file_error",
            ProgressEvent::BatchProgress { .. } => "batch_progress",
            ProgressEvent::BatchComplete { .. } => "batch_complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::BatchComplete { .. })
    }
}

/// A progress event scoped to one upload job.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    /// UUIDv7, so events sort by emission time.
    pub event_id: Uuid,
    pub job_id: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: ProgressEvent,
}

impl JobEvent {
    pub fn new(job_id: impl Into<String>, payload: ProgressEvent) -> Self {
        Self {
            event_id: crate::ids::new_v7(),
            job_id: job_id.into(),
            occurred_at: Utc::now(),
            payload,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus for upload progress.
///
/// Uses `tokio::sync::broadcast` with a configurable buffer size. Slow
/// receivers that fall behind get a `Lagged` error and miss events; the SSE
/// handler recovers by re-reading the job row.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event for `job_id`. Dropped silently when nobody listens.
    pub fn emit(&self, job_id: &str, event: ProgressEvent) {
        let event = JobEvent::new(job_id, event);
        tracing::trace!(
            job_id = %event.job_id,
            event_type = event.payload.event_type(),
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to every job's events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();

        bus.emit(
            "upload_1_aaaaaaaa",
            ProgressEvent::FileStart {
                file: "a.txt".to_string(),
                index: 0,
                total: 2,
            },
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, "upload_1_aaaaaaaa");
        assert_eq!(event.payload.event_type(), "file_start");
        assert_eq!(event.event_id.get_version_num(), 7);
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(32);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(
            "job",
            ProgressEvent::BatchComplete {
                status: UploadJobStatus::Completed,
                processed: 1,
                successful: 1,
                failed: 0,
                total: 1,
            },
        );

        assert!(rx1.recv().await.unwrap().payload.is_terminal());
        assert!(rx2.recv().await.unwrap().payload.is_terminal());
    }

    #[test]
    fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::new(4);
        bus.emit(
            "job",
            ProgressEvent::FileError {
                file: "x".to_string(),
                index: 0,
                error: "boom".to_string(),
                duration_ms: 1,
            },
        );
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_lag() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.emit(
                "job",
                ProgressEvent::FileStart {
                    file: format!("{}.txt", i),
                    index: i,
                    total: 5,
                },
            );
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_progress_event_json_shape() {
        let event = ProgressEvent::BatchProgress {
            processed: 3,
            total: 10,
            successful: 2,
            failed: 1,
            percentage: 30.0,
            avg_processing_ms: 120,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "batch_progress");
        assert_eq!(json["processed"], 3);
        assert_eq!(json["percentage"], 30.0);

        let event = ProgressEvent::BatchComplete {
            status: UploadJobStatus::Failed,
            processed: 10,
            successful: 9,
            failed: 1,
            total: 10,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "batch_complete");
        assert_eq!(json["status"], "failed");
    }

    #[test]
    fn test_job_event_envelope_serialization() {
        let event = JobEvent::new(
            "upload_9_12345678",
            ProgressEvent::FileComplete {
                file: "docs/a.md".to_string(),
                index: 4,
                document_id: Uuid::nil(),
                chunks_stored: 3,
                chunks_failed: 1,
                duration_ms: 42,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["job_id"], "upload_9_12345678");
        assert_eq!(json["payload"]["type"], "file_complete");
        assert_eq!(json["payload"]["chunks_failed"], 1);
        assert!(json["occurred_at"].is_string());
    }
}
