//! Kubernetes events emitted while reconciling.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Progress worth surfacing.
    Normal,
    /// Something the user has to act on.
    Warning,
}

/// Event attached to an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Severity.
    pub kind: EventKind,
    /// Short CamelCase reason.
    pub reason: String,
    /// Human-readable message.
    pub note: String,
}

impl EventRecord {
    /// Creates a normal event.
    pub fn normal(reason: &str, note: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Normal,
            reason: reason.to_string(),
            note: note.into(),
        }
    }

    /// Creates a warning event.
    pub fn warning(reason: &str, note: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Warning,
            reason: reason.to_string(),
            note: note.into(),
        }
    }
}

/// Publishes events. Publishing never fails a reconcile.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Attaches `event` to the referenced object.
    async fn record(&self, reference: ObjectReference, event: EventRecord);
}

/// [`EventRecorder`] using the kube-runtime events API.
#[derive(Clone)]
pub struct KubeEvents {
    recorder: Recorder,
}

impl KubeEvents {
    /// Creates a recorder reporting as `controller`.
    pub fn new(client: kube::Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEvents {
    async fn record(&self, reference: ObjectReference, event: EventRecord) {
        let name = reference.name.clone().unwrap_or_default();
        let ev = Event {
            type_: match event.kind {
                EventKind::Normal => EventType::Normal,
                EventKind::Warning => EventType::Warning,
            },
            reason: event.reason.clone(),
            note: Some(event.note),
            action: "Reconcile".to_string(),
            secondary: None,
        };

        if let Err(e) = self.recorder.publish(&ev, &reference).await {
            tracing::warn!(
                name = %name,
                reason = %event.reason,
                error = %e,
                "Failed to publish event"
            );
        }
    }
}
