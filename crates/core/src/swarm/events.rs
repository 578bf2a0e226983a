//! # Swarm Events
//!
//! Progress events streamed by the pipeline, scheduler and coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Kind of swarm event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SwarmEventKind {
    // === Execution pipeline ===
    PipelineStarted,
    AttemptStarted,
    /// Served from cache, no handler ran
    CacheHit,
    /// Guardrail or risk policy refused the instruction
    Blocked,
    CheckpointCreated,
    /// Critic rejected, looping back with feedback
    CriticRejected,
    AttemptFailed,
    PipelineCompleted,
    PipelineFailed,
    // === Task scheduler ===
    WaveStarted,
    TaskCompleted,
    TaskFailed,
    // === Swarm coordinator ===
    AgentStarted,
    AgentCompleted,
    AgentFailed,
    /// Completion marker seen, remaining sequential tasks skipped
    ShortPathway,
    /// Diagnostic task sent to the debug handler
    RecoveryDispatched,
    ManualInterventionRequired,
}

/// An event in the swarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmEvent {
    /// Unique event ID
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: SwarmEventKind,
    /// Handler or component that produced this event
    pub agent: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl SwarmEvent {
    pub fn new(kind: SwarmEventKind, agent: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            agent: agent.to_string(),
            data: None,
        }
    }

    /// Add data to the event
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Optional event channel; emitting without a receiver is a no-op
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<SwarmEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<SwarmEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn emit(&self, event: SwarmEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = SwarmEvent::new(SwarmEventKind::AgentStarted, "writer")
            .with_data(serde_json::json!({ "task": "t1" }));

        assert_eq!(event.agent, "writer");
        assert_eq!(event.data.unwrap()["task"], "t1");
    }

    #[test]
    fn test_sink_delivers_and_tolerates_closed_channel() {
        tokio_test::block_on(async {
            let (tx, mut rx) = mpsc::channel(4);
            let sink = EventSink::new(tx);
            sink.emit(SwarmEvent::new(SwarmEventKind::CacheHit, "pipeline"))
                .await;
            assert_eq!(rx.recv().await.unwrap().kind, SwarmEventKind::CacheHit);

            drop(rx);
            sink.emit(SwarmEvent::new(SwarmEventKind::CacheHit, "pipeline"))
                .await;
            EventSink::disabled()
                .emit(SwarmEvent::new(SwarmEventKind::Blocked, "pipeline"))
                .await;
        });
    }
}
