//! Run events for observability.
//!
//! The executor emits [`PipelineEvent`]s on a [`tokio::sync::broadcast`]
//! channel. Observers (the CLI, progress displays, tests) subscribe without
//! touching engine internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use radflow_types::ProcStatus;

use crate::engine::RunPhase;

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        run_name: String,
        stage_count: usize,
    },
    PhaseChanged {
        phase: RunPhase,
    },
    StageInvoked {
        stage: String,
        status: ProcStatus,
        timestamp: Option<DateTime<Utc>>,
        produced: bool,
    },
    StageFailed {
        stage: String,
        status: ProcStatus,
        error: String,
    },
    FieldsMerged {
        stage: String,
        fields: Vec<String>,
    },
    ProductRendered {
        stage: String,
        product: String,
        path: Option<String>,
    },
    ProductSkipped {
        stage: String,
        product: String,
        reason: String,
    },
    StepSkipped {
        timestamp: DateTime<Utc>,
        locator: String,
        reason: String,
    },
    RunCompleted {
        run_id: String,
        steps_processed: usize,
        steps_skipped: usize,
        duration_ms: u64,
    },
    RunFailed {
        run_id: String,
        error: String,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers. Dropped when nobody listens.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(1024)
    }
}
