// State-change notifications for UI observers

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::session::SessionStatus;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoothEvent {
    StatusChanged { status: SessionStatus },
    ShotPending { index: usize, total: usize },
    CountdownTick { index: usize, remaining: u32 },
    Flash { index: usize },
    ShotCaptured { index: usize, total: usize },
    SessionCompleted { shots: usize },
    SessionCancelled,
    SessionFailed { message: String },
    ArtifactSaved {
        id: Uuid,
        path: String,
        template: String,
        shots: usize,
    },
    PrintStarted { copies: u32 },
    CopyPrinted { copy: u32, of: u32 },
    PrintFinished { id: Uuid, copies: u32 },
    PrintFailed {
        id: Uuid,
        completed: u32,
        message: String,
    },
    Reset,
}

/// Fan-out of booth events. Sending with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BoothEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn emit(&self, event: BoothEvent) {
        tracing::debug!(?event, "booth event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoothEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
