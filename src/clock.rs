// Scheduler abstraction used by the capture session and controller

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::CaptureError;

/// Source of suspension points. The booth never reads wall-clock time, it
/// only waits, so a clock is just something that can sleep.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer wheel.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeps for `duration` unless `cancel` fires first.
pub async fn pause(
    clock: &dyn Clock,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), CaptureError> {
    if cancel.is_cancelled() {
        return Err(CaptureError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CaptureError::Cancelled),
        _ = clock.sleep(duration) => Ok(()),
    }
}
