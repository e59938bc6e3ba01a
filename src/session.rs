// Multi-shot capture session state machine

use futures::{Stream, StreamExt};
use image::DynamicImage;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::camera::FrameSource;
use crate::clock::{pause, Clock};
use crate::config::{CameraConfig, SessionConfig};
use crate::errors::CaptureError;
use crate::events::{BoothEvent, EventBus};

/// Shots taken by a strip session.
pub const STRIP_SHOTS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    CountingDown,
    Capturing,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::CountingDown | SessionStatus::Capturing)
    }
}

/// UI pacing between the steps of a shot.
#[derive(Debug, Clone)]
pub struct Pacing {
    /// Lets progress indicators render before each countdown.
    pub pre_shot_delay: Duration,
    /// Pause after each capture so the flash and progress are visible.
    pub settle_delay: Duration,
    pub tick: Duration,
    pub capture_timeout: Option<Duration>,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            pre_shot_delay: Duration::from_millis(1500),
            settle_delay: Duration::from_millis(500),
            tick: Duration::from_secs(1),
            capture_timeout: None,
        }
    }
}

impl Pacing {
    pub fn from_config(session: &SessionConfig, camera: &CameraConfig) -> Self {
        Self {
            pre_shot_delay: session.pre_shot_delay,
            settle_delay: session.settle_delay,
            tick: Duration::from_secs(1),
            capture_timeout: camera.capture_timeout,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SessionState {
    status: SessionStatus,
    required_shots: usize,
    current_index: usize,
    captured: Vec<DynamicImage>,
    timer_seconds: u32,
    /// Bumped on every start and reset so a superseded run cannot touch
    /// the state of its successor.
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub required_shots: usize,
    pub current_index: usize,
    pub captured: usize,
    pub timer_seconds: u32,
}

/// A claimed session waiting to be run with [`CaptureSession::run`].
#[must_use]
#[derive(Debug)]
pub struct Reservation {
    generation: u64,
    cancel: CancellationToken,
    timer_seconds: u32,
    required_shots: usize,
}

struct Inner {
    state: SessionState,
    cancel: CancellationToken,
}

pub struct CaptureSession {
    source: Arc<dyn FrameSource>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    pacing: Pacing,
    inner: Mutex<Inner>,
}

impl CaptureSession {
    pub fn new(
        source: Arc<dyn FrameSource>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        pacing: Pacing,
    ) -> Self {
        Self {
            source,
            clock,
            events,
            pacing,
            inner: Mutex::new(Inner {
                state: SessionState::default(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().state.status
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            status: inner.state.status,
            required_shots: inner.state.required_shots,
            current_index: inner.state.current_index,
            captured: inner.state.captured.len(),
            timer_seconds: inner.state.timer_seconds,
        }
    }

    /// Runs a full session and returns the frames in capture order.
    ///
    /// Rejected with `AlreadyRunning` while another session is counting down
    /// or capturing. A session that already completed or was cancelled is
    /// reset implicitly. Resolves with `Cancelled` if [`cancel`](Self::cancel)
    /// is called before the last frame is handed over; captured frames are
    /// discarded in that case.
    pub async fn start(
        &self,
        timer_seconds: u32,
        required_shots: usize,
    ) -> Result<Vec<DynamicImage>, CaptureError> {
        let reservation = self.reserve(timer_seconds, required_shots)?;
        self.run(reservation).await
    }

    /// Claims the session without suspending: once this returns, any other
    /// start or reserve is rejected with `AlreadyRunning` until the
    /// reservation is run to completion or cancelled.
    pub fn reserve(
        &self,
        timer_seconds: u32,
        required_shots: usize,
    ) -> Result<Reservation, CaptureError> {
        let mut inner = self.lock();
        if inner.state.status.is_active() {
            warn!("Rejecting start: session is {:?}", inner.state.status);
            return Err(CaptureError::AlreadyRunning);
        }

        let generation = inner.state.generation + 1;
        let cancel = CancellationToken::new();
        inner.cancel = cancel.clone();
        inner.state = SessionState {
            status: SessionStatus::CountingDown,
            required_shots,
            current_index: 0,
            captured: Vec::with_capacity(required_shots),
            timer_seconds,
            generation,
        };
        drop(inner);

        info!(
            "Capture session started: {} shots, {}s timer",
            required_shots, timer_seconds
        );
        self.events.emit(BoothEvent::StatusChanged {
            status: SessionStatus::CountingDown,
        });
        Ok(Reservation {
            generation,
            cancel,
            timer_seconds,
            required_shots,
        })
    }

    /// Drives a reserved session through its shots.
    pub async fn run(&self, reservation: Reservation) -> Result<Vec<DynamicImage>, CaptureError> {
        let Reservation {
            generation,
            cancel,
            timer_seconds,
            required_shots,
        } = reservation;

        let result = self
            .run_shots(generation, &cancel, timer_seconds, required_shots)
            .await;
        self.finish(generation, &cancel, result)
    }

    async fn run_shots(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        timer_seconds: u32,
        required_shots: usize,
    ) -> Result<(), CaptureError> {
        for index in 0..required_shots {
            self.transition(generation, cancel, SessionStatus::CountingDown)?;
            self.events.emit(BoothEvent::ShotPending {
                index,
                total: required_shots,
            });
            pause(self.clock.as_ref(), self.pacing.pre_shot_delay, cancel).await?;

            if timer_seconds > 0 {
                let ticks = countdown(
                    self.clock.clone(),
                    timer_seconds,
                    self.pacing.tick,
                    cancel.clone(),
                );
                futures::pin_mut!(ticks);
                while let Some(remaining) = ticks.next().await {
                    let remaining = remaining?;
                    debug!("Shot {} in {}", index + 1, remaining);
                    self.events
                        .emit(BoothEvent::CountdownTick { index, remaining });
                }
            }

            self.transition(generation, cancel, SessionStatus::Capturing)?;
            let frame = self.fetch_frame(cancel).await?;
            self.append_frame(generation, cancel, frame)?;
            info!("Captured shot {}/{}", index + 1, required_shots);

            self.events.emit(BoothEvent::Flash { index });
            self.events.emit(BoothEvent::ShotCaptured {
                index,
                total: required_shots,
            });
            pause(self.clock.as_ref(), self.pacing.settle_delay, cancel).await?;
        }
        Ok(())
    }

    async fn fetch_frame(&self, cancel: &CancellationToken) -> Result<DynamicImage, CaptureError> {
        let fetch = async {
            match self.pacing.capture_timeout {
                Some(limit) => tokio::select! {
                    biased;
                    frame = self.source.capture_frame() => frame,
                    _ = self.clock.sleep(limit) => Err(CaptureError::Timeout(limit)),
                },
                None => self.source.capture_frame().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CaptureError::Cancelled),
            frame = fetch => frame,
        }
    }

    fn transition(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        status: SessionStatus,
    ) -> Result<(), CaptureError> {
        let mut inner = self.lock();
        if inner.state.generation != generation || cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }
        if inner.state.status == status {
            return Ok(());
        }
        inner.state.status = status;
        drop(inner);

        self.events.emit(BoothEvent::StatusChanged { status });
        Ok(())
    }

    fn append_frame(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        frame: DynamicImage,
    ) -> Result<(), CaptureError> {
        // cancel() flips the token under this lock, so a cancelled session
        // never gains a frame here.
        let mut inner = self.lock();
        if inner.state.generation != generation || cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }
        inner.state.captured.push(frame);
        inner.state.current_index += 1;
        Ok(())
    }

    fn finish(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        result: Result<(), CaptureError>,
    ) -> Result<Vec<DynamicImage>, CaptureError> {
        let mut inner = self.lock();
        let current = inner.state.generation == generation;

        match result {
            Ok(()) if current && !cancel.is_cancelled() => {
                inner.state.status = SessionStatus::Completed;
                let frames = std::mem::take(&mut inner.state.captured);
                drop(inner);

                info!("Capture session completed with {} frames", frames.len());
                self.events.emit(BoothEvent::StatusChanged {
                    status: SessionStatus::Completed,
                });
                self.events
                    .emit(BoothEvent::SessionCompleted { shots: frames.len() });
                Ok(frames)
            }
            Ok(()) | Err(CaptureError::Cancelled) => {
                if current {
                    inner.state.captured.clear();
                    inner.state.status = SessionStatus::Cancelled;
                }
                debug!("Capture session unwound after cancellation");
                Err(CaptureError::Cancelled)
            }
            Err(e) => {
                if current {
                    inner.state.captured.clear();
                    inner.state.current_index = 0;
                    inner.state.status = SessionStatus::Idle;
                }
                drop(inner);

                warn!("Capture session failed: {}", e);
                self.events.emit(BoothEvent::SessionFailed {
                    message: e.to_string(),
                });
                self.events.emit(BoothEvent::StatusChanged {
                    status: SessionStatus::Idle,
                });
                Err(e)
            }
        }
    }

    /// Cancels the active session. Returns `false` when there was nothing to
    /// cancel (idle, completed, or already cancelled).
    pub fn cancel(&self) -> bool {
        let mut inner = self.lock();
        if !inner.state.status.is_active() {
            return false;
        }

        inner.cancel.cancel();
        inner.state.captured.clear();
        inner.state.status = SessionStatus::Cancelled;
        drop(inner);

        info!("Capture session cancelled");
        self.events.emit(BoothEvent::SessionCancelled);
        self.events.emit(BoothEvent::StatusChanged {
            status: SessionStatus::Cancelled,
        });
        true
    }

    /// Returns to `Idle`, cancelling any active session first.
    pub fn reset(&self) {
        self.cancel();

        let mut inner = self.lock();
        let generation = inner.state.generation + 1;
        inner.state = SessionState {
            generation,
            ..SessionState::default()
        };
        drop(inner);

        self.events.emit(BoothEvent::StatusChanged {
            status: SessionStatus::Idle,
        });
    }
}

/// Lazy per-second countdown yielding `seconds, seconds - 1, ..., 1`, one
/// item per tick. Ends one tick after the last item, or yields `Cancelled`
/// and stops if the token fires first.
pub fn countdown(
    clock: Arc<dyn Clock>,
    seconds: u32,
    tick: Duration,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<u32, CaptureError>> {
    async_stream::try_stream! {
        for remaining in (1..=seconds).rev() {
            yield remaining;
            pause(clock.as_ref(), tick, &cancel).await?;
        }
    }
}
