// Session Controller: capture -> compose -> store -> print

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::camera::{CameraDescriptor, FrameSource};
use crate::clock::Clock;
use crate::compositor::{ComposedArtifact, Compositor};
use crate::config::{Config, MAX_PRINT_COPIES, MAX_TIMER_SECONDS};
use crate::errors::{BoothError, BoothResult, CaptureError, ComposeError, ConfigError, PrinterError};
use crate::events::{BoothEvent, EventBus};
use crate::printers::{PaperSize, PrintJob, PrintQuality, PrinterDescriptor, PrinterService};
use crate::session::{
    CaptureSession, Pacing, Reservation, SessionSnapshot, SessionStatus, STRIP_SHOTS,
};
use crate::storage::{ArtifactKind, ArtifactStore};
use crate::templates::{TemplateSource, CLASSIC_STRIP};

/// Operator-adjustable booth behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoothSettings {
    pub timer_seconds: u32,
    pub auto_print: bool,
    pub print_copies: u32,
    pub printer_name: Option<String>,
    pub paper_size: PaperSize,
    pub quality: PrintQuality,
    /// Device path of the active camera.
    pub camera_device: Option<String>,
}

impl Default for BoothSettings {
    fn default() -> Self {
        Self {
            timer_seconds: 3,
            auto_print: false,
            print_copies: 1,
            printer_name: None,
            paper_size: PaperSize::Photo4x6,
            quality: PrintQuality::Normal,
            camera_device: None,
        }
    }
}

impl BoothSettings {
    pub fn from_config(config: &Config, printer_name: Option<String>) -> Self {
        Self {
            timer_seconds: config.session.timer_seconds,
            auto_print: config.printer.auto_print,
            print_copies: config.printer.copies,
            printer_name,
            paper_size: config.printer.paper_size,
            quality: config.printer.quality,
            camera_device: None,
        }
    }
}

/// Partial settings change; absent fields are left alone. An empty printer
/// name clears the selection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub timer_seconds: Option<u32>,
    pub auto_print: Option<bool>,
    pub print_copies: Option<u32>,
    pub printer_name: Option<String>,
    pub paper_size: Option<PaperSize>,
    pub quality: Option<PrintQuality>,
}

#[derive(Debug)]
pub enum StripOutcome {
    Completed {
        artifact: Arc<ComposedArtifact>,
        copies_printed: u32,
    },
    /// Cancelled or retaken before an artifact was installed. Not an error.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Strip,
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleOutcome {
    Started,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    pub id: Uuid,
    pub path: Option<String>,
    pub template: String,
    pub width: u32,
    pub height: u32,
    pub shots: usize,
}

impl From<&ComposedArtifact> for ArtifactSummary {
    fn from(artifact: &ComposedArtifact) -> Self {
        let (width, height) = artifact.dimensions();
        Self {
            id: artifact.id,
            path: artifact.path.as_ref().map(|p| p.display().to_string()),
            template: artifact.template.clone(),
            width,
            height,
            shots: artifact.shots,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoothSnapshot {
    pub session: SessionSnapshot,
    pub artifact: Option<ArtifactSummary>,
    pub settings: BoothSettings,
}

/// Capabilities the controller drives.
pub struct Services {
    pub frames: Arc<dyn FrameSource>,
    pub templates: Arc<dyn TemplateSource>,
    pub store: Arc<dyn ArtifactStore>,
    pub printer: Arc<dyn PrinterService>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub strip_template: String,
    pub pacing: Pacing,
    /// Wait between saving a strip and auto-printing it.
    pub print_grace: Duration,
    pub settings: BoothSettings,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            strip_template: CLASSIC_STRIP.to_string(),
            pacing: Pacing::default(),
            print_grace: Duration::from_millis(1000),
            settings: BoothSettings::default(),
        }
    }
}

/// A claimed capture plus the retake epoch it started under.
struct ReservedRun {
    kind: SessionKind,
    epoch: u64,
    capture: Reservation,
}

pub struct SessionController {
    session: CaptureSession,
    frames: Arc<dyn FrameSource>,
    compositor: Compositor,
    templates: Arc<dyn TemplateSource>,
    store: Arc<dyn ArtifactStore>,
    printer: Arc<dyn PrinterService>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    strip_template: String,
    print_grace: Duration,
    settings: RwLock<BoothSettings>,
    current: Mutex<Option<Arc<ComposedArtifact>>>,
    /// Bumped by retake; a run that started under an older epoch never
    /// installs or prints its artifact.
    epoch: AtomicU64,
    print_lock: tokio::sync::Mutex<()>,
}

impl SessionController {
    pub fn new(
        services: Services,
        compositor: Compositor,
        events: EventBus,
        options: ControllerOptions,
    ) -> Self {
        let session = CaptureSession::new(
            services.frames.clone(),
            services.clock.clone(),
            events.clone(),
            options.pacing,
        );

        let mut settings = options.settings;
        if settings.camera_device.is_none() {
            settings.camera_device = services.frames.current_device();
        }

        Self {
            session,
            frames: services.frames,
            compositor,
            templates: services.templates,
            store: services.store,
            printer: services.printer,
            clock: services.clock,
            events,
            strip_template: options.strip_template,
            print_grace: options.print_grace,
            settings: RwLock::new(settings),
            current: Mutex::new(None),
            epoch: AtomicU64::new(0),
            print_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn current_artifact(&self) -> Option<Arc<ComposedArtifact>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn settings(&self) -> BoothSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_settings(&self, update: SettingsUpdate) -> BoothResult<BoothSettings> {
        if let Some(copies) = update.print_copies {
            if copies == 0 || copies > MAX_PRINT_COPIES {
                return Err(ConfigError::InvalidValue {
                    key: "printCopies",
                    value: copies.to_string(),
                }
                .into());
            }
        }
        if let Some(timer) = update.timer_seconds {
            if timer > MAX_TIMER_SECONDS {
                return Err(ConfigError::InvalidValue {
                    key: "timerSeconds",
                    value: timer.to_string(),
                }
                .into());
            }
        }

        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = update.timer_seconds {
            settings.timer_seconds = timer;
        }
        if let Some(auto_print) = update.auto_print {
            settings.auto_print = auto_print;
        }
        if let Some(copies) = update.print_copies {
            settings.print_copies = copies;
        }
        if let Some(name) = update.printer_name {
            let name = name.trim();
            settings.printer_name = (!name.is_empty()).then(|| name.to_string());
        }
        if let Some(paper_size) = update.paper_size {
            settings.paper_size = paper_size;
        }
        if let Some(quality) = update.quality {
            settings.quality = quality;
        }

        info!("Booth settings updated: {:?}", *settings);
        Ok(settings.clone())
    }

    pub fn snapshot(&self) -> BoothSnapshot {
        BoothSnapshot {
            session: self.session.snapshot(),
            artifact: self
                .current_artifact()
                .map(|artifact| ArtifactSummary::from(artifact.as_ref())),
            settings: self.settings(),
        }
    }

    /// Captures four shots, composes them into the strip template, saves the
    /// strip and prints it when auto-print is on.
    pub async fn run_strip_session(&self) -> BoothResult<StripOutcome> {
        let run = self.reserve(SessionKind::Strip)?;
        self.run_reserved(run).await
    }

    /// Captures one shot, keeps the raw frame and repeats it into every slot
    /// of the strip template.
    pub async fn run_single_shot_session(&self) -> BoothResult<StripOutcome> {
        let run = self.reserve(SessionKind::Single)?;
        self.run_reserved(run).await
    }

    fn reserve(&self, kind: SessionKind) -> BoothResult<ReservedRun> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let timer = self.settings().timer_seconds;
        let shots = match kind {
            SessionKind::Strip => STRIP_SHOTS,
            SessionKind::Single => 1,
        };
        let capture = self.session.reserve(timer, shots)?;
        Ok(ReservedRun {
            kind,
            epoch,
            capture,
        })
    }

    async fn run_reserved(&self, run: ReservedRun) -> BoothResult<StripOutcome> {
        let frames = match self.session.run(run.capture).await {
            Ok(frames) => frames,
            Err(CaptureError::Cancelled) => return Ok(StripOutcome::Cancelled),
            Err(e) => return Err(e.into()),
        };

        let result = match run.kind {
            SessionKind::Strip => self.complete(run.epoch, frames).await,
            SessionKind::Single => self.keep_raw_and_complete(run.epoch, frames).await,
        };
        self.settle(result)
    }

    /// Post-capture failures return the session to idle; the previous
    /// artifact, if any, stays current.
    fn settle(&self, result: BoothResult<StripOutcome>) -> BoothResult<StripOutcome> {
        if let Err(e) = &result {
            error!("Strip session failed: {}", e);
            if self.session.status() == SessionStatus::Completed {
                self.session.reset();
            }
            self.events.emit(BoothEvent::SessionFailed {
                message: e.to_string(),
            });
        }
        result
    }

    async fn keep_raw_and_complete(
        &self,
        epoch: u64,
        frames: Vec<DynamicImage>,
    ) -> BoothResult<StripOutcome> {
        if let Some(raw) = frames.first() {
            let photo = self
                .store
                .save(&raw.to_rgba8(), ArtifactKind::Capture)
                .await?;
            info!("Raw capture saved to {}", photo.display());
        }
        self.complete(epoch, frames).await
    }

    async fn complete(&self, epoch: u64, frames: Vec<DynamicImage>) -> BoothResult<StripOutcome> {
        let template = self
            .templates
            .load_template(&self.strip_template)
            .await
            .map_err(|e| BoothError::template("load template", e))?;

        let compositor = self.compositor.clone();
        let mut artifact =
            tokio::task::spawn_blocking(move || compositor.compose(&template, &frames))
                .await
                .map_err(|e| ComposeError::TaskFailed(e.to_string()))??;

        if self.superseded(epoch) {
            debug!("Discarding strip composed before retake");
            return Ok(StripOutcome::Cancelled);
        }

        let path = self.store.save(&artifact.image, ArtifactKind::Strip).await?;
        artifact.path = Some(path.clone());
        let artifact = Arc::new(artifact);

        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if self.superseded(epoch) {
                debug!("Discarding strip saved before retake");
                return Ok(StripOutcome::Cancelled);
            }
            *current = Some(artifact.clone());
        }

        info!("Strip {} saved to {}", artifact.id, path.display());
        self.events.emit(BoothEvent::ArtifactSaved {
            id: artifact.id,
            path: path.display().to_string(),
            template: artifact.template.clone(),
            shots: artifact.shots,
        });

        let settings = self.settings();
        if !settings.auto_print {
            return Ok(StripOutcome::Completed {
                artifact,
                copies_printed: 0,
            });
        }

        self.clock.sleep(self.print_grace).await;
        if self.superseded(epoch) {
            info!("Strip retaken during print grace, not printing");
            return Ok(StripOutcome::Completed {
                artifact,
                copies_printed: 0,
            });
        }

        let copies_printed = self.print_artifact(&artifact, &self.settings()).await?;
        Ok(StripOutcome::Completed {
            artifact,
            copies_printed,
        })
    }

    fn superseded(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }

    /// Prints the current artifact with the current settings.
    pub async fn print_current(&self) -> BoothResult<u32> {
        let artifact = self.current_artifact().ok_or(BoothError::NothingToPrint)?;
        self.print_artifact(&artifact, &self.settings()).await
    }

    /// One printer call per copy, in order. The first failure stops the run.
    async fn print_artifact(
        &self,
        artifact: &ComposedArtifact,
        settings: &BoothSettings,
    ) -> BoothResult<u32> {
        let file_path = artifact.path.clone().ok_or(BoothError::NothingToPrint)?;
        let printer_name = settings
            .printer_name
            .clone()
            .ok_or(PrinterError::NoPrinterSelected)?;
        let requested = settings.print_copies;

        let _printing = self.print_lock.lock().await;
        info!(
            "Printing {} cop{} of {} on {} ({})",
            requested,
            if requested == 1 { "y" } else { "ies" },
            file_path.display(),
            printer_name,
            self.printer.type_name()
        );
        self.events.emit(BoothEvent::PrintStarted { copies: requested });

        let job = PrintJob {
            file_path,
            printer_name,
            paper_size: settings.paper_size,
            quality: settings.quality,
        };

        for copy in 1..=requested {
            match self.printer.print(&job).await {
                Ok(job_id) => {
                    info!("Copy {}/{} submitted as job {}", copy, requested, job_id);
                    self.events.emit(BoothEvent::CopyPrinted {
                        copy,
                        of: requested,
                    });
                }
                Err(source) => {
                    let completed = copy - 1;
                    warn!(
                        "Copy {}/{} failed, abandoning remaining copies: {}",
                        copy, requested, source
                    );
                    self.events.emit(BoothEvent::PrintFailed {
                        id: artifact.id,
                        completed,
                        message: source.to_string(),
                    });
                    return Err(BoothError::PartialPrint {
                        completed,
                        requested,
                        source,
                    });
                }
            }
        }

        self.events.emit(BoothEvent::PrintFinished {
            id: artifact.id,
            copies: requested,
        });
        Ok(requested)
    }

    /// Drops the current artifact and any in-progress session and returns the
    /// booth to idle.
    pub fn retake(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.session.reset();
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        info!("Retake requested, booth reset");
        self.events.emit(BoothEvent::Reset);
    }

    pub fn cancel(&self) -> bool {
        self.session.cancel()
    }

    /// Starts a session in the background. Progress and failures are
    /// reported through the event bus.
    /// The session is claimed before this returns, so a second launch is
    /// rejected even if the first task has not been polled yet.
    pub fn launch(self: &Arc<Self>, kind: SessionKind) -> BoothResult<()> {
        let run = self.reserve(kind)?;

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let result = controller.run_reserved(run).await;
            match result {
                Ok(StripOutcome::Completed {
                    artifact,
                    copies_printed,
                }) => info!(
                    "{:?} session finished: strip {}, {} copies printed",
                    kind, artifact.id, copies_printed
                ),
                Ok(StripOutcome::Cancelled) => debug!("{:?} session cancelled", kind),
                Err(e) => warn!("{:?} session ended with error: {}", kind, e),
            }
        });
        Ok(())
    }

    /// The kiosk's single capture button: cancels a running session,
    /// otherwise starts a strip.
    pub fn toggle_capture(self: &Arc<Self>) -> BoothResult<ToggleOutcome> {
        if self.session.cancel() {
            return Ok(ToggleOutcome::Cancelled);
        }
        self.launch(SessionKind::Strip)?;
        Ok(ToggleOutcome::Started)
    }

    pub async fn list_printers(&self) -> BoothResult<Vec<PrinterDescriptor>> {
        Ok(self.printer.list_printers().await?)
    }

    /// Re-lists printers and selects the default one when nothing is
    /// selected yet.
    pub async fn refresh_printers(&self) -> BoothResult<Vec<PrinterDescriptor>> {
        let printers = self.printer.list_printers().await?;

        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        if settings.printer_name.is_none() {
            if let Some(default) = printers.iter().find(|p| p.is_default) {
                info!("Selected default printer '{}'", default.name);
                settings.printer_name = Some(default.name.clone());
            }
        }
        Ok(printers)
    }

    pub fn list_cameras(&self) -> Vec<CameraDescriptor> {
        self.frames.list_devices()
    }

    /// Switches the frame source to `device`. Refused while a session is
    /// counting down or capturing.
    pub async fn select_camera(&self, device: &str) -> BoothResult<BoothSettings> {
        if self.session.status().is_active() {
            return Err(CaptureError::AlreadyRunning.into());
        }

        self.frames.select_device(device).await?;

        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        settings.camera_device = Some(device.to_string());
        info!("Camera switched to {}", device);
        Ok(settings.clone())
    }

    pub async fn list_templates(&self) -> BoothResult<Vec<String>> {
        self.templates
            .list()
            .await
            .map_err(|e| BoothError::template("list templates", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::RecordingClock;
    use crate::errors::{StorageError, TemplateError};
    use crate::printers::MockPrinter;
    use crate::templates::Template;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage, RgbaImage};
    use std::path::PathBuf;
    use tokio::sync::Notify;

    struct SolidSource;

    #[async_trait]
    impl FrameSource for SolidSource {
        async fn capture_frame(&self) -> Result<DynamicImage, CaptureError> {
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                8,
                6,
                Rgb([200, 10, 10]),
            )))
        }

        fn name(&self) -> &'static str {
            "solid"
        }
    }

    /// Two switchable inputs that both produce a solid frame.
    struct TwoCameras {
        current: Mutex<String>,
    }

    impl TwoCameras {
        const FRONT: &'static str = "/dev/video0";
        const OVERHEAD: &'static str = "/dev/video2";

        fn new() -> Self {
            Self {
                current: Mutex::new(Self::FRONT.to_string()),
            }
        }
    }

    #[async_trait]
    impl FrameSource for TwoCameras {
        async fn capture_frame(&self) -> Result<DynamicImage, CaptureError> {
            SolidSource.capture_frame().await
        }

        fn name(&self) -> &'static str {
            "two cameras"
        }

        fn list_devices(&self) -> Vec<CameraDescriptor> {
            [(Self::FRONT, "Front"), (Self::OVERHEAD, "Overhead")]
                .into_iter()
                .map(|(path, name)| CameraDescriptor {
                    path: path.to_string(),
                    name: name.to_string(),
                })
                .collect()
        }

        fn current_device(&self) -> Option<String> {
            Some(self.current.lock().unwrap().clone())
        }

        async fn select_device(&self, device: &str) -> Result<(), CaptureError> {
            if !self.list_devices().iter().any(|c| c.path == device) {
                return Err(CaptureError::DeviceUnavailable(device.to_string()));
            }
            *self.current.lock().unwrap() = device.to_string();
            Ok(())
        }
    }

    /// Sleeps instantly except for the print grace, which waits until the
    /// test releases it.
    #[derive(Default)]
    struct GraceGateClock {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Clock for GraceGateClock {
        async fn sleep(&self, duration: Duration) {
            if duration == ControllerOptions::default().print_grace {
                self.entered.notify_one();
                self.release.notified().await;
            } else {
                tokio::task::yield_now().await;
            }
        }
    }

    /// Remembers which sleeps the clock had seen when each copy went out.
    struct ClockWatchingPrinter {
        clock: Arc<RecordingClock>,
        seen: Mutex<Vec<Vec<Duration>>>,
    }

    #[async_trait]
    impl PrinterService for ClockWatchingPrinter {
        async fn list_printers(&self) -> Result<Vec<PrinterDescriptor>, PrinterError> {
            Ok(Vec::new())
        }

        async fn print(&self, _job: &PrintJob) -> Result<String, PrinterError> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(self.clock.sleeps());
            Ok(format!("job-{}", seen.len()))
        }

        fn type_name(&self) -> &'static str {
            "clock watching"
        }
    }

    struct BuiltInTemplates;

    #[async_trait]
    impl TemplateSource for BuiltInTemplates {
        async fn load_template(&self, name: &str) -> Result<Template, TemplateError> {
            if name == CLASSIC_STRIP {
                Ok(Template::classic_strip())
            } else {
                Err(TemplateError::NotFound {
                    name: name.to_string(),
                })
            }
        }

        async fn list(&self) -> Result<Vec<String>, TemplateError> {
            Ok(vec![CLASSIC_STRIP.to_string()])
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<ArtifactKind>>,
    }

    impl MemoryStore {
        fn kinds(&self) -> Vec<ArtifactKind> {
            self.saved.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ArtifactStore for MemoryStore {
        async fn save(
            &self,
            _image: &RgbaImage,
            kind: ArtifactKind,
        ) -> Result<PathBuf, StorageError> {
            let mut saved = self.saved.lock().unwrap();
            saved.push(kind);
            Ok(PathBuf::from(format!("/mem/{:?}_{}.png", kind, saved.len())))
        }
    }

    struct Harness {
        controller: Arc<SessionController>,
        store: Arc<MemoryStore>,
        printer: Arc<MockPrinter>,
    }

    fn harness(settings: BoothSettings) -> Harness {
        harness_with(ControllerOptions {
            settings,
            ..ControllerOptions::default()
        })
    }

    fn harness_with(options: ControllerOptions) -> Harness {
        harness_on(
            options,
            Arc::new(SolidSource),
            Arc::new(RecordingClock::default()),
        )
    }

    fn harness_on(
        options: ControllerOptions,
        frames: Arc<dyn FrameSource>,
        clock: Arc<dyn Clock>,
    ) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let printer = Arc::new(MockPrinter::new());
        let services = Services {
            frames,
            templates: Arc::new(BuiltInTemplates),
            store: store.clone(),
            printer: printer.clone(),
            clock,
        };
        let controller = Arc::new(SessionController::new(
            services,
            Compositor::default(),
            EventBus::new(),
            options,
        ));
        Harness {
            controller,
            store,
            printer,
        }
    }

    fn printing(copies: u32) -> BoothSettings {
        BoothSettings {
            timer_seconds: 0,
            auto_print: true,
            print_copies: copies,
            printer_name: Some(MockPrinter::NAME.to_string()),
            ..BoothSettings::default()
        }
    }

    #[tokio::test]
    async fn test_strip_session_installs_artifact() {
        let h = harness(BoothSettings::default());
        let outcome = h.controller.run_strip_session().await.unwrap();

        let StripOutcome::Completed {
            artifact,
            copies_printed,
        } = outcome
        else {
            panic!("expected a completed strip");
        };
        assert_eq!(copies_printed, 0);
        assert_eq!(artifact.dimensions(), (600, 1800));
        assert_eq!(artifact.shots, STRIP_SHOTS);
        assert_eq!(h.store.kinds(), vec![ArtifactKind::Strip]);
        assert!(h.printer.jobs().is_empty());
        assert_eq!(h.controller.current_artifact().unwrap().id, artifact.id);
    }

    #[tokio::test]
    async fn test_auto_print_submits_each_copy() {
        let h = harness(printing(2));
        let outcome = h.controller.run_strip_session().await.unwrap();

        assert!(matches!(
            outcome,
            StripOutcome::Completed {
                copies_printed: 2,
                ..
            }
        ));
        let jobs = h.printer.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0], jobs[1]);
        assert_eq!(jobs[0].printer_name, MockPrinter::NAME);
    }

    #[tokio::test]
    async fn test_auto_print_waits_for_grace_first() {
        let clock = Arc::new(RecordingClock::default());
        let printer = Arc::new(ClockWatchingPrinter {
            clock: clock.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let services = Services {
            frames: Arc::new(SolidSource),
            templates: Arc::new(BuiltInTemplates),
            store: Arc::new(MemoryStore::default()),
            printer: printer.clone(),
            clock: clock.clone(),
        };
        let controller = SessionController::new(
            services,
            Compositor::default(),
            EventBus::new(),
            ControllerOptions {
                settings: printing(2),
                ..ControllerOptions::default()
            },
        );

        controller.run_strip_session().await.unwrap();

        let ms = |v: u64| Duration::from_millis(v);
        let mut before_print: Vec<Duration> =
            [ms(1500), ms(500)].iter().cycle().take(8).copied().collect();
        before_print.push(ms(1000));

        let seen = printer.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], before_print);
        assert_eq!(seen[1], before_print, "no extra wait between copies");
    }

    #[tokio::test]
    async fn test_retake_during_print_grace_prints_nothing() {
        let clock = Arc::new(GraceGateClock::default());
        let h = harness_on(
            ControllerOptions {
                settings: printing(2),
                ..ControllerOptions::default()
            },
            Arc::new(SolidSource),
            clock.clone(),
        );

        let running = tokio::spawn({
            let controller = h.controller.clone();
            async move { controller.run_strip_session().await }
        });

        clock.entered.notified().await;
        assert!(
            h.controller.current_artifact().is_some(),
            "strip is installed before the grace wait"
        );
        h.controller.retake();
        clock.release.notify_one();

        let outcome = running.await.unwrap().unwrap();
        assert!(matches!(
            outcome,
            StripOutcome::Completed {
                copies_printed: 0,
                ..
            }
        ));
        assert!(h.printer.jobs().is_empty());
        assert!(h.controller.current_artifact().is_none());
        assert_eq!(h.store.kinds(), vec![ArtifactKind::Strip]);
    }

    #[tokio::test]
    async fn test_back_to_back_launch_rejects_second() {
        let h = harness(BoothSettings::default());

        h.controller.launch(SessionKind::Strip).unwrap();
        let second = h.controller.launch(SessionKind::Single);

        assert!(matches!(
            second,
            Err(BoothError::Capture(CaptureError::AlreadyRunning))
        ));
        assert_eq!(h.controller.status(), SessionStatus::CountingDown);

        while h.controller.current_artifact().is_none() {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.store.kinds(), vec![ArtifactKind::Strip]);
        assert_eq!(h.controller.current_artifact().unwrap().shots, STRIP_SHOTS);
    }

    #[tokio::test]
    async fn test_select_camera() {
        let cameras = Arc::new(TwoCameras::new());
        let h = harness_on(
            ControllerOptions::default(),
            cameras.clone(),
            Arc::new(RecordingClock::default()),
        );
        assert_eq!(
            h.controller.settings().camera_device.as_deref(),
            Some(TwoCameras::FRONT)
        );
        assert_eq!(h.controller.list_cameras().len(), 2);

        let settings = h.controller.select_camera(TwoCameras::OVERHEAD).await.unwrap();
        assert_eq!(settings.camera_device.as_deref(), Some(TwoCameras::OVERHEAD));
        assert_eq!(cameras.current_device().as_deref(), Some(TwoCameras::OVERHEAD));

        let err = h.controller.select_camera("/dev/video9").await.unwrap_err();
        assert!(matches!(
            err,
            BoothError::Capture(CaptureError::DeviceUnavailable(_))
        ));
        assert_eq!(
            h.controller.settings().camera_device.as_deref(),
            Some(TwoCameras::OVERHEAD)
        );
    }

    #[tokio::test]
    async fn test_select_camera_refused_mid_session() {
        let h = harness_on(
            ControllerOptions::default(),
            Arc::new(TwoCameras::new()),
            Arc::new(RecordingClock::default()),
        );

        h.controller.launch(SessionKind::Strip).unwrap();
        let result = h.controller.select_camera(TwoCameras::OVERHEAD).await;
        assert!(matches!(
            result,
            Err(BoothError::Capture(CaptureError::AlreadyRunning))
        ));

        h.controller.cancel();
        assert_eq!(
            h.controller.settings().camera_device.as_deref(),
            Some(TwoCameras::FRONT)
        );
    }

    #[tokio::test]
    async fn test_single_shot_saves_raw_then_strip() {
        let h = harness(BoothSettings::default());
        let outcome = h.controller.run_single_shot_session().await.unwrap();

        assert!(matches!(outcome, StripOutcome::Completed { .. }));
        assert_eq!(
            h.store.kinds(),
            vec![ArtifactKind::Capture, ArtifactKind::Strip]
        );
        assert_eq!(h.controller.current_artifact().unwrap().shots, 1);
    }

    #[tokio::test]
    async fn test_print_current_requirements() {
        let h = harness(BoothSettings::default());
        assert!(matches!(
            h.controller.print_current().await,
            Err(BoothError::NothingToPrint)
        ));

        h.controller.run_strip_session().await.unwrap();
        assert!(matches!(
            h.controller.print_current().await,
            Err(BoothError::Printer(PrinterError::NoPrinterSelected))
        ));

        h.controller.refresh_printers().await.unwrap();
        assert_eq!(h.controller.print_current().await.unwrap(), 1);
        assert_eq!(h.printer.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_template_is_recoverable() {
        let h = harness_with(ControllerOptions {
            strip_template: "missing".to_string(),
            ..ControllerOptions::default()
        });
        let controller = &h.controller;

        let err = controller.run_strip_session().await.unwrap_err();
        assert!(matches!(
            err,
            BoothError::Template {
                operation: "load template",
                ..
            }
        ));
        assert_eq!(controller.status(), SessionStatus::Idle);
        assert!(controller.current_artifact().is_none());
        assert!(h.store.kinds().is_empty());
    }

    #[tokio::test]
    async fn test_retake_clears_artifact() {
        let h = harness(BoothSettings::default());
        h.controller.run_strip_session().await.unwrap();
        assert!(h.controller.current_artifact().is_some());

        h.controller.retake();
        assert!(h.controller.current_artifact().is_none());
        assert_eq!(h.controller.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_update_settings_validates() {
        let h = harness(BoothSettings::default());
        let result = h.controller.update_settings(SettingsUpdate {
            print_copies: Some(11),
            ..SettingsUpdate::default()
        });
        assert!(matches!(result, Err(BoothError::Config(_))));

        let updated = h
            .controller
            .update_settings(SettingsUpdate {
                print_copies: Some(3),
                printer_name: Some("  Office  ".to_string()),
                paper_size: Some(PaperSize::A4),
                ..SettingsUpdate::default()
            })
            .unwrap();
        assert_eq!(updated.print_copies, 3);
        assert_eq!(updated.printer_name.as_deref(), Some("Office"));
        assert_eq!(updated.paper_size, PaperSize::A4);
        assert_eq!(updated.timer_seconds, 3);

        let cleared = h
            .controller
            .update_settings(SettingsUpdate {
                printer_name: Some(String::new()),
                ..SettingsUpdate::default()
            })
            .unwrap();
        assert_eq!(cleared.printer_name, None);
    }

    #[tokio::test]
    async fn test_snapshot_reports_artifact() {
        let h = harness(BoothSettings::default());
        assert!(h.controller.snapshot().artifact.is_none());

        h.controller.run_strip_session().await.unwrap();
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.session.status, SessionStatus::Completed);
        let artifact = snapshot.artifact.unwrap();
        assert_eq!((artifact.width, artifact.height), (600, 1800));
        assert_eq!(artifact.template, CLASSIC_STRIP);
    }
}
