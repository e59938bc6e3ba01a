// Library module organization

// Core
pub mod clock;
pub mod compositor;
pub mod controller;
pub mod events;
pub mod session;
pub mod templates;

// Capabilities
pub mod camera;
pub mod printers;
pub mod storage;

// Ambient
pub mod config;
pub mod errors;
pub mod history;
pub mod routes;

// Re-export commonly used types for convenience
pub use camera::{CameraDescriptor, FrameSource, LiveFeed, MockCamera};
pub use clock::{Clock, TokioClock};
pub use compositor::{ComposedArtifact, Compositor, FontBook};
pub use controller::{
    BoothSettings, ControllerOptions, Services, SessionController, SessionKind, SettingsUpdate,
    StripOutcome,
};
pub use errors::{BoothError, BoothResult};
pub use events::{BoothEvent, EventBus};
pub use printers::{new_printer, MockPrinter, PaperSize, PrintJob, PrintQuality, PrinterService};
pub use session::{CaptureSession, Pacing, SessionStatus};
pub use storage::{ArtifactKind, ArtifactStore, FsArtifactStore};
pub use templates::{DirectoryTemplateSource, Template, TemplateSource};

#[cfg(feature = "printer-cups")]
pub use printers::CupsPrinterService;
