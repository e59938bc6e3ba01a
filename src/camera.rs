// Frame Source capability and its camera implementations

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use serde::Serialize;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
#[cfg(target_os = "linux")]
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;
#[cfg(target_os = "linux")]
use tracing::{error, info, warn};

#[cfg(target_os = "linux")]
use crate::config::CameraConfig;
use crate::errors::CaptureError;

/// Device path reported by [`MockCamera`].
pub const MOCK_DEVICE: &str = "mock";

/// A video input the operator can pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDescriptor {
    pub path: String,
    pub name: String,
}

/// Anything that can hand the session one still frame on request.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture_frame(&self) -> Result<DynamicImage, CaptureError>;
    fn name(&self) -> &'static str;

    /// Inputs this source can switch between.
    fn list_devices(&self) -> Vec<CameraDescriptor> {
        Vec::new()
    }

    fn current_device(&self) -> Option<String> {
        None
    }

    /// Points the live feed at `device`.
    async fn select_device(&self, device: &str) -> Result<(), CaptureError> {
        Err(CaptureError::DeviceUnavailable(format!(
            "{} cannot switch to {}",
            self.name(),
            device
        )))
    }
}

/// Fan-out of live preview JPEGs.
pub type PreviewFeed = broadcast::Sender<Bytes>;

const PREVIEW_CAPACITY: usize = 4;

pub fn preview_feed() -> PreviewFeed {
    broadcast::channel(PREVIEW_CAPACITY).0
}

/// Decodes an encoded frame (JPEG, PNG) off the async executor.
pub async fn decode_frame(encoded: Bytes) -> Result<DynamicImage, CaptureError> {
    tokio::task::spawn_blocking(move || image::load_from_memory(&encoded))
        .await
        .map_err(|e| CaptureError::DeviceUnavailable(format!("decode task failed: {}", e)))?
        .map_err(|e| CaptureError::DeviceUnavailable(format!("undecodable frame: {}", e)))
}

#[derive(Debug, Default)]
struct FeedState {
    generation: u64,
    latest: Option<Bytes>,
}

/// Latest encoded frame of a live stream. Every stream run gets its own
/// generation; frames from a superseded run are refused and an ended run
/// leaves the feed empty.
#[derive(Debug, Default)]
pub struct LiveFeed {
    state: Mutex<FeedState>,
}

impl LiveFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a new run and drops whatever the previous run left behind.
    pub fn restart(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.generation += 1;
        state.latest = None;
        state.generation
    }

    /// Stores `frame` unless `generation` has been superseded. Returns
    /// `false` when the caller's run is stale and should stop.
    pub fn publish(&self, generation: u64, frame: Bytes) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation != generation {
            return false;
        }
        state.latest = Some(frame);
        true
    }

    /// Ends run `generation`. No-op if a newer run has started.
    pub fn go_offline(&self, generation: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.generation == generation {
            state.latest = None;
        }
    }

    pub fn is_live(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .is_some()
    }

    /// Decodes the latest frame; `DeviceUnavailable` when nothing is
    /// streaming.
    pub async fn capture(&self, device: &str) -> Result<DynamicImage, CaptureError> {
        let latest = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .clone();
        match latest {
            Some(jpeg) => decode_frame(jpeg).await,
            None => Err(CaptureError::DeviceUnavailable(format!(
                "no active feed from {}",
                device
            ))),
        }
    }
}

/// Video capture devices present on this machine, sorted by path.
#[cfg(target_os = "linux")]
pub fn list_cameras() -> Vec<CameraDescriptor> {
    let mut cameras: Vec<CameraDescriptor> = v4l::context::enum_devices()
        .into_iter()
        .map(|node| CameraDescriptor {
            path: node.path().display().to_string(),
            name: node
                .name()
                .unwrap_or_else(|| format!("Video device {}", node.index())),
        })
        .collect();
    cameras.sort_by(|a, b| a.path.cmp(&b.path));
    cameras
}

#[cfg(not(target_os = "linux"))]
pub fn list_cameras() -> Vec<CameraDescriptor> {
    Vec::new()
}

/// Synthetic camera for kiosks without a capture device. Each frame is a
/// vertical gradient in a different hue so shots are distinguishable.
pub struct MockCamera {
    width: u32,
    height: u32,
    taken: AtomicU32,
}

impl MockCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            taken: AtomicU32::new(0),
        }
    }
}

impl MockCamera {
    fn render(&self, shot: u32) -> RgbImage {
        let palette = [[220, 80, 80], [80, 160, 220], [90, 200, 120], [230, 190, 70]];
        let base = palette[shot as usize % palette.len()];
        let height = self.height.max(1);

        RgbImage::from_fn(self.width.max(1), height, |_, y| {
            let shade = 155 + (100 * y / height) as u16;
            Rgb(base.map(|c: u16| ((c * shade) / 255).min(255) as u8))
        })
    }

    /// Publishes a JPEG in the next shot's color every `interval` while
    /// anyone is watching. Never returns.
    pub async fn run_preview(&self, feed: PreviewFeed, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if feed.receiver_count() == 0 {
                continue;
            }

            let frame = self.render(self.taken.load(Ordering::SeqCst));
            let mut jpeg = Vec::new();
            if let Err(e) = DynamicImage::ImageRgb8(frame)
                .write_to(&mut Cursor::new(&mut jpeg), ImageOutputFormat::Jpeg(70))
            {
                debug!("Mock preview encode failed: {}", e);
                continue;
            }
            let _ = feed.send(Bytes::from(jpeg));
        }
    }
}

#[async_trait]
impl FrameSource for MockCamera {
    async fn capture_frame(&self) -> Result<DynamicImage, CaptureError> {
        let shot = self.taken.fetch_add(1, Ordering::SeqCst);
        Ok(DynamicImage::ImageRgb8(self.render(shot)))
    }

    fn name(&self) -> &'static str {
        "Mock Camera"
    }

    fn list_devices(&self) -> Vec<CameraDescriptor> {
        vec![CameraDescriptor {
            path: MOCK_DEVICE.to_string(),
            name: self.name().to_string(),
        }]
    }

    fn current_device(&self) -> Option<String> {
        Some(MOCK_DEVICE.to_string())
    }

    async fn select_device(&self, device: &str) -> Result<(), CaptureError> {
        if device == MOCK_DEVICE {
            Ok(())
        } else {
            Err(CaptureError::DeviceUnavailable(format!(
                "unknown camera {}",
                device
            )))
        }
    }
}

/// How long a device switch waits for the previous stream to release the
/// device before opening the next one.
#[cfg(target_os = "linux")]
const STREAM_RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// V4L2 MJPEG camera. A blocking stream loop keeps the most recent JPEG in a
/// [`LiveFeed`] and fans frames out to preview subscribers; captures decode
/// that latest frame. When the stream dies the feed empties, so captures
/// fail instead of returning a frozen frame.
#[cfg(target_os = "linux")]
pub struct V4lCamera {
    config: CameraConfig,
    device: Mutex<String>,
    feed: Arc<LiveFeed>,
    preview: PreviewFeed,
    worker: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[cfg(target_os = "linux")]
impl V4lCamera {
    pub fn new(config: CameraConfig, preview: PreviewFeed) -> Self {
        V4lCamera {
            device: Mutex::new(config.device.clone()),
            config,
            feed: Arc::new(LiveFeed::new()),
            preview,
            worker: tokio::sync::Mutex::new(None),
        }
    }

    fn device(&self) -> String {
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Starts streaming from the current device in the background.
    pub async fn start_preview_stream(&self) {
        self.restart(self.device()).await;
    }

    /// Stops the running stream, if any, and streams from `device`.
    async fn restart(&self, device: String) {
        let generation = self.feed.restart();

        let mut worker = self.worker.lock().await;
        if let Some(previous) = worker.take() {
            if tokio::time::timeout(STREAM_RELEASE_TIMEOUT, previous)
                .await
                .is_err()
            {
                warn!("Previous camera stream did not stop in time");
            }
        }

        let feed = self.feed.clone();
        let preview = self.preview.clone();
        let (width, height) = (self.config.width, self.config.height);
        *worker = Some(tokio::spawn(async move {
            info!("Starting camera stream from {}", device);
            let result = tokio::task::spawn_blocking({
                let device = device.clone();
                let feed = feed.clone();
                move || preview_loop(&device, width, height, preview, &feed, generation)
            })
            .await;

            feed.go_offline(generation);
            match result {
                Ok(Ok(())) => info!("Camera stream from {} stopped", device),
                Ok(Err(e)) => error!("Camera stream error on {}: {}", device, e),
                Err(e) => error!("Camera stream task failed: {}", e),
            }
        }));
    }
}

#[cfg(target_os = "linux")]
#[async_trait]
impl FrameSource for V4lCamera {
    async fn capture_frame(&self) -> Result<DynamicImage, CaptureError> {
        self.feed.capture(&self.device()).await
    }

    fn name(&self) -> &'static str {
        "V4L2 Camera"
    }

    fn list_devices(&self) -> Vec<CameraDescriptor> {
        list_cameras()
    }

    fn current_device(&self) -> Option<String> {
        Some(self.device())
    }

    async fn select_device(&self, device: &str) -> Result<(), CaptureError> {
        if !std::path::Path::new(device).exists() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} does not exist",
                device
            )));
        }

        info!("Switching camera to {}", device);
        *self.device.lock().unwrap_or_else(PoisonError::into_inner) = device.to_string();
        self.restart(device.to_string()).await;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn configure_device(
    dev: &mut v4l::device::Device,
    width: u32,
    height: u32,
) -> Result<v4l::Format, CaptureError> {
    use v4l::video::Capture;
    use v4l::FourCC;

    let unavailable = |what: &str, e: std::io::Error| {
        CaptureError::DeviceUnavailable(format!("{}: {}", what, e))
    };

    let mut fmt = dev.format().map_err(|e| unavailable("format()", e))?;
    fmt.width = width;
    fmt.height = height;
    fmt.fourcc = FourCC::new(b"MJPG");
    let fmt = dev
        .set_format(&fmt)
        .map_err(|e| unavailable("set_format()", e))?;

    if fmt.fourcc == FourCC::new(b"MJPG") {
        return Ok(fmt);
    }

    Err(CaptureError::DeviceUnavailable(format!(
        "Device does not support MJPEG, got {}. Only MJPEG is supported.",
        fmt.fourcc
    )))
}

#[cfg(target_os = "linux")]
fn preview_loop(
    path: &str,
    width: u32,
    height: u32,
    preview: PreviewFeed,
    feed: &LiveFeed,
    generation: u64,
) -> Result<(), CaptureError> {
    use v4l::buffer::Type;
    use v4l::io::traits::CaptureStream;
    use v4l::io::userptr;

    let mut dev = v4l::device::Device::with_path(path)
        .map_err(|e| CaptureError::DeviceUnavailable(format!("open {}: {}", path, e)))?;
    let fmt = configure_device(&mut dev, width, height)?;
    info!(
        "Streaming {}x{} MJPEG from {}",
        fmt.width, fmt.height, path
    );

    let mut stream = userptr::Stream::with_buffers(&mut dev, Type::VideoCapture, 4)
        .map_err(|e| {
            CaptureError::DeviceUnavailable(format!("Failed to create UserptrStream: {}", e))
        })?;

    let mut frame_count = 0u64;
    loop {
        let (buffer, _meta) = stream.next().map_err(|e| {
            warn!("Userptr stream error after {} frames: {}", frame_count, e);
            CaptureError::DeviceUnavailable(format!("Userptr stream error: {}", e))
        })?;
        frame_count += 1;

        let jpeg = Bytes::copy_from_slice(buffer);
        if !feed.publish(generation, jpeg.clone()) {
            info!("Stream from {} superseded after {} frames", path, frame_count);
            return Ok(());
        }
        // no preview viewers is fine
        let _ = preview.send(jpeg);
    }
}
