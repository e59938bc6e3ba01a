// Kiosk photo strip booth: HTTP front end over the session controller.

use actix_files as fs;
use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use photo_strip_booth::camera::{preview_feed, FrameSource, MockCamera, PreviewFeed};
use photo_strip_booth::config::{CameraConfig, Config};
use photo_strip_booth::controller::{
    BoothSettings, ControllerOptions, Services, SessionController,
};
use photo_strip_booth::history::StripHistory;
use photo_strip_booth::routes;
use photo_strip_booth::{
    new_printer, BoothError, Compositor, DirectoryTemplateSource, EventBus, FontBook,
    FsArtifactStore, Pacing, TokioClock,
};

const MOCK_PREVIEW_INTERVAL: Duration = Duration::from_millis(200);

// ============================================================================
// Application State
// ============================================================================

/// Centralized application state container
#[derive(Clone)]
struct AppState {
    config: Config,
    controller: Arc<SessionController>,
    history: StripHistory,
    preview: PreviewFeed,
}

impl AppState {
    async fn new(config: Config) -> Result<Self, BoothError> {
        info!("Initializing application state");

        let history = StripHistory::connect(&config.database).await?;

        let store = FsArtifactStore::new(
            config.storage.photos_path(),
            config.storage.output_path(),
        );
        store.ensure_dirs().await?;

        let fonts = FontBook::load_dir(&config.template.fonts_path);
        if fonts.is_empty() {
            warn!(
                "No fonts found under {:?}; strips will render without text",
                config.template.fonts_path
            );
        }

        // Printer is non-critical: discovery falls back to the mock printer
        let printer = new_printer(&config.printer).await;

        let preview = preview_feed();
        let frames = initialize_camera(&config.camera, preview.clone());

        let events = EventBus::new();
        history.spawn_recorder(&events);

        let services = Services {
            frames,
            templates: Arc::new(DirectoryTemplateSource::new(
                config.template.templates_path.clone(),
            )),
            store: Arc::new(store),
            printer: printer.service,
            clock: Arc::new(TokioClock),
        };
        let options = ControllerOptions {
            strip_template: config.template.default_template.clone(),
            pacing: Pacing::from_config(&config.session, &config.camera),
            print_grace: config.session.print_grace,
            settings: BoothSettings::from_config(&config, printer.selected),
        };
        let controller = Arc::new(SessionController::new(
            services,
            Compositor::new(fonts),
            events,
            options,
        ));

        Ok(Self {
            config,
            controller,
            history,
            preview,
        })
    }
}

// ============================================================================
// Camera Initialization
// ============================================================================

fn initialize_camera(config: &CameraConfig, preview: PreviewFeed) -> Arc<dyn FrameSource> {
    #[cfg(target_os = "linux")]
    {
        if !config.use_mock {
            if std::path::Path::new(&config.device).exists() {
                info!("Initializing V4L2 camera at {}", config.device);
                let camera = Arc::new(photo_strip_booth::camera::V4lCamera::new(
                    config.clone(),
                    preview,
                ));

                // Start preview stream in background
                let camera_for_stream = camera.clone();
                tokio::spawn(async move { camera_for_stream.start_preview_stream().await });
                return camera;
            }
            warn!(
                "Video device {} not found, falling back to mock camera",
                config.device
            );
        }
    }

    info!("Using mock camera ({}x{})", config.width, config.height);
    let camera = Arc::new(MockCamera::new(config.width, config.height));
    let camera_for_stream = camera.clone();
    tokio::spawn(async move {
        camera_for_stream
            .run_preview(preview, MOCK_PREVIEW_INTERVAL)
            .await
    });
    camera
}

// ============================================================================
// Shutdown Handling
// ============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

async fn cleanup_resources(state: AppState) {
    info!("Beginning resource cleanup");

    if state.controller.cancel() {
        info!("Cancelled in-progress capture session");
    }

    state.history.close().await;
    info!("Database connections closed");

    info!("Resource cleanup complete");
}

fn startup_error(context: &str, e: impl std::fmt::Display) -> std::io::Error {
    error!("{}: {}", context, e);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, e))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting photo strip booth");

    let config =
        Config::from_env().map_err(|e| startup_error("Failed to load configuration", e))?;
    let socket_addr = config
        .socket_addr()
        .map_err(|e| startup_error("Invalid bind address", e))?;
    info!("Server will bind to: {}", socket_addr);

    let app_state = AppState::new(config)
        .await
        .map_err(|e| startup_error("Failed to initialize application", e))?;

    let app_state_for_server = app_state.clone();
    let server = HttpServer::new(move || {
        let state = app_state_for_server.clone();
        App::new()
            // Middleware
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            // Application state
            .app_data(web::Data::from(state.controller.clone()))
            .app_data(web::Data::new(state.history.clone()))
            .app_data(web::Data::new(state.preview.clone()))
            // Kiosk page
            .service(routes::booth_page)
            // Session control
            .service(routes::get_session)
            .service(routes::start_session)
            .service(routes::start_single_shot)
            .service(routes::toggle_session)
            .service(routes::cancel_session)
            .service(routes::retake_session)
            .service(routes::event_stream)
            // Camera
            .service(routes::preview_stream)
            .service(routes::list_cameras)
            .service(routes::select_camera)
            // Printing and settings
            .service(routes::list_printers)
            .service(routes::refresh_printers)
            .service(routes::print_current)
            .service(routes::get_settings)
            .service(routes::update_settings)
            // Templates and history
            .service(routes::list_templates)
            .service(routes::strip_history)
            // Static file serving
            .service(fs::Files::new("/output", state.config.storage.output_path()))
            .service(fs::Files::new("/photos", state.config.storage.photos_path()))
    })
    .bind(socket_addr)?
    .shutdown_timeout(5)
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(async move { server.await });

    info!("Photo strip booth started on {}", socket_addr);

    shutdown_signal().await;

    info!("Initiating graceful shutdown...");
    server_handle.stop(true).await;
    cleanup_resources(app_state).await;

    server_task
        .await
        .map_err(|e| startup_error("Server task error", e))??;

    info!("Graceful shutdown complete");
    Ok(())
}
