// Route modules organization

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use tracing::warn;

use crate::errors::BoothError;

pub mod base_routes;
pub mod camera_routes;
pub mod library_routes;
pub mod printer_routes;
pub mod session_routes;

// Re-export all routes for convenience
pub use base_routes::*;
pub use camera_routes::*;
pub use library_routes::*;
pub use printer_routes::*;
pub use session_routes::*;

/// JSON error body with the status the error maps to.
pub(crate) fn error_reply(err: &BoothError) -> HttpResponse {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!("Request failed: {}", err);
    }
    HttpResponse::build(status).json(err.error_response())
}
