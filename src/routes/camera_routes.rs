use actix_web::{get, post, web, HttpResponse, Responder};
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use super::error_reply;
use crate::camera::PreviewFeed;
use crate::controller::SessionController;

const BOUNDARY: &str = "frame";

/// Wraps one JPEG as a `multipart/x-mixed-replace` part.
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let boundary_prefix = format!("--{}\r\n", BOUNDARY).into_bytes();
    let header = format!(
        "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    )
    .into_bytes();
    let tail = b"\r\n";

    let mut part =
        Vec::with_capacity(boundary_prefix.len() + header.len() + jpeg.len() + tail.len());
    part.extend_from_slice(&boundary_prefix);
    part.extend_from_slice(&header);
    part.extend_from_slice(jpeg);
    part.extend_from_slice(tail);
    Bytes::from(part)
}

#[get("/preview")]
pub async fn preview_stream(feed: web::Data<PreviewFeed>) -> impl Responder {
    let mut frames = feed.subscribe();
    info!(
        "Preview viewer connected ({} watching)",
        feed.receiver_count()
    );

    let stream = async_stream::stream! {
        let mut frame_count = 0u64;
        loop {
            match frames.recv().await {
                Ok(jpeg) => {
                    frame_count += 1;
                    yield Ok::<Bytes, actix_web::Error>(mjpeg_part(&jpeg));
                }
                // Slow viewers just miss frames
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Preview stream ended after {} frames", frame_count);
    };

    HttpResponse::Ok()
        .insert_header((
            "Content-Type",
            format!("multipart/x-mixed-replace; boundary={}", BOUNDARY),
        ))
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream)
}

#[get("/cameras")]
pub async fn list_cameras(controller: web::Data<SessionController>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "cameras": controller.list_cameras(),
        "selected": controller.settings().camera_device
    }))
}

#[derive(Debug, Deserialize)]
pub struct CameraSelection {
    device: String,
}

#[post("/cameras/select")]
pub async fn select_camera(
    controller: web::Data<SessionController>,
    body: web::Json<CameraSelection>,
) -> impl Responder {
    info!("Camera selection request: {}", body.device);
    match controller.select_camera(&body.device).await {
        Ok(settings) => HttpResponse::Ok().json(serde_json::json!({
            "ok": true,
            "settings": settings
        })),
        Err(e) => error_reply(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mjpeg_part_layout() {
        let part = mjpeg_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let expected_head = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n";
        assert!(part.starts_with(expected_head));
        assert_eq!(&part[expected_head.len()..], &[0xFF, 0xD8, 0xFF, 0xD9, b'\r', b'\n']);
    }
}
