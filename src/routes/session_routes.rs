use actix_web::{get, post, web, HttpResponse, Responder};
use bytes::Bytes;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::error_reply;
use crate::controller::{SessionController, SessionKind};
use crate::events::BoothEvent;

#[get("/session")]
pub async fn get_session(controller: web::Data<SessionController>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "snapshot": controller.snapshot()
    }))
}

fn launch(controller: web::Data<SessionController>, kind: SessionKind) -> HttpResponse {
    match controller.into_inner().launch(kind) {
        Ok(()) => {
            info!("{:?} session launched", kind);
            HttpResponse::Accepted().json(serde_json::json!({ "ok": true }))
        }
        Err(e) => error_reply(&e),
    }
}

#[post("/session/start")]
pub async fn start_session(controller: web::Data<SessionController>) -> impl Responder {
    launch(controller, SessionKind::Strip)
}

#[post("/session/single")]
pub async fn start_single_shot(controller: web::Data<SessionController>) -> impl Responder {
    launch(controller, SessionKind::Single)
}

#[post("/session/toggle")]
pub async fn toggle_session(controller: web::Data<SessionController>) -> impl Responder {
    match controller.into_inner().toggle_capture() {
        Ok(outcome) => HttpResponse::Ok().json(serde_json::json!({
            "ok": true,
            "outcome": outcome
        })),
        Err(e) => error_reply(&e),
    }
}

#[post("/session/cancel")]
pub async fn cancel_session(controller: web::Data<SessionController>) -> impl Responder {
    let cancelled = controller.cancel();
    HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "cancelled": cancelled
    }))
}

#[post("/session/retake")]
pub async fn retake_session(controller: web::Data<SessionController>) -> impl Responder {
    controller.retake();
    HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "snapshot": controller.snapshot()
    }))
}

/// One server-sent event carrying the JSON form of `event`.
pub fn sse_frame(event: &BoothEvent) -> Option<Bytes> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Bytes::from(format!("data: {}\n\n", json))),
        Err(e) => {
            warn!("Failed to serialize event {:?}: {}", event, e);
            None
        }
    }
}

#[get("/events")]
pub async fn event_stream(controller: web::Data<SessionController>) -> impl Responder {
    let mut receiver = controller.events().subscribe();

    let stream = async_stream::stream! {
        // EventSource reconnect delay
        yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b"retry: 2000\n\n"));

        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Some(frame) = sse_frame(&event) {
                        yield Ok(frame);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream client lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("Event bus closed, ending event stream");
                    break;
                }
            }
        }
    };

    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/event-stream"))
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;

    #[test]
    fn test_sse_frame_format() {
        let frame = sse_frame(&BoothEvent::StatusChanged {
            status: SessionStatus::CountingDown,
        })
        .unwrap();
        assert_eq!(
            frame,
            Bytes::from_static(b"data: {\"type\":\"status_changed\",\"status\":\"counting_down\"}\n\n")
        );
    }
}
