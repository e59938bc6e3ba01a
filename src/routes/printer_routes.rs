use actix_web::{get, post, put, web, HttpResponse, Responder};
use tracing::info;

use super::error_reply;
use crate::controller::{SessionController, SettingsUpdate};

#[get("/printers")]
pub async fn list_printers(controller: web::Data<SessionController>) -> impl Responder {
    match controller.list_printers().await {
        Ok(printers) => HttpResponse::Ok().json(serde_json::json!({
            "ok": true,
            "printers": printers,
            "selected": controller.settings().printer_name
        })),
        Err(e) => error_reply(&e),
    }
}

#[post("/printers/refresh")]
pub async fn refresh_printers(controller: web::Data<SessionController>) -> impl Responder {
    match controller.refresh_printers().await {
        Ok(printers) => HttpResponse::Ok().json(serde_json::json!({
            "ok": true,
            "printers": printers,
            "selected": controller.settings().printer_name
        })),
        Err(e) => error_reply(&e),
    }
}

#[post("/print")]
pub async fn print_current(controller: web::Data<SessionController>) -> impl Responder {
    info!("Print request received");
    match controller.print_current().await {
        Ok(copies) => HttpResponse::Ok().json(serde_json::json!({
            "ok": true,
            "copies": copies,
            "message": format!("Printed {} cop{}", copies, if copies == 1 { "y" } else { "ies" })
        })),
        Err(e) => error_reply(&e),
    }
}

#[get("/settings")]
pub async fn get_settings(controller: web::Data<SessionController>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "settings": controller.settings()
    }))
}

#[put("/settings")]
pub async fn update_settings(
    controller: web::Data<SessionController>,
    body: web::Json<SettingsUpdate>,
) -> impl Responder {
    match controller.update_settings(body.into_inner()) {
        Ok(settings) => HttpResponse::Ok().json(serde_json::json!({
            "ok": true,
            "settings": settings
        })),
        Err(e) => error_reply(&e),
    }
}
