use actix_web::{get, web, HttpResponse, Responder};
use serde::Deserialize;

use super::error_reply;
use crate::controller::SessionController;
use crate::errors::BoothError;
use crate::history::StripHistory;

const DEFAULT_HISTORY_LIMIT: u32 = 20;
const MAX_HISTORY_LIMIT: u32 = 200;

#[get("/templates")]
pub async fn list_templates(controller: web::Data<SessionController>) -> impl Responder {
    match controller.list_templates().await {
        Ok(templates) => HttpResponse::Ok().json(serde_json::json!({
            "ok": true,
            "templates": templates
        })),
        Err(e) => error_reply(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<u32>,
}

#[get("/history")]
pub async fn strip_history(
    history: web::Data<StripHistory>,
    query: web::Query<HistoryQuery>,
) -> impl Responder {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    match history.recent(limit).await {
        Ok(strips) => HttpResponse::Ok().json(serde_json::json!({
            "ok": true,
            "strips": strips
        })),
        Err(e) => error_reply(&BoothError::from(e)),
    }
}
