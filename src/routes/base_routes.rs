use actix_web::{get, HttpResponse, Responder};

// Embed the kiosk page at compile time
const BOOTH_HTML: &str = include_str!("../../html/booth.html");

#[get("/")]
pub async fn booth_page() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(BOOTH_HTML)
}
