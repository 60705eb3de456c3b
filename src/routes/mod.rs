// Route modules organization

use actix_web::web;

pub mod base_routes;
pub mod print_routes;

pub use base_routes::*;
pub use print_routes::*;

/// Register every route. Handlers expect `web::Data<AppState>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(base_routes::root)
        .service(base_routes::health)
        .service(
            web::scope("/api/print")
                .service(print_routes::preview)
                .service(print_routes::preview_html)
                .service(print_routes::print)
                .service(print_routes::printers)
                .service(print_routes::job_status)
                .service(print_routes::print_batch),
        );
}
