pub mod audio;
pub mod levels;

pub use audio::get_audio;
pub use levels::{delete_level, list_levels, upload_level};

use crate::health;
use crate::middleware::RateLimit;
use crate::state::AppState;
use actix_web::web;

/// Register every route, each behind its own rate limiter.
///
/// ## Routes:
/// - `POST /upload` - upload a level (multipart)
/// - `GET /levels` - list all levels
/// - `GET /audio/{filename}` - download an audio file
/// - `DELETE /delete_level/{level_name}` - delete a level
/// - `GET /health` - service health (uses the default ceilings)
pub fn configure(cfg: &mut web::ServiceConfig, state: &AppState) {
    let limits = &state.rate_limits;

    cfg.service(
        web::resource("/upload")
            .wrap(RateLimit::new(limits.upload.clone()))
            .route(web::post().to(upload_level)),
    )
    .service(
        web::resource("/levels")
            .wrap(RateLimit::new(limits.list_levels.clone()))
            .route(web::get().to(list_levels)),
    )
    .service(
        web::resource("/audio/{filename}")
            .wrap(RateLimit::new(limits.fetch_audio.clone()))
            .route(web::get().to(get_audio)),
    )
    .service(
        web::resource("/delete_level/{level_name}")
            .wrap(RateLimit::new(limits.delete_level.clone()))
            .route(web::delete().to(delete_level)),
    )
    .service(
        web::resource("/health")
            .wrap(RateLimit::new(limits.default.clone()))
            .route(web::get().to(health::health_check)),
    );
}
