use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_files::NamedFile;
use actix_web::web;

/// Serve an uploaded audio file.
///
/// ## Endpoint: `GET /audio/{filename}`
///
/// The name goes through the same sanitizer as uploads. Any file in the
/// upload directory can be fetched, whether or not a level references it.
/// The content type is inferred from the file extension.
pub async fn get_audio(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<NamedFile> {
    let requested = path.into_inner();
    let not_found = || AppError::NotFound(format!("Audio file '{}' not found", requested));

    let file_path = state.files.path_for(&requested).ok_or_else(not_found)?;

    match NamedFile::open_async(&file_path).await {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
        Err(e) => Err(e.into()),
    }
}
