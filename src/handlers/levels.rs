//! # Level Endpoints
//!
//! - `POST /upload` - store an audio file and append its level record
//! - `GET /levels` - list every level record
//! - `DELETE /delete_level/{level_name}` - remove a level and its audio file

use crate::error::{AppError, AppResult};
use crate::level::Level;
use crate::state::AppState;
use crate::storage::sanitize_filename;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

/// Multipart field carrying the audio bytes.
const AUDIO_FIELD: &str = "audio_file";

/// Text fields a level upload carries; any other part is discarded unread.
const TEXT_FIELDS: [&str; 4] = ["level_name", "youtube_link", "beat_interval", "beat_threshold"];

/// Cap on each text field.
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;

/// The file part of an upload, before validation.
#[derive(Debug)]
struct UploadedFile {
    filename: String,
    bytes: Vec<u8>,
}

/// Everything the client sent in the multipart body.
///
/// When a field name repeats, the first occurrence wins.
#[derive(Debug, Default)]
struct UploadForm {
    audio_file: Option<UploadedFile>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    /// Drain the multipart stream.
    ///
    /// Only the first audio part and the first occurrence of each known text
    /// field are buffered. The audio part is capped at `max_file_bytes` and
    /// each text field at [`MAX_TEXT_FIELD_BYTES`]; repeats and unknown parts
    /// are read through and dropped.
    async fn read(payload: &mut Multipart, max_file_bytes: usize) -> AppResult<Self> {
        let mut form = UploadForm::default();

        while let Some(item) = payload.next().await {
            let mut field: Field =
                item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

            let content_disposition = field.content_disposition().ok_or_else(|| {
                AppError::BadRequest("Missing content disposition".to_string())
            })?;
            let name = content_disposition
                .get_name()
                .ok_or_else(|| AppError::BadRequest("Missing field name".to_string()))?
                .to_string();

            if name == AUDIO_FIELD && form.audio_file.is_none() {
                let filename = content_disposition
                    .get_filename()
                    .unwrap_or_default()
                    .to_string();
                let bytes = read_field(&mut field, &name, max_file_bytes).await?;
                form.audio_file = Some(UploadedFile { filename, bytes });
            } else if TEXT_FIELDS.contains(&name.as_str()) && !form.fields.contains_key(&name) {
                let bytes = read_field(&mut field, &name, MAX_TEXT_FIELD_BYTES).await?;
                let value = String::from_utf8(bytes).map_err(|_| {
                    AppError::BadRequest(format!("Field '{}' is not valid UTF-8", name))
                })?;
                form.fields.insert(name, value);
            } else {
                skip_field(&mut field).await?;
            }
        }

        Ok(form)
    }

    fn text(&self, name: &str) -> AppResult<String> {
        self.fields
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::BadRequest(format!("Missing form field '{}'", name)))
    }

    fn number(&self, name: &str) -> AppResult<f64> {
        let raw = self.text(name)?;
        parse_beat_parameter(name, &raw)
    }
}

async fn read_field(field: &mut Field, name: &str, limit: usize) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::PayloadTooLarge(format!(
                "Field '{}' too large (max: {} bytes)",
                name, limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn skip_field(field: &mut Field) -> AppResult<()> {
    while let Some(chunk) = field.next().await {
        chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
    }
    Ok(())
}

/// Parse a beat-detection parameter.
///
/// Surrounding whitespace is ignored. NaN and infinities are rejected because
/// JSON cannot represent them and they would corrupt the levels file.
fn parse_beat_parameter(name: &str, raw: &str) -> AppResult<f64> {
    let value: f64 = raw.trim().parse().map_err(|_| {
        AppError::BadRequest(format!("Field '{}' must be a number, got '{}'", name, raw))
    })?;

    if !value.is_finite() {
        return Err(AppError::BadRequest(format!(
            "Field '{}' must be a finite number",
            name
        )));
    }
    Ok(value)
}

/// Upload a level.
///
/// ## Endpoint: `POST /upload`
///
/// ## Request:
/// Multipart form data with fields `audio_file` (file), `level_name`,
/// `youtube_link`, `beat_interval`, `beat_threshold`.
///
/// ## Response:
/// ```json
/// { "message": "Level uploaded successfully" }
/// ```
///
/// Every check runs before anything is written, so a rejected upload leaves
/// both the levels file and the upload directory untouched.
pub async fn upload_level(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let form = UploadForm::read(&mut payload, state.config.storage.max_upload_bytes).await?;

    let audio = form
        .audio_file
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("No audio file part".to_string()))?;
    if audio.filename.is_empty() {
        return Err(AppError::BadRequest("No selected file".to_string()));
    }
    let filename = sanitize_filename(&audio.filename).ok_or_else(|| {
        AppError::BadRequest(format!("Invalid audio filename '{}'", audio.filename))
    })?;

    let level_name = form.text("level_name")?;
    let youtube_link = form.text("youtube_link")?;
    let beat_interval = form.number("beat_interval")?;
    let beat_threshold = form.number("beat_threshold")?;

    state.files.put(&filename, &audio.bytes).await?;

    let level = Level::new(
        level_name,
        youtube_link,
        beat_interval,
        beat_threshold,
        filename,
    );
    info!(
        level_name = %level.level_name,
        audio_filename = %level.audio_filename,
        size_bytes = audio.bytes.len(),
        "Level uploaded"
    );
    state.levels.append(level).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Level uploaded successfully" })))
}

/// List every stored level, in upload order.
///
/// ## Endpoint: `GET /levels`
pub async fn list_levels(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let levels = state.levels.load().await?;
    Ok(HttpResponse::Ok().json(levels))
}

/// Delete the first level with this exact name, then its audio file.
///
/// ## Endpoint: `DELETE /delete_level/{level_name}`
///
/// Removing the audio file is best effort: a file that is already gone is
/// fine, and any other failure is logged without failing the request, since
/// the record itself is already deleted.
pub async fn delete_level(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let level_name = path.into_inner();

    let removed = state
        .levels
        .remove_first(&level_name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Level '{}' not found", level_name)))?;

    match state.files.delete(&removed.audio_filename).await {
        Ok(true) => {}
        Ok(false) => warn!(
            level_name = %level_name,
            audio_filename = %removed.audio_filename,
            "Audio file was already missing"
        ),
        Err(e) => warn!(
            level_name = %level_name,
            audio_filename = %removed.audio_filename,
            error = %e,
            "Failed to delete audio file"
        ),
    }

    info!(level_name = %level_name, "Level deleted");
    Ok(HttpResponse::Ok().json(json!({
        "message": format!("Level '{}' deleted successfully", level_name)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_beat_parameter() {
        assert_eq!(parse_beat_parameter("beat_interval", "0.5").unwrap(), 0.5);
        assert_eq!(parse_beat_parameter("beat_interval", " 2 ").unwrap(), 2.0);
        assert_eq!(parse_beat_parameter("beat_interval", "-1e-3").unwrap(), -0.001);
    }

    #[test]
    fn test_parse_beat_parameter_rejects_bad_input() {
        for raw in ["", "fast", "0.5.1", "NaN", "inf", "-infinity"] {
            let err = parse_beat_parameter("beat_threshold", raw).unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_form_text_reports_missing_field() {
        let form = UploadForm::default();
        let err = form.text("level_name").unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("level_name")));
    }
}
