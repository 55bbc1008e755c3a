//! # Conversion Endpoints
//!
//! - `POST /convert`: convert a whole recording
//! - `POST /convert-chunk`: convert one chunk of a live stream
//!
//! Both take a multipart form with the audio in a field named `audio`.
//! Parameters come from the query string; text fields in the same form with
//! the same names override them.
//!
//! ## Response:
//! `audio/wav` (16-bit mono) at the input's sample rate, with timing headers:
//! - `X-Processing-Time-Ms`: whole milliseconds spent in the pipeline
//! - `X-Audio-Length-Seconds`: output duration (`/convert` only)

use crate::audio::{wav, NoiseType};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult, PipelineResult};
use crate::pipeline::{ChunkRequest, ConvertOutcome, ConvertRequest};
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Conversion parameters; anything left out falls back to the configured defaults.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ConvertParams {
    pub model: Option<String>,
    pub pitch_shift: Option<i32>,
    pub noise_type: Option<String>,
    pub noise_level: Option<f32>,
    pub enable_fluctuation: Option<bool>,
    pub session_id: Option<String>,
}

impl ConvertParams {
    /// Apply form text fields on top of the query parameters.
    pub fn merge_form(&mut self, fields: &HashMap<String, String>) -> AppResult<()> {
        for (name, value) in fields {
            match name.as_str() {
                "model" => self.model = Some(value.clone()),
                "session_id" => self.session_id = Some(value.clone()),
                "noise_type" => self.noise_type = Some(value.clone()),
                "pitch_shift" => self.pitch_shift = Some(parse_field(name, value)?),
                "noise_level" => self.noise_level = Some(parse_field(name, value)?),
                "enable_fluctuation" => self.enable_fluctuation = Some(parse_field(name, value)?),
                other => debug!(field = other, "Ignoring unknown form field"),
            }
        }
        Ok(())
    }

    pub fn convert_request(&self, config: &AppConfig) -> AppResult<ConvertRequest> {
        Ok(ConvertRequest {
            model: self.model_or_default(config),
            pitch_shift: self.pitch_shift.unwrap_or(0),
            noise_type: self.noise_type_or(config.noise.default_type)?,
            noise_level: self.checked_noise_level(config.noise.default_level)?,
            enable_fluctuation: self.enable_fluctuation.unwrap_or(true),
            session_id: self.session_id_or_default(),
        })
    }

    /// Chunks skip noise unless the caller asks for it.
    pub fn chunk_request(&self, config: &AppConfig) -> AppResult<ChunkRequest> {
        Ok(ChunkRequest {
            model: self.model_or_default(config),
            pitch_shift: self.pitch_shift.unwrap_or(0),
            noise_type: self.noise_type_or(config.noise.default_type)?,
            noise_level: self.checked_noise_level(0.0)?,
            enable_fluctuation: self.enable_fluctuation.unwrap_or(true),
            session_id: self.session_id_or_default(),
        })
    }

    fn model_or_default(&self, config: &AppConfig) -> String {
        match &self.model {
            Some(model) if !model.trim().is_empty() => model.trim().to_string(),
            _ => config.models.default_model.clone(),
        }
    }

    fn session_id_or_default(&self) -> String {
        match &self.session_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => "default".to_string(),
        }
    }

    fn noise_type_or(&self, default: NoiseType) -> AppResult<NoiseType> {
        match &self.noise_type {
            Some(name) => Ok(name.parse::<NoiseType>()?),
            None => Ok(default),
        }
    }

    fn checked_noise_level(&self, default: f32) -> AppResult<f32> {
        let level = self.noise_level.unwrap_or(default);
        if !level.is_finite() || level < 0.0 {
            return Err(AppError::ValidationError(format!(
                "noise_level must be a non-negative number, got {}",
                level
            )));
        }
        Ok(level)
    }
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> AppResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::ValidationError(format!("Invalid value for {}: {}", name, value)))
}

/// The multipart form: the audio bytes plus any text fields.
#[derive(Debug, Default)]
pub struct AudioUpload {
    pub audio: Vec<u8>,
    pub filename: Option<String>,
    pub fields: HashMap<String, String>,
}

/// Read the whole form, rejecting audio larger than `max_bytes`.
pub async fn read_upload(mut payload: Multipart, max_bytes: usize) -> AppResult<AudioUpload> {
    let mut upload = AudioUpload::default();
    let mut saw_audio = false;

    while let Some(item) = payload.next().await {
        let mut field: Field = item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let content_disposition = field
            .content_disposition()
            .ok_or_else(|| AppError::BadRequest("Missing content disposition".to_string()))?;
        let field_name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::BadRequest("Missing field name".to_string()))?
            .to_string();

        if field_name == "audio" {
            saw_audio = true;
            upload.filename = content_disposition.get_filename().map(|s| s.to_string());
            upload.audio = read_field(&mut field, max_bytes).await?;
        } else {
            let bytes = read_field(&mut field, 4096).await?;
            let value = String::from_utf8(bytes)
                .map_err(|_| AppError::BadRequest(format!("Field {} is not UTF-8", field_name)))?;
            upload.fields.insert(field_name, value);
        }
    }

    if !saw_audio {
        return Err(AppError::BadRequest("No audio field in form".to_string()));
    }
    if upload.audio.is_empty() {
        return Err(AppError::BadRequest("Audio field is empty".to_string()));
    }

    Ok(upload)
}

async fn read_field(field: &mut Field, max_bytes: usize) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
        if bytes.len() + chunk.len() > max_bytes {
            return Err(AppError::BadRequest(format!(
                "Upload too large (max: {} bytes)",
                max_bytes
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Convert a whole recording.
///
/// ## Endpoint: `POST /convert`
///
/// ## Query parameters (all optional):
/// `model`, `pitch_shift`, `noise_type` (`cafe|street|room|white`), `noise_level`,
/// `enable_fluctuation`, `session_id`
pub async fn convert(
    state: web::Data<AppState>,
    query: web::Query<ConvertParams>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let config = state.config();
    let upload = read_upload(payload, config.performance.max_upload_bytes).await?;

    let mut params = query.into_inner();
    params.merge_form(&upload.fields)?;
    let request = params.convert_request(config)?;

    let buffer = wav::decode(&upload.audio, config.audio.default_sample_rate)?;
    info!(
        filename = upload.filename.as_deref().unwrap_or("unknown"),
        model = %request.model,
        pitch_shift = request.pitch_shift,
        sample_rate = buffer.sample_rate,
        duration_seconds = buffer.duration_seconds(),
        "Converting audio"
    );

    let outcome = record(&state, state.pipeline.convert(buffer, &request).await)?;
    info!(processing_ms = outcome.processing_time_ms(), degraded = outcome.degraded, "Conversion complete");

    Ok(HttpResponse::Ok()
        .content_type("audio/wav")
        .insert_header(("X-Processing-Time-Ms", outcome.processing_time.as_millis().to_string()))
        .insert_header(("X-Audio-Length-Seconds", outcome.duration_seconds().to_string()))
        .body(wav::encode_wav(&outcome.buffer)?))
}

/// Convert one chunk of a live stream.
///
/// ## Endpoint: `POST /convert-chunk`
///
/// Same parameters as `/convert`, except that noise defaults to off. Chunks
/// sharing a `session_id` are cross-faded into each other.
pub async fn convert_chunk(
    state: web::Data<AppState>,
    query: web::Query<ConvertParams>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let config = state.config();
    let upload = read_upload(payload, config.performance.max_upload_bytes).await?;

    let mut params = query.into_inner();
    params.merge_form(&upload.fields)?;
    let request = params.chunk_request(config)?;

    let buffer = wav::decode(&upload.audio, config.audio.default_sample_rate)?;
    debug!(
        session_id = %request.session_id,
        samples = buffer.len(),
        sample_rate = buffer.sample_rate,
        "Converting chunk"
    );

    let outcome = record(&state, state.pipeline.convert_chunk(buffer, &request).await)?;

    Ok(HttpResponse::Ok()
        .content_type("audio/wav")
        .insert_header(("X-Processing-Time-Ms", outcome.processing_time.as_millis().to_string()))
        .body(wav::encode_wav(&outcome.buffer)?))
}

fn record(state: &AppState, result: PipelineResult<ConvertOutcome>) -> AppResult<ConvertOutcome> {
    match result {
        Ok(outcome) => {
            state.record_conversion(outcome.processing_time_ms(), outcome.duration_seconds(), outcome.degraded);
            Ok(outcome)
        }
        Err(e) => {
            warn!(error = %e, "Conversion request failed");
            state.record_conversion_failure();
            Err(e.into())
        }
    }
}
