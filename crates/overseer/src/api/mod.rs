//! Thin REST adapters: JSON in, `status` string out, no business logic.
//! Structural problems (wrong JSON shape, missing or extra fields) are
//! HTTP 400; business failures are HTTP 200 with `status: "failed, <reason>"`.
//! Shared-secret authentication belongs to the surrounding framework.

use crate::dispatcher::Dispatcher;
use crate::fleet::Fleet;
use crate::processor::EventProcessor;
use crate::resources::ResourceCache;
use crate::scheduler::SchedulerHandle;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Json;
use models::Resource;
use std::sync::Arc;

mod event;
mod host_scheme;
mod monitor;
mod multiple;
mod resource;
mod wire;

/// Options forwarded to the external chart renderer.
#[derive(Debug, Default, Clone)]
pub struct PlotOptions {
    pub title: Option<String>,
    pub x_axis_label: Option<String>,
    pub y_axis_label: Option<String>,
    pub date_format: Option<String>,
    pub title_font: Option<String>,
    pub axis_title_font: Option<String>,
    pub scale_factor: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

pub struct PlotImage {
    /// `image/png` or `image/jpeg`.
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Seam to the out-of-process chart renderer. The core only supplies the
/// series; rendering is not its business.
pub trait Plotter: Send + Sync {
    fn render(&self, series: &[Resource], options: &PlotOptions) -> anyhow::Result<PlotImage>;
}

pub struct App {
    pub pool: sqlx::PgPool,
    pub dispatcher: Arc<Dispatcher>,
    pub processor: Arc<EventProcessor>,
    pub fleet: Arc<Fleet>,
    pub scheduler: SchedulerHandle,
    pub resources: Arc<ResourceCache>,
    pub plotter: Option<Arc<dyn Plotter>>,
}

pub fn build_router(app: Arc<App>) -> axum::Router {
    axum::Router::new()
        .route("/host_scheme/get", post(host_scheme::get))
        .route("/host_scheme/create", post(host_scheme::create))
        .route("/host_scheme/modify", post(host_scheme::modify))
        .route("/host_scheme/certificate", post(host_scheme::certificate))
        .route("/host_scheme/delete", post(host_scheme::delete))
        .route("/host_scheme/list", post(host_scheme::list))
        .route("/monitor/get", post(monitor::get))
        .route("/monitor/delete", post(monitor::delete))
        .route("/monitor/list", post(monitor::list))
        .route("/monitor/update", post(monitor::update))
        .route("/event/report", post(event::report))
        .route("/event/status", post(event::status))
        .route("/event/get", post(event::get))
        .route("/resource/available", post(resource::available))
        .route("/resource/create", post(resource::create))
        .route("/resource/list", post(resource::list))
        .route("/resource/purge", post(resource::purge))
        .route("/resource/plot", post(resource::plot))
        .route("/multiple/list", post(multiple::list))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app)
}

pub(crate) type ApiResult = Result<Json<serde_json::Value>, StatusCode>;

/// The request body must be a JSON object.
pub(crate) fn as_object(
    body: &serde_json::Value,
) -> Result<&serde_json::Map<String, serde_json::Value>, StatusCode> {
    body.as_object().ok_or(StatusCode::BAD_REQUEST)
}

pub(crate) fn ok() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "OK"}))
}

pub(crate) fn ok_with(
    fields: impl IntoIterator<Item = (&'static str, serde_json::Value)>,
) -> Json<serde_json::Value> {
    let mut object = serde_json::Map::new();
    object.insert("status".to_string(), "OK".into());
    for (key, value) in fields {
        object.insert(key.to_string(), value);
    }
    Json(object.into())
}

pub(crate) fn failed(reason: impl AsRef<str>) -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": format!("failed, {}", reason.as_ref())}))
}

/// A store error is never surfaced verbatim; log it and fail the call.
pub(crate) fn store_failure(error: impl std::fmt::Display) -> Json<serde_json::Value> {
    tracing::error!(%error, "store operation failed");
    failed("internal error")
}

/// Reads an optional positive 32-bit id field. `Err` carries the business
/// failure reason for an out-of-range value.
pub(crate) fn opt_id_field(
    object: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    reason: &str,
) -> Result<Option<u32>, Json<serde_json::Value>> {
    let Some(value) = object.get(key) else {
        return Ok(None);
    };
    let id = value.as_f64().unwrap_or(-1.0);
    if id > 0.0 && id <= u32::MAX as f64 && id.fract() == 0.0 {
        Ok(Some(id as u32))
    } else {
        Err(failed(reason))
    }
}

/// Reads an optional non-negative timestamp field.
pub(crate) fn opt_timestamp_field(
    object: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    reason: &str,
) -> Result<Option<u64>, Json<serde_json::Value>> {
    let Some(value) = object.get(key) else {
        return Ok(None);
    };
    let timestamp = value.as_f64().unwrap_or(-1.0);
    if timestamp >= 0.0 {
        Ok(Some(timestamp as u64))
    } else {
        Err(failed(reason))
    }
}
