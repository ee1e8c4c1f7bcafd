use super::{
    as_object, failed, ok, ok_with, opt_id_field, opt_timestamp_field, store_failure, ApiResult,
    App, PlotOptions,
};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use models::{CustomerId, Resource, ValueType};
use std::sync::Arc;

pub(super) async fn available(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let object = as_object(&body)?;
    if object.len() != 1 || !object.contains_key("customer_id") {
        return Err(StatusCode::BAD_REQUEST);
    }
    let customer_id = match opt_id_field(object, "customer_id", "invalid customer ID.") {
        Ok(Some(id)) => CustomerId::new(id),
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };

    match app.resources.active_resources(customer_id).await {
        Ok(active) => {
            let value_types: Vec<serde_json::Value> = active
                .active_value_types()
                .into_iter()
                .map(|value_type| serde_json::Value::from(value_type as u64))
                .collect();
            Ok(ok_with([("value_types", value_types.into())]))
        }
        Err(error) => Ok(store_failure(error)),
    }
}

pub(super) async fn create(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let object = as_object(&body)?;
    if object.len() != 4
        || !object.contains_key("customer_id")
        || !object.contains_key("value_type")
        || !object.contains_key("value")
        || !object.contains_key("timestamp")
    {
        return Err(StatusCode::BAD_REQUEST);
    }
    let customer_id = match opt_id_field(object, "customer_id", "invalid customer ID.") {
        Ok(Some(id)) => CustomerId::new(id),
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };
    let Some(value_type) = value_type_field(object) else {
        return Ok(failed("invalid value type"));
    };
    let Some(value) = object.get("value").and_then(|value| value.as_f64()) else {
        return Err(StatusCode::BAD_REQUEST);
    };
    let timestamp = match opt_timestamp_field(object, "timestamp", "invalid timestamp.") {
        Ok(Some(timestamp)) => timestamp,
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };

    let resource = Resource {
        customer_id,
        value_type,
        value: value as f32,
        timestamp,
    };
    match app.resources.record(&resource).await {
        Ok(()) => Ok(ok()),
        Err(error) => {
            tracing::error!(%customer_id, %error, "failed to record resource");
            Ok(failed("could not add"))
        }
    }
}

pub(super) async fn list(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let object = as_object(&body)?;
    if object.len() < 2
        || !object.contains_key("customer_id")
        || !object.contains_key("value_type")
    {
        return Err(StatusCode::BAD_REQUEST);
    }
    let customer_id = match opt_id_field(object, "customer_id", "invalid customer ID.") {
        Ok(Some(id)) => CustomerId::new(id),
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };
    let Some(value_type) = value_type_field(object) else {
        return Ok(failed("invalid value type"));
    };
    let start_timestamp =
        match opt_timestamp_field(object, "start_timestamp", "invalid start timestamp") {
            Ok(start) => start.unwrap_or(0),
            Err(response) => return Ok(response),
        };
    let end_timestamp = match opt_timestamp_field(object, "end_timestamp", "invalid end timestamp")
    {
        Ok(end) => end.unwrap_or(u64::MAX),
        Err(response) => return Ok(response),
    };

    match overseer_sql::resources::fetch_resources(
        &app.pool,
        customer_id,
        value_type,
        start_timestamp,
        end_timestamp,
    )
    .await
    {
        Ok(resources) => Ok(ok_with([(
            "data",
            serde_json::json!({
                "customer_id": customer_id,
                "value_type": value_type,
                "resources": resources_json(&resources),
            }),
        )])),
        Err(error) => Ok(store_failure(error)),
    }
}

pub(super) async fn purge(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let object = as_object(&body)?;
    if object.len() != 2
        || !object.contains_key("customer_id")
        || !object.contains_key("timestamp")
    {
        return Err(StatusCode::BAD_REQUEST);
    }
    let customer_id = match opt_id_field(object, "customer_id", "invalid customer ID.") {
        Ok(Some(id)) => CustomerId::new(id),
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };
    let timestamp = match opt_timestamp_field(object, "timestamp", "invalid timestamp.") {
        Ok(Some(timestamp)) => timestamp,
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };

    match overseer_sql::resources::purge_resources(&app.pool, customer_id, timestamp).await {
        Ok(_) => {
            app.resources.evict(customer_id);
            Ok(ok())
        }
        Err(error) => Ok(store_failure(error)),
    }
}

/// Renders one resource stream through the injected plotter. The success
/// response is the binary image; everything else is the JSON protocol.
pub(super) async fn plot(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, StatusCode> {
    let object = as_object(&body)?;
    let customer_id = match opt_id_field(object, "customer_id", "invalid customer ID.") {
        Ok(Some(id)) => CustomerId::new(id),
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response.into_response()),
    };
    let Some(value_type) = value_type_field(object) else {
        return Ok(failed("invalid value type").into_response());
    };
    let start_timestamp =
        match opt_timestamp_field(object, "start_timestamp", "invalid start timestamp") {
            Ok(start) => start.unwrap_or(0),
            Err(response) => return Ok(response.into_response()),
        };
    let end_timestamp = match opt_timestamp_field(object, "end_timestamp", "invalid end timestamp")
    {
        Ok(end) => end.unwrap_or(u64::MAX),
        Err(response) => return Ok(response.into_response()),
    };

    let scale_factor = object
        .get("scale_factor")
        .and_then(|value| value.as_f64())
        .unwrap_or(1.0);
    if scale_factor <= 0.0 {
        return Ok(failed("invalid scale factor").into_response());
    }

    let options = PlotOptions {
        title: string_option(object, "title"),
        x_axis_label: string_option(object, "x_axis_label"),
        y_axis_label: string_option(object, "y_axis_label"),
        date_format: string_option(object, "date_format"),
        title_font: string_option(object, "title_font"),
        axis_title_font: string_option(object, "axis_title_font"),
        scale_factor,
        width: dimension_option(object, "width"),
        height: dimension_option(object, "height"),
    };

    let Some(plotter) = app.plotter.as_ref() else {
        return Ok(failed("plotting unavailable").into_response());
    };

    let series = match overseer_sql::resources::fetch_resources(
        &app.pool,
        customer_id,
        value_type,
        start_timestamp,
        end_timestamp,
    )
    .await
    {
        Ok(series) => series,
        Err(error) => return Ok(store_failure(error).into_response()),
    };

    match plotter.render(&series, &options) {
        Ok(image) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, image.content_type)],
            image.bytes,
        )
            .into_response()),
        Err(error) => {
            tracing::error!(%customer_id, %error, "plot rendering failed");
            Ok(failed("could not render plot").into_response())
        }
    }
}

fn value_type_field(object: &serde_json::Map<String, serde_json::Value>) -> Option<ValueType> {
    let value = object.get("value_type")?.as_u64()?;
    ValueType::try_from(value).ok()
}

fn string_option(
    object: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<String> {
    object
        .get(key)
        .and_then(|value| value.as_str())
        .map(str::to_string)
}

fn dimension_option(object: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<u32> {
    object
        .get(key)
        .and_then(|value| value.as_u64())
        .and_then(|value| u32::try_from(value).ok())
}

fn resources_json(resources: &[Resource]) -> serde_json::Value {
    resources
        .iter()
        .map(|resource| {
            serde_json::json!({
                "value": resource.value,
                "timestamp": resource.timestamp,
            })
        })
        .collect::<Vec<_>>()
        .into()
}
