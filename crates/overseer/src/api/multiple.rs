use super::{as_object, ok_with, opt_id_field, store_failure, wire, ApiResult, App};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use models::CustomerId;
use std::sync::Arc;

/// One-shot bundle of everything the customer UI needs: host/schemes,
/// monitors, events and per-monitor status for one customer.
pub(super) async fn list(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let object = as_object(&body)?;
    if object.len() != 1 || !object.contains_key("customer_id") {
        return Err(StatusCode::BAD_REQUEST);
    }
    let customer_id = match opt_id_field(object, "customer_id", "invalid customer ID") {
        Ok(Some(id)) => CustomerId::new(id),
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };

    let host_schemes =
        match overseer_sql::host_schemes::fetch_host_schemes(&app.pool, Some(customer_id)).await {
            Ok(host_schemes) => host_schemes,
            Err(error) => return Ok(store_failure(error)),
        };
    let monitors =
        match overseer_sql::monitors::fetch_monitors(&app.pool, Some(customer_id)).await {
            Ok(monitors) => monitors,
            Err(error) => return Ok(store_failure(error)),
        };
    let events = match overseer_sql::events::fetch_events_by_customer(
        &app.pool,
        Some(customer_id),
        0,
        u64::MAX,
    )
    .await
    {
        Ok(events) => events,
        Err(error) => return Ok(store_failure(error)),
    };
    let statuses =
        match overseer_sql::events::monitor_status_by_customer(&app.pool, customer_id).await {
            Ok(statuses) => statuses,
            Err(error) => return Ok(store_failure(error)),
        };

    let status_object: serde_json::Map<String, serde_json::Value> = statuses
        .into_iter()
        .map(|(monitor_id, status)| (monitor_id.to_string(), wire::status_json(status)))
        .collect();

    Ok(ok_with([
        ("host_schemes", wire::host_schemes_json(&host_schemes, false)),
        ("monitors", wire::monitors_json(&monitors, false)),
        ("events", wire::events_json(&events, false, false)),
        ("monitor_status", status_object.into()),
    ]))
}
