use super::{as_object, failed, ok, ok_with, opt_id_field, store_failure, wire, ApiResult, App};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use models::{time, CustomerId, EventKind, MonitorId, MonitorStatus};
use std::sync::Arc;

/// Worker observation ingest. Unknown monitors are acknowledged with OK:
/// in-flight reports racing a monitor deletion must not trigger worker
/// retry loops.
pub(super) async fn report(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let object = as_object(&body)?;

    let required = ["monitor_id", "timestamp", "event_type", "monitor_status", "message"];
    let has_required = required.iter().all(|key| object.contains_key(*key));
    let strict_size = object.len() == required.len()
        || (object.len() == required.len() + 1 && object.contains_key("hash"));
    if !has_required || !strict_size {
        return Err(StatusCode::BAD_REQUEST);
    }

    let hash = match object.get("hash") {
        Some(value) => {
            let Some(encoded) = value.as_str() else {
                return Err(StatusCode::BAD_REQUEST);
            };
            match base64::decode(encoded) {
                Ok(hash) => hash,
                Err(_) => return Ok(failed("invalid MD5 sum value")),
            }
        }
        None => Vec::new(),
    };

    let Some(message) = object.get("message").and_then(|value| value.as_str()) else {
        return Err(StatusCode::BAD_REQUEST);
    };

    let monitor_id = match opt_id_field(object, "monitor_id", "invalid monitor ID") {
        Ok(Some(id)) => MonitorId::new(id),
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };

    let monitor = match overseer_sql::monitors::fetch_monitor(&app.pool, monitor_id).await {
        Ok(monitor) => monitor,
        Err(error) => return Ok(store_failure(error)),
    };
    let Some(monitor) = monitor else {
        tracing::info!(%monitor_id, "ignoring event for nonexistent monitor");
        return Ok(ok());
    };

    let timestamp = object
        .get("timestamp")
        .and_then(|value| value.as_f64())
        .unwrap_or(-1.0);
    if timestamp < time::ZORAN_EPOCH_START as f64
        || timestamp > (time::ZORAN_EPOCH_START + u32::MAX as u64) as f64
    {
        return Ok(failed("invalid timestamp"));
    }
    let timestamp = timestamp as u64;

    let kind = object
        .get("event_type")
        .and_then(|value| value.as_str())
        .and_then(EventKind::parse)
        .filter(|kind| *kind != EventKind::Invalid);
    let Some(kind) = kind else {
        return Ok(failed("invalid event type"));
    };

    let worker_status = object
        .get("monitor_status")
        .and_then(|value| value.as_str())
        .and_then(MonitorStatus::parse);
    let Some(worker_status) = worker_status else {
        return Ok(failed("invalid monitor status"));
    };

    tracing::info!(
        customer_id = %monitor.customer_id,
        %monitor_id,
        kind = kind.as_str(),
        timestamp,
        "received event",
    );

    match app
        .processor
        .report_event(
            monitor.customer_id,
            monitor_id,
            timestamp,
            kind,
            worker_status,
            message,
            &hash,
        )
        .await
    {
        Ok(()) => Ok(ok()),
        Err(error) => {
            tracing::error!(%monitor_id, %error, "failed to report event");
            Ok(failed("failed to report event"))
        }
    }
}

/// Last-known status per monitor, for one monitor or a whole customer.
pub(super) async fn status(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let object = as_object(&body)?;

    let mut recognized = 0;
    let monitor_id = match opt_id_field(object, "monitor_id", "invalid monitor ID") {
        Ok(id) => {
            recognized += id.is_some() as usize;
            id.map(MonitorId::new)
        }
        Err(response) => return Ok(response),
    };
    let customer_id = match opt_id_field(object, "customer_id", "invalid customer ID") {
        Ok(id) => {
            recognized += id.is_some() as usize;
            id.map(CustomerId::new)
        }
        Err(response) => return Ok(response),
    };
    if recognized != object.len() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if monitor_id.is_some() && customer_id.is_some() {
        return Ok(failed("customer ID or monitor ID, not both"));
    }

    let mut statuses = serde_json::Map::new();
    if let Some(monitor_id) = monitor_id {
        match overseer_sql::events::monitor_status(&app.pool, monitor_id).await {
            Ok(status) => {
                statuses.insert(monitor_id.to_string(), wire::status_json(status));
            }
            Err(error) => return Ok(store_failure(error)),
        }
    } else if let Some(customer_id) = customer_id {
        let monitors =
            match overseer_sql::monitors::fetch_monitors_by_user_order(&app.pool, customer_id).await
            {
                Ok(monitors) => monitors,
                Err(error) => return Ok(store_failure(error)),
            };
        let known: std::collections::HashMap<MonitorId, MonitorStatus> =
            match overseer_sql::events::monitor_status_by_customer(&app.pool, customer_id).await {
                Ok(known) => known.into_iter().collect(),
                Err(error) => return Ok(store_failure(error)),
            };
        for monitor in monitors {
            let status = known.get(&monitor.id).copied().unwrap_or_default();
            statuses.insert(monitor.id.to_string(), wire::status_json(status));
        }
    }

    Ok(ok_with([("monitors", statuses.into())]))
}

/// Event history for one monitor or one customer within a Unix-time window.
pub(super) async fn get(State(app): State<Arc<App>>, Json(body): Json<serde_json::Value>) -> ApiResult {
    let object = as_object(&body)?;

    let mut recognized = 0;
    let monitor_id = match opt_id_field(object, "monitor_id", "invalid monitor ID") {
        Ok(id) => {
            recognized += id.is_some() as usize;
            id.map(MonitorId::new)
        }
        Err(response) => return Ok(response),
    };
    let customer_id = match opt_id_field(object, "customer_id", "invalid customer ID") {
        Ok(id) => {
            recognized += id.is_some() as usize;
            id.map(CustomerId::new)
        }
        Err(response) => return Ok(response),
    };
    let start_timestamp =
        match super::opt_timestamp_field(object, "start_timestamp", "invalid start timestamp") {
            Ok(start) => {
                recognized += start.is_some() as usize;
                start.unwrap_or(0)
            }
            Err(response) => return Ok(response),
        };
    let end_timestamp =
        match super::opt_timestamp_field(object, "end_timestamp", "invalid end timestamp") {
            Ok(end) => {
                recognized += end.is_some() as usize;
                end.unwrap_or(u64::MAX)
            }
            Err(response) => return Ok(response),
        };
    if recognized != object.len() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if monitor_id.is_some() && customer_id.is_some() {
        return Ok(failed("customer ID or monitor ID, not both"));
    }

    let events = match monitor_id {
        Some(monitor_id) => {
            overseer_sql::events::fetch_events_by_monitor(
                &app.pool,
                monitor_id,
                start_timestamp,
                end_timestamp,
            )
            .await
        }
        None => {
            overseer_sql::events::fetch_events_by_customer(
                &app.pool,
                customer_id,
                start_timestamp,
                end_timestamp,
            )
            .await
        }
    };

    match events {
        Ok(events) => Ok(ok_with([("events", wire::events_json(&events, true, true))])),
        Err(error) => Ok(store_failure(error)),
    }
}
