use super::{
    as_object, failed, ok, ok_with, opt_id_field, opt_timestamp_field, store_failure, wire,
    ApiResult, App,
};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use models::{CustomerId, HostScheme, HostSchemeId};
use std::sync::Arc;

pub(super) async fn get(State(app): State<Arc<App>>, Json(body): Json<serde_json::Value>) -> ApiResult {
    let object = as_object(&body)?;
    if object.len() != 1 || !object.contains_key("host_scheme_id") {
        return Err(StatusCode::BAD_REQUEST);
    }
    let host_scheme_id = match opt_id_field(object, "host_scheme_id", "invalid host/scheme ID") {
        Ok(Some(id)) => HostSchemeId::new(id),
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };

    match overseer_sql::host_schemes::fetch_host_scheme(&app.pool, host_scheme_id).await {
        Ok(Some(host_scheme)) => Ok(ok_with([(
            "host_scheme",
            wire::host_scheme_json(&host_scheme, true),
        )])),
        Ok(None) => Ok(failed("unknown host/scheme ID")),
        Err(error) => Ok(store_failure(error)),
    }
}

pub(super) async fn create(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let object = as_object(&body)?;
    if object.len() != 2 || !object.contains_key("customer_id") || !object.contains_key("url") {
        return Err(StatusCode::BAD_REQUEST);
    }
    let customer_id = match opt_id_field(object, "customer_id", "invalid customer ID") {
        Ok(Some(id)) => CustomerId::new(id),
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };
    let Some(url) = object.get("url").and_then(|value| value.as_str()) else {
        return Err(StatusCode::BAD_REQUEST);
    };

    let url = match HostScheme::parse_url(url) {
        Ok(url) => url,
        Err(error) => return Ok(failed(error.to_string())),
    };

    match overseer_sql::host_schemes::create_host_scheme(&app.pool, customer_id, &url).await {
        Ok(host_scheme) => Ok(ok_with([
            ("host_scheme_id", host_scheme.id.get().into()),
            ("host_scheme", wire::host_scheme_json(&host_scheme, true)),
        ])),
        Err(error) => {
            tracing::error!(%customer_id, %error, "failed to create host/scheme");
            Ok(failed("failed to create host/scheme"))
        }
    }
}

pub(super) async fn modify(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let object = as_object(&body)?;
    if object.len() < 2 || !object.contains_key("host_scheme_id") {
        return Err(StatusCode::BAD_REQUEST);
    }
    let host_scheme_id = match opt_id_field(object, "host_scheme_id", "invalid host/scheme ID") {
        Ok(Some(id)) => HostSchemeId::new(id),
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };

    let mut host_scheme =
        match overseer_sql::host_schemes::fetch_host_scheme(&app.pool, host_scheme_id).await {
            Ok(Some(host_scheme)) => host_scheme,
            Ok(None) => return Ok(failed("unknown host/scheme ID")),
            Err(error) => return Ok(store_failure(error)),
        };

    match opt_id_field(object, "customer_id", "invalid customer ID") {
        Ok(Some(customer_id)) => host_scheme.customer_id = CustomerId::new(customer_id),
        Ok(None) => (),
        Err(response) => return Ok(response),
    }
    if let Some(url) = object.get("url") {
        let Some(url) = url.as_str() else {
            return Err(StatusCode::BAD_REQUEST);
        };
        match HostScheme::parse_url(url) {
            Ok(url) => host_scheme.url = url,
            Err(error) => return Ok(failed(error.to_string())),
        }
    }

    match crate::reconciler::modify_host_scheme(&app.pool, &app.scheduler, &host_scheme).await {
        Ok(()) => Ok(ok()),
        Err(error) => {
            tracing::error!(%host_scheme_id, %error, "failed to modify host/scheme");
            Ok(failed("failed to modify host/scheme"))
        }
    }
}

/// Worker-reported SSL expiration update; the sweeper turns the stored
/// timestamp into events. An unknown host/scheme is acknowledged silently
/// (the row may have been deleted while the probe was in flight).
pub(super) async fn certificate(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let object = as_object(&body)?;
    if object.len() != 3
        || !object.contains_key("monitor_id")
        || !object.contains_key("host_scheme_id")
        || !object.contains_key("expiration_timestamp")
    {
        return Err(StatusCode::BAD_REQUEST);
    }
    let host_scheme_id = match opt_id_field(object, "host_scheme_id", "invalid host/scheme ID") {
        Ok(Some(id)) => HostSchemeId::new(id),
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };
    if let Err(response) = opt_id_field(object, "monitor_id", "invalid monitor ID") {
        return Ok(response);
    }
    let expiration = match opt_timestamp_field(
        object,
        "expiration_timestamp",
        "invalid expiration timestamp.",
    ) {
        Ok(Some(expiration)) => expiration,
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };

    match overseer_sql::host_schemes::update_ssl_expiration(&app.pool, host_scheme_id, expiration)
        .await
    {
        Ok(true) => Ok(ok()),
        Ok(false) => {
            tracing::info!(%host_scheme_id, "certificate update for unknown host/scheme");
            Ok(ok())
        }
        Err(error) => Ok(store_failure(error)),
    }
}

pub(super) async fn delete(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let object = as_object(&body)?;
    if object.len() != 1 {
        return Err(StatusCode::BAD_REQUEST);
    }

    if object.contains_key("host_scheme_id") {
        let host_scheme_id = match opt_id_field(object, "host_scheme_id", "invalid host/scheme ID")
        {
            Ok(Some(id)) => HostSchemeId::new(id),
            Ok(None) => return Err(StatusCode::BAD_REQUEST),
            Err(response) => return Ok(response),
        };
        let host_scheme =
            match overseer_sql::host_schemes::fetch_host_scheme(&app.pool, host_scheme_id).await {
                Ok(Some(host_scheme)) => host_scheme,
                Ok(None) => return Ok(failed("unknown host/scheme ID")),
                Err(error) => return Ok(store_failure(error)),
            };
        match crate::reconciler::delete_host_scheme(&app.pool, &app.scheduler, &host_scheme).await {
            Ok(()) => Ok(ok()),
            Err(error) => {
                tracing::error!(%host_scheme_id, %error, "failed to delete host/scheme");
                Ok(failed("failed to delete host/scheme"))
            }
        }
    } else if object.contains_key("customer_id") {
        let customer_id = match opt_id_field(object, "customer_id", "invalid customer ID") {
            Ok(Some(id)) => CustomerId::new(id),
            Ok(None) => return Err(StatusCode::BAD_REQUEST),
            Err(response) => return Ok(response),
        };
        match crate::reconciler::delete_customer(&app.pool, &app.scheduler, customer_id).await {
            Ok(()) => Ok(ok()),
            Err(error) => {
                tracing::error!(%customer_id, %error, "failed to delete customer host/schemes");
                Ok(failed("failed to delete host/schemes for customer"))
            }
        }
    } else {
        Err(StatusCode::BAD_REQUEST)
    }
}

pub(super) async fn list(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let object = as_object(&body)?;
    if object.len() > 1 || (object.len() == 1 && !object.contains_key("customer_id")) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let customer_id = match opt_id_field(object, "customer_id", "invalid customer ID") {
        Ok(customer_id) => customer_id.map(CustomerId::new),
        Err(response) => return Ok(response),
    };

    match overseer_sql::host_schemes::fetch_host_schemes(&app.pool, customer_id).await {
        Ok(host_schemes) => Ok(ok_with([(
            "data",
            wire::host_schemes_json(&host_schemes, true),
        )])),
        Err(error) => Ok(store_failure(error)),
    }
}
