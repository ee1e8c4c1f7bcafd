use super::{as_object, failed, ok, ok_with, opt_id_field, store_failure, wire, ApiResult, App};
use crate::reconciler::{self, EntryError, MonitorEntry};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use models::{ContentCheckMode, CustomerId, HttpMethod, MonitorId, PostContentType};
use std::sync::Arc;

pub(super) async fn get(State(app): State<Arc<App>>, Json(body): Json<serde_json::Value>) -> ApiResult {
    let object = as_object(&body)?;
    if object.len() != 1 || !object.contains_key("monitor_id") {
        return Err(StatusCode::BAD_REQUEST);
    }
    let monitor_id = match opt_id_field(object, "monitor_id", "invalid monitor ID") {
        Ok(Some(id)) => MonitorId::new(id),
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };

    match overseer_sql::monitors::fetch_monitor(&app.pool, monitor_id).await {
        Ok(Some(monitor)) => Ok(ok_with([(
            "monitor",
            wire::monitor_json(&monitor, true, true),
        )])),
        Ok(None) => Ok(failed("unknown monitor ID")),
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

    if object.contains_key("monitor_id") {
        let monitor_id = match opt_id_field(object, "monitor_id", "invalid monitor ID") {
            Ok(Some(id)) => MonitorId::new(id),
            Ok(None) => return Err(StatusCode::BAD_REQUEST),
            Err(response) => return Ok(response),
        };
        let monitor = match overseer_sql::monitors::fetch_monitor(&app.pool, monitor_id).await {
            Ok(Some(monitor)) => monitor,
            Ok(None) => return Ok(failed("unknown monitor ID")),
            Err(error) => return Ok(store_failure(error)),
        };
        match reconciler::delete_monitor(&app.pool, &app.scheduler, &monitor).await {
            Ok(()) => Ok(ok()),
            Err(error) => {
                tracing::error!(%monitor_id, %error, "failed to delete monitor");
                Ok(failed("delete failed"))
            }
        }
    } else if object.contains_key("customer_id") {
        let customer_id = match opt_id_field(object, "customer_id", "invalid customer ID") {
            Ok(Some(id)) => CustomerId::new(id),
            Ok(None) => return Err(StatusCode::BAD_REQUEST),
            Err(response) => return Ok(response),
        };
        match reconciler::delete_customer(&app.pool, &app.scheduler, customer_id).await {
            Ok(()) => Ok(ok()),
            Err(error) => {
                tracing::error!(%customer_id, %error, "failed to delete customer monitors");
                Ok(failed("delete failed"))
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

    match overseer_sql::monitors::fetch_monitors(&app.pool, customer_id).await {
        Ok(monitors) => Ok(ok_with([("data", wire::monitors_json(&monitors, true))])),
        Err(error) => Ok(store_failure(error)),
    }
}

/// Bulk update of a customer's entire monitor list (spec'd reconciliation).
pub(super) async fn update(
    State(app): State<Arc<App>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let object = as_object(&body)?;
    if object.len() != 2 || !object.contains_key("customer_id") || !object.contains_key("data") {
        return Err(StatusCode::BAD_REQUEST);
    }
    let customer_id = match opt_id_field(object, "customer_id", "invalid customer ID") {
        Ok(Some(id)) => CustomerId::new(id),
        Ok(None) => return Err(StatusCode::BAD_REQUEST),
        Err(response) => return Ok(response),
    };

    let entries = match object.get("data") {
        Some(serde_json::Value::Array(values)) => {
            let mut entries = Vec::with_capacity(values.len());
            for value in values {
                entries.push(parse_entry(None, value).ok_or(StatusCode::BAD_REQUEST)?);
            }
            entries
        }
        // Object form: keys are the slot numbers.
        Some(serde_json::Value::Object(slots)) => {
            let mut entries = Vec::with_capacity(slots.len());
            for (slot, value) in slots {
                let ordering: u16 = slot.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
                entries.push(parse_entry(Some(ordering), value).ok_or(StatusCode::BAD_REQUEST)?);
            }
            entries
        }
        _ => return Err(StatusCode::BAD_REQUEST),
    };

    let capabilities =
        match overseer_sql::capabilities::fetch_customer_capabilities(&app.pool, customer_id).await
        {
            Ok(Some(capabilities)) => capabilities,
            Ok(None) => return Ok(failed("unknown customer ID")),
            Err(error) => return Ok(store_failure(error)),
        };

    let errors =
        reconciler::update_monitors(&app.pool, &app.scheduler, &capabilities, entries).await;
    if errors.is_empty() {
        Ok(ok())
    } else {
        Ok(Json(serde_json::json!({
            "status": "failed, could not update monitors",
            "errors": errors_json(&errors),
        })))
    }
}

fn errors_json(errors: &[EntryError]) -> serde_json::Value {
    errors
        .iter()
        .map(|error| {
            serde_json::json!({
                "user_ordering": error.user_ordering,
                "message": error.message,
            })
        })
        .collect::<Vec<_>>()
        .into()
}

/// Decodes one submitted entry. Structural problems yield None (HTTP 400);
/// semantic problems are the reconciler's to report per entry.
fn parse_entry(ordering_hint: Option<u16>, value: &serde_json::Value) -> Option<MonitorEntry> {
    let object = value.as_object()?;

    let user_ordering = match object.get("user_ordering") {
        Some(value) => {
            let ordering = value.as_u64()?;
            u16::try_from(ordering).ok()?
        }
        None => ordering_hint?,
    };
    let uri = object.get("uri")?.as_str()?.to_string();

    let method = match object.get("method") {
        Some(value) => HttpMethod::parse(value.as_str()?)?,
        None => HttpMethod::Get,
    };
    let content_check_mode = match object.get("content_check_mode") {
        Some(value) => ContentCheckMode::parse(value.as_str()?)?,
        None => ContentCheckMode::NoCheck,
    };
    let keywords = match object.get("keywords") {
        Some(value) => value
            .as_array()?
            .iter()
            .map(|keyword| base64::decode(keyword.as_str()?).ok())
            .collect::<Option<Vec<_>>>()?,
        None => Vec::new(),
    };
    let post_content_type = match object.get("post_content_type") {
        Some(value) => PostContentType::parse(value.as_str()?)?,
        None => PostContentType::Text,
    };
    let post_user_agent = match object.get("post_user_agent") {
        Some(value) => value.as_str()?.to_string(),
        None => String::new(),
    };
    let post_content = match object.get("post_content") {
        Some(value) => base64::decode(value.as_str()?).ok()?,
        None => Vec::new(),
    };

    Some(MonitorEntry {
        user_ordering,
        uri,
        method,
        content_check_mode,
        keywords,
        post_content_type,
        post_user_agent,
        post_content,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn entry_defaults_apply() {
        let entry = parse_entry(
            None,
            &serde_json::json!({"user_ordering": 3, "uri": "https://a.example/"}),
        )
        .unwrap();
        assert_eq!(entry.user_ordering, 3);
        assert_eq!(entry.method, HttpMethod::Get);
        assert_eq!(entry.content_check_mode, ContentCheckMode::NoCheck);
        assert_eq!(entry.post_content_type, PostContentType::Text);
        assert!(entry.keywords.is_empty());
    }

    #[test]
    fn entry_slot_hint_supplies_ordering() {
        let entry = parse_entry(Some(4), &serde_json::json!({"uri": "/about"})).unwrap();
        assert_eq!(entry.user_ordering, 4);

        // Array form without an ordering is structurally invalid.
        assert!(parse_entry(None, &serde_json::json!({"uri": "/about"})).is_none());
    }

    #[test]
    fn entry_decodes_base64_fields() {
        let entry = parse_entry(
            Some(0),
            &serde_json::json!({
                "uri": "https://a.example/",
                "method": "post",
                "content_check_mode": "any_keywords",
                "keywords": [base64::encode("alpha"), base64::encode("beta")],
                "post_content_type": "json",
                "post_content": base64::encode("{}"),
            }),
        )
        .unwrap();
        assert_eq!(entry.keywords, vec![b"alpha".to_vec(), b"beta".to_vec()]);
        assert_eq!(entry.post_content, b"{}".to_vec());
        assert_eq!(entry.method, HttpMethod::Post);

        assert!(parse_entry(
            Some(0),
            &serde_json::json!({"uri": "/", "keywords": ["not base64!!"]}),
        )
        .is_none());
    }
}
