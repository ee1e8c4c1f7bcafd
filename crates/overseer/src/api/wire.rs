//! Entity-to-JSON conversions shared by the response builders.

use models::{time, Event, HostScheme, Monitor, MonitorStatus};

pub(crate) fn host_scheme_json(host_scheme: &HostScheme, include_customer: bool) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    if include_customer {
        object.insert("customer_id".to_string(), host_scheme.customer_id.get().into());
    }
    object.insert("url".to_string(), host_scheme.url_str().into());
    object.insert(
        "ssl_expiration_timestamp".to_string(),
        host_scheme.ssl_expiration_timestamp.into(),
    );
    object.into()
}

/// Collections are objects keyed by the row id.
pub(crate) fn host_schemes_json(
    host_schemes: &[HostScheme],
    include_customer: bool,
) -> serde_json::Value {
    host_schemes
        .iter()
        .map(|host_scheme| {
            (
                host_scheme.id.to_string(),
                host_scheme_json(host_scheme, include_customer),
            )
        })
        .collect::<serde_json::Map<_, _>>()
        .into()
}

pub(crate) fn monitor_json(
    monitor: &Monitor,
    include_customer: bool,
    include_user_ordering: bool,
) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    if include_customer {
        object.insert("customer_id".to_string(), monitor.customer_id.get().into());
    }
    object.insert(
        "host_scheme_id".to_string(),
        monitor.host_scheme_id.get().into(),
    );
    if include_user_ordering {
        object.insert("user_ordering".to_string(), monitor.user_ordering.into());
    }
    object.insert("path".to_string(), monitor.path.clone().into());
    object.insert(
        "method".to_string(),
        monitor.method.as_str().to_ascii_lowercase().into(),
    );
    object.insert(
        "content_check_mode".to_string(),
        monitor.content_check_mode.as_str().to_ascii_lowercase().into(),
    );
    object.insert(
        "keywords".to_string(),
        monitor
            .keywords
            .iter()
            .map(|keyword| serde_json::Value::from(base64::encode(keyword)))
            .collect::<Vec<_>>()
            .into(),
    );
    object.insert(
        "post_content_type".to_string(),
        monitor
            .post_content_type
            .as_str()
            .to_ascii_lowercase()
            .into(),
    );
    if !monitor.post_user_agent.is_empty() {
        object.insert(
            "post_user_agent".to_string(),
            monitor.post_user_agent.clone().into(),
        );
    }
    if !monitor.post_content.is_empty() {
        object.insert(
            "post_content".to_string(),
            base64::encode(&monitor.post_content).into(),
        );
    }
    object.into()
}

pub(crate) fn monitors_json(monitors: &[Monitor], include_customer: bool) -> serde_json::Value {
    monitors
        .iter()
        .map(|monitor| {
            (
                monitor.id.to_string(),
                monitor_json(monitor, include_customer, true),
            )
        })
        .collect::<serde_json::Map<_, _>>()
        .into()
}

pub(crate) fn event_json(
    event: &Event,
    include_customer: bool,
    include_hash: bool,
) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    object.insert("event_id".to_string(), event.id.get().into());
    object.insert("monitor_id".to_string(), event.monitor_id.get().into());
    if include_customer {
        object.insert("customer_id".to_string(), event.customer_id.get().into());
    }
    object.insert(
        "timestamp".to_string(),
        time::to_unix(event.timestamp).into(),
    );
    object.insert("event_type".to_string(), event.kind.as_wire_str().into());
    object.insert("message".to_string(), event.message.clone().into());
    if include_hash && !event.hash.is_empty() {
        object.insert("hash".to_string(), base64::encode(&event.hash).into());
    }
    object.into()
}

pub(crate) fn events_json(
    events: &[Event],
    include_customer: bool,
    include_hash: bool,
) -> serde_json::Value {
    events
        .iter()
        .map(|event| event_json(event, include_customer, include_hash))
        .collect::<Vec<_>>()
        .into()
}

pub(crate) fn status_json(status: MonitorStatus) -> serde_json::Value {
    status.as_wire_str().into()
}
