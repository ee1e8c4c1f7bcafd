use anyhow::Context;
use models::time::{to_zoran, ZoranTimestamp};
use models::{CustomerId, Event, EventId, EventKind, MonitorId, MonitorStatus};

const COLUMNS: &str = "event_id, monitor_id, customer_id, timestamp, event_type, message, hash";

#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: i64,
    monitor_id: i64,
    customer_id: i64,
    timestamp: i64,
    event_type: String,
    message: String,
    hash: Vec<u8>,
}

impl TryFrom<EventRow> for Event {
    type Error = anyhow::Error;

    fn try_from(row: EventRow) -> anyhow::Result<Event> {
        Ok(Event {
            id: EventId::new(row.event_id as u32),
            monitor_id: MonitorId::new(row.monitor_id as u32),
            customer_id: CustomerId::new(row.customer_id as u32),
            timestamp: row.timestamp.clamp(0, u32::MAX as i64) as ZoranTimestamp,
            kind: EventKind::parse(&row.event_type).with_context(|| {
                format!("event {}: bad event type {}", row.event_id, row.event_type)
            })?,
            message: row.message,
            hash: row.hash,
        })
    }
}

/// The latest recorded (kind, hash) among `kinds` for one monitor, used by
/// duplicate suppression.
pub async fn latest_event_for_monitor(
    pool: &sqlx::PgPool,
    monitor_id: MonitorId,
    kinds: &[EventKind],
) -> sqlx::Result<Option<(EventKind, Vec<u8>)>> {
    let kinds: Vec<String> = kinds.iter().map(|kind| kind.as_str().to_string()).collect();

    let row: Option<(String, Vec<u8>)> = sqlx::query_as(
        r#"
        SELECT event_type, hash FROM event
        WHERE monitor_id = $1 AND event_type = ANY($2)
        ORDER BY timestamp DESC, event_id DESC
        LIMIT 1
        "#,
    )
    .bind(monitor_id.get() as i64)
    .bind(&kinds)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(kind, hash)| EventKind::parse(&kind).map(|kind| (kind, hash))))
}

/// As [`latest_event_for_monitor`], but scoped to every monitor sharing the
/// given monitor's host/scheme (the SSL event family).
pub async fn latest_event_for_host_scheme(
    pool: &sqlx::PgPool,
    monitor_id: MonitorId,
    kinds: &[EventKind],
) -> sqlx::Result<Option<(EventKind, Vec<u8>)>> {
    let kinds: Vec<String> = kinds.iter().map(|kind| kind.as_str().to_string()).collect();

    let row: Option<(String, Vec<u8>)> = sqlx::query_as(
        r#"
        SELECT event_type, hash FROM event
        WHERE monitor_id IN (
                  SELECT monitor_id FROM monitor WHERE host_scheme_id = (
                      SELECT host_scheme_id FROM monitor WHERE monitor_id = $1
                  )
              )
          AND event_type = ANY($2)
        ORDER BY timestamp DESC, event_id DESC
        LIMIT 1
        "#,
    )
    .bind(monitor_id.get() as i64)
    .bind(&kinds)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(kind, hash)| EventKind::parse(&kind).map(|kind| (kind, hash))))
}

/// Records an event and, when the event drives the monitor's derived status
/// to a new value, upserts `monitor_status` — both in one transaction.
#[tracing::instrument(level = "debug", err, skip(pool, message, hash), fields(kind = kind.as_str()))]
pub async fn record_event(
    pool: &sqlx::PgPool,
    customer_id: CustomerId,
    monitor_id: MonitorId,
    unix_timestamp: u64,
    kind: EventKind,
    message: &str,
    hash: &[u8],
) -> anyhow::Result<Event> {
    let timestamp = to_zoran(unix_timestamp);
    let mut txn = pool.begin().await.context("starting event transaction")?;

    let event_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO event (monitor_id, customer_id, timestamp, event_type, message, hash)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING event_id
        "#,
    )
    .bind(monitor_id.get() as i64)
    .bind(customer_id.get() as i64)
    .bind(timestamp as i64)
    .bind(kind.as_str())
    .bind(message)
    .bind(hash)
    .fetch_one(&mut txn)
    .await
    .context("inserting event")?;

    if let Some(new_status) = kind.status_transition() {
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM monitor_status WHERE monitor_id = $1")
                .bind(monitor_id.get() as i64)
                .fetch_optional(&mut txn)
                .await
                .context("reading monitor status")?;
        let current = current
            .as_deref()
            .and_then(MonitorStatus::parse)
            .unwrap_or_default();

        if new_status != current {
            sqlx::query(
                r#"
                INSERT INTO monitor_status (monitor_id, status) VALUES ($1, $2)
                ON CONFLICT (monitor_id) DO UPDATE SET status = EXCLUDED.status
                "#,
            )
            .bind(monitor_id.get() as i64)
            .bind(new_status.as_str())
            .execute(&mut txn)
            .await
            .context("upserting monitor status")?;
        }
    }

    txn.commit().await.context("committing event")?;

    Ok(Event {
        id: EventId::new(event_id as u32),
        monitor_id,
        customer_id,
        timestamp,
        kind,
        message: message.to_string(),
        hash: hash.to_vec(),
    })
}

/// Current derived status of one monitor; Unknown when never recorded.
pub async fn monitor_status(
    pool: &sqlx::PgPool,
    monitor_id: MonitorId,
) -> sqlx::Result<MonitorStatus> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM monitor_status WHERE monitor_id = $1")
            .bind(monitor_id.get() as i64)
            .fetch_optional(pool)
            .await?;

    Ok(status
        .as_deref()
        .and_then(MonitorStatus::parse)
        .unwrap_or_default())
}

/// Status of every monitor belonging to `customer_id`; monitors with no
/// status row are simply absent (callers render those as "unknown").
pub async fn monitor_status_by_customer(
    pool: &sqlx::PgPool,
    customer_id: CustomerId,
) -> sqlx::Result<Vec<(MonitorId, MonitorStatus)>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT monitor_id, status FROM monitor_status
        WHERE monitor_id IN (SELECT monitor_id FROM monitor WHERE customer_id = $1)
        "#,
    )
    .bind(customer_id.get() as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(monitor_id, status)| {
            (
                MonitorId::new(monitor_id as u32),
                MonitorStatus::parse(&status).unwrap_or_default(),
            )
        })
        .collect())
}

pub async fn fetch_event(pool: &sqlx::PgPool, event_id: EventId) -> anyhow::Result<Option<Event>> {
    let row = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {COLUMNS} FROM event WHERE event_id = $1"
    ))
    .bind(event_id.get() as i64)
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

/// Events for one customer (or everyone) within a Unix-time window, oldest
/// first. The window is clamped to the event clock's range.
pub async fn fetch_events_by_customer(
    pool: &sqlx::PgPool,
    customer_id: Option<CustomerId>,
    start_unix: u64,
    end_unix: u64,
) -> anyhow::Result<Vec<Event>> {
    let start = to_zoran(start_unix) as i64;
    let end = to_zoran(end_unix) as i64;

    let rows = match customer_id {
        Some(customer_id) => {
            sqlx::query_as::<_, EventRow>(&format!(
                "SELECT {COLUMNS} FROM event
                 WHERE customer_id = $1 AND timestamp >= $2 AND timestamp <= $3
                 ORDER BY timestamp ASC, event_id ASC"
            ))
            .bind(customer_id.get() as i64)
            .bind(start)
            .bind(end)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, EventRow>(&format!(
                "SELECT {COLUMNS} FROM event
                 WHERE timestamp >= $1 AND timestamp <= $2
                 ORDER BY timestamp ASC, event_id ASC"
            ))
            .bind(start)
            .bind(end)
            .fetch_all(pool)
            .await?
        }
    };

    rows.into_iter().map(TryInto::try_into).collect()
}

pub async fn fetch_events_by_monitor(
    pool: &sqlx::PgPool,
    monitor_id: MonitorId,
    start_unix: u64,
    end_unix: u64,
) -> anyhow::Result<Vec<Event>> {
    let rows = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {COLUMNS} FROM event
         WHERE monitor_id = $1 AND timestamp >= $2 AND timestamp <= $3
         ORDER BY timestamp ASC, event_id ASC"
    ))
    .bind(monitor_id.get() as i64)
    .bind(to_zoran(start_unix) as i64)
    .bind(to_zoran(end_unix) as i64)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// Deletes events at or before `before_unix`, optionally for one customer.
#[tracing::instrument(level = "debug", err, skip(pool))]
pub async fn purge_events(
    pool: &sqlx::PgPool,
    customer_id: Option<CustomerId>,
    before_unix: u64,
) -> sqlx::Result<u64> {
    let before = to_zoran(before_unix) as i64;

    let result = match customer_id {
        Some(customer_id) => {
            sqlx::query("DELETE FROM event WHERE timestamp <= $1 AND customer_id = $2")
                .bind(before)
                .bind(customer_id.get() as i64)
                .execute(pool)
                .await?
        }
        None => {
            sqlx::query("DELETE FROM event WHERE timestamp <= $1")
                .bind(before)
                .execute(pool)
                .await?
        }
    };

    Ok(result.rows_affected())
}
