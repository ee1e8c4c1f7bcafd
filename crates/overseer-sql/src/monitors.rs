use crate::{compress_blob, decompress_blob};
use anyhow::Context;
use models::{
    decode_keywords, encode_keywords, ContentCheckMode, CustomerId, HostSchemeId, HttpMethod,
    Monitor, MonitorId,
};

const COLUMNS: &str = "monitor_id, customer_id, host_scheme_id, user_ordering, path, method, \
                       content_check_mode, keywords, post_content_type, post_user_agent, \
                       post_content";

#[derive(sqlx::FromRow)]
struct MonitorRow {
    monitor_id: i64,
    customer_id: i64,
    host_scheme_id: i64,
    user_ordering: i16,
    path: String,
    method: String,
    content_check_mode: String,
    keywords: Vec<u8>,
    post_content_type: String,
    post_user_agent: String,
    post_content: Vec<u8>,
}

impl TryFrom<MonitorRow> for Monitor {
    type Error = anyhow::Error;

    fn try_from(row: MonitorRow) -> anyhow::Result<Monitor> {
        let keywords = if row.keywords.is_empty() {
            Vec::new()
        } else {
            let raw = decompress_blob(&row.keywords)
                .with_context(|| format!("monitor {}: corrupt keyword blob", row.monitor_id))?;
            decode_keywords(&raw)
                .with_context(|| format!("monitor {}: bad keyword encoding", row.monitor_id))?
        };

        Ok(Monitor {
            id: MonitorId::new(row.monitor_id as u32),
            customer_id: CustomerId::new(row.customer_id as u32),
            host_scheme_id: HostSchemeId::new(row.host_scheme_id as u32),
            user_ordering: row.user_ordering as u16,
            path: row.path,
            method: HttpMethod::parse(&row.method)
                .with_context(|| format!("monitor {}: bad method {}", row.monitor_id, row.method))?,
            content_check_mode: ContentCheckMode::parse(&row.content_check_mode).with_context(
                || {
                    format!(
                        "monitor {}: bad content check mode {}",
                        row.monitor_id, row.content_check_mode
                    )
                },
            )?,
            keywords,
            post_content_type: models::PostContentType::parse(&row.post_content_type)
                .with_context(|| {
                    format!(
                        "monitor {}: bad post content type {}",
                        row.monitor_id, row.post_content_type
                    )
                })?,
            post_user_agent: row.post_user_agent,
            post_content: row.post_content,
        })
    }
}

pub async fn fetch_monitor(
    pool: &sqlx::PgPool,
    monitor_id: MonitorId,
) -> anyhow::Result<Option<Monitor>> {
    let row = sqlx::query_as::<_, MonitorRow>(&format!(
        "SELECT {COLUMNS} FROM monitor WHERE monitor_id = $1"
    ))
    .bind(monitor_id.get() as i64)
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

/// Monitors for one customer (or all customers), ordered by id.
pub async fn fetch_monitors(
    pool: &sqlx::PgPool,
    customer_id: Option<CustomerId>,
) -> anyhow::Result<Vec<Monitor>> {
    let rows = match customer_id {
        Some(customer_id) => {
            sqlx::query_as::<_, MonitorRow>(&format!(
                "SELECT {COLUMNS} FROM monitor WHERE customer_id = $1 ORDER BY monitor_id"
            ))
            .bind(customer_id.get() as i64)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, MonitorRow>(&format!(
                "SELECT {COLUMNS} FROM monitor ORDER BY monitor_id"
            ))
            .fetch_all(pool)
            .await?
        }
    };

    rows.into_iter().map(TryInto::try_into).collect()
}

/// A customer's monitors in user-ordering order, for status listings.
pub async fn fetch_monitors_by_user_order(
    pool: &sqlx::PgPool,
    customer_id: CustomerId,
) -> anyhow::Result<Vec<Monitor>> {
    let rows = sqlx::query_as::<_, MonitorRow>(&format!(
        "SELECT {COLUMNS} FROM monitor WHERE customer_id = $1 ORDER BY user_ordering"
    ))
    .bind(customer_id.get() as i64)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

pub async fn fetch_monitors_under_host_scheme(
    pool: &sqlx::PgPool,
    host_scheme_id: HostSchemeId,
) -> anyhow::Result<Vec<Monitor>> {
    let rows = sqlx::query_as::<_, MonitorRow>(&format!(
        "SELECT {COLUMNS} FROM monitor WHERE host_scheme_id = $1 ORDER BY monitor_id"
    ))
    .bind(host_scheme_id.get() as i64)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// Inserts `monitor` (its `id` field is ignored) and returns the assigned id.
#[tracing::instrument(level = "debug", err, skip(pool, monitor), fields(customer_id = %monitor.customer_id, path = %monitor.path))]
pub async fn create_monitor(
    pool: &sqlx::PgPool,
    monitor: &Monitor,
) -> anyhow::Result<MonitorId> {
    let keywords = compress_blob(&encode_keywords(&monitor.keywords))?;

    let monitor_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO monitor (customer_id, host_scheme_id, user_ordering, path, method,
                             content_check_mode, keywords, post_content_type,
                             post_user_agent, post_content)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING monitor_id
        "#,
    )
    .bind(monitor.customer_id.get() as i64)
    .bind(monitor.host_scheme_id.get() as i64)
    .bind(monitor.user_ordering as i16)
    .bind(&monitor.path)
    .bind(monitor.method.as_str())
    .bind(monitor.content_check_mode.as_str())
    .bind(&keywords)
    .bind(monitor.post_content_type.as_str())
    .bind(&monitor.post_user_agent)
    .bind(&monitor.post_content)
    .fetch_one(pool)
    .await?;

    Ok(MonitorId::new(monitor_id as u32))
}

#[tracing::instrument(level = "debug", err, skip(pool, monitor), fields(monitor_id = %monitor.id))]
pub async fn update_monitor(pool: &sqlx::PgPool, monitor: &Monitor) -> anyhow::Result<bool> {
    let keywords = compress_blob(&encode_keywords(&monitor.keywords))?;

    let result = sqlx::query(
        r#"
        UPDATE monitor SET
            customer_id = $2, host_scheme_id = $3, user_ordering = $4, path = $5,
            method = $6, content_check_mode = $7, keywords = $8,
            post_content_type = $9, post_user_agent = $10, post_content = $11
        WHERE monitor_id = $1
        "#,
    )
    .bind(monitor.id.get() as i64)
    .bind(monitor.customer_id.get() as i64)
    .bind(monitor.host_scheme_id.get() as i64)
    .bind(monitor.user_ordering as i16)
    .bind(&monitor.path)
    .bind(monitor.method.as_str())
    .bind(monitor.content_check_mode.as_str())
    .bind(&keywords)
    .bind(monitor.post_content_type.as_str())
    .bind(&monitor.post_user_agent)
    .bind(&monitor.post_content)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(level = "debug", err, skip(pool))]
pub async fn delete_monitor(pool: &sqlx::PgPool, monitor_id: MonitorId) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM monitor WHERE monitor_id = $1")
        .bind(monitor_id.get() as i64)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
