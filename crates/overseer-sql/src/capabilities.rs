use models::{CustomerCapabilities, CustomerId};

#[derive(sqlx::FromRow)]
struct CapabilitiesRow {
    customer_id: i64,
    supports_post_method: bool,
    supports_content_checking: bool,
    supports_keyword_checking: bool,
    supports_ping_based_polling: bool,
    supports_ssl_expiration_checking: bool,
    supports_latency_tracking: bool,
    supports_maintenance_mode: bool,
    multi_region_checking: bool,
    polling_interval: i64,
    customer_active: bool,
    paused: bool,
}

impl From<CapabilitiesRow> for CustomerCapabilities {
    fn from(row: CapabilitiesRow) -> Self {
        CustomerCapabilities {
            customer_id: CustomerId::new(row.customer_id as u32),
            supports_post_method: row.supports_post_method,
            supports_content_checking: row.supports_content_checking,
            supports_keyword_checking: row.supports_keyword_checking,
            supports_ping_based_polling: row.supports_ping_based_polling,
            supports_ssl_expiration_checking: row.supports_ssl_expiration_checking,
            supports_latency_tracking: row.supports_latency_tracking,
            supports_maintenance_mode: row.supports_maintenance_mode,
            multi_region_checking: row.multi_region_checking,
            polling_interval: row.polling_interval as u32,
            customer_active: row.customer_active,
            paused: row.paused,
        }
    }
}

pub async fn fetch_customer_capabilities(
    pool: &sqlx::PgPool,
    customer_id: CustomerId,
) -> sqlx::Result<Option<CustomerCapabilities>> {
    let row = sqlx::query_as::<_, CapabilitiesRow>(
        r#"
        SELECT customer_id, supports_post_method, supports_content_checking,
               supports_keyword_checking, supports_ping_based_polling,
               supports_ssl_expiration_checking, supports_latency_tracking,
               supports_maintenance_mode, multi_region_checking,
               polling_interval, customer_active, paused
        FROM customer_capabilities
        WHERE customer_id = $1
        "#,
    )
    .bind(customer_id.get() as i64)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

#[tracing::instrument(level = "debug", err, skip(pool, capabilities), fields(customer_id = %capabilities.customer_id))]
pub async fn update_customer_capabilities(
    pool: &sqlx::PgPool,
    capabilities: &CustomerCapabilities,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE customer_capabilities SET
            supports_post_method = $2,
            supports_content_checking = $3,
            supports_keyword_checking = $4,
            supports_ping_based_polling = $5,
            supports_ssl_expiration_checking = $6,
            supports_latency_tracking = $7,
            supports_maintenance_mode = $8,
            multi_region_checking = $9,
            polling_interval = $10,
            customer_active = $11,
            paused = $12
        WHERE customer_id = $1
        "#,
    )
    .bind(capabilities.customer_id.get() as i64)
    .bind(capabilities.supports_post_method)
    .bind(capabilities.supports_content_checking)
    .bind(capabilities.supports_keyword_checking)
    .bind(capabilities.supports_ping_based_polling)
    .bind(capabilities.supports_ssl_expiration_checking)
    .bind(capabilities.supports_latency_tracking)
    .bind(capabilities.supports_maintenance_mode)
    .bind(capabilities.multi_region_checking)
    .bind(capabilities.polling_interval as i64)
    .bind(capabilities.customer_active)
    .bind(capabilities.paused)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
