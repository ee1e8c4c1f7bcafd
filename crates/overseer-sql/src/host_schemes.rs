use anyhow::Context;
use models::{CustomerId, HostScheme, HostSchemeId};

#[derive(sqlx::FromRow)]
struct HostSchemeRow {
    host_scheme_id: i64,
    customer_id: i64,
    url: String,
    ssl_expiration_timestamp: i64,
}

impl TryFrom<HostSchemeRow> for HostScheme {
    type Error = anyhow::Error;

    fn try_from(row: HostSchemeRow) -> anyhow::Result<HostScheme> {
        let url = url::Url::parse(&row.url)
            .with_context(|| format!("stored host/scheme {} has a bad url", row.host_scheme_id))?;

        Ok(HostScheme {
            id: HostSchemeId::new(row.host_scheme_id as u32),
            customer_id: CustomerId::new(row.customer_id as u32),
            url,
            ssl_expiration_timestamp: row.ssl_expiration_timestamp.max(0) as u64,
        })
    }
}

pub async fn fetch_host_scheme(
    pool: &sqlx::PgPool,
    host_scheme_id: HostSchemeId,
) -> anyhow::Result<Option<HostScheme>> {
    let row = sqlx::query_as::<_, HostSchemeRow>(
        "SELECT host_scheme_id, customer_id, url, ssl_expiration_timestamp
         FROM host_scheme WHERE host_scheme_id = $1",
    )
    .bind(host_scheme_id.get() as i64)
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

/// Host/schemes for one customer, or every row when `customer_id` is None
/// (the SSL sweeper's view).
pub async fn fetch_host_schemes(
    pool: &sqlx::PgPool,
    customer_id: Option<CustomerId>,
) -> anyhow::Result<Vec<HostScheme>> {
    let rows = match customer_id {
        Some(customer_id) => {
            sqlx::query_as::<_, HostSchemeRow>(
                "SELECT host_scheme_id, customer_id, url, ssl_expiration_timestamp
                 FROM host_scheme WHERE customer_id = $1 ORDER BY host_scheme_id",
            )
            .bind(customer_id.get() as i64)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, HostSchemeRow>(
                "SELECT host_scheme_id, customer_id, url, ssl_expiration_timestamp
                 FROM host_scheme ORDER BY host_scheme_id",
            )
            .fetch_all(pool)
            .await?
        }
    };

    rows.into_iter().map(TryInto::try_into).collect()
}

#[tracing::instrument(level = "debug", err, skip(pool, url), fields(url = %url))]
pub async fn create_host_scheme(
    pool: &sqlx::PgPool,
    customer_id: CustomerId,
    url: &url::Url,
) -> anyhow::Result<HostScheme> {
    let stored = url.as_str().trim_end_matches('/').to_string();
    let host_scheme_id: i64 = sqlx::query_scalar(
        "INSERT INTO host_scheme (customer_id, url, ssl_expiration_timestamp)
         VALUES ($1, $2, 0) RETURNING host_scheme_id",
    )
    .bind(customer_id.get() as i64)
    .bind(&stored)
    .fetch_one(pool)
    .await?;

    Ok(HostScheme {
        id: HostSchemeId::new(host_scheme_id as u32),
        customer_id,
        url: url.clone(),
        ssl_expiration_timestamp: 0,
    })
}

#[tracing::instrument(level = "debug", err, skip(pool, host_scheme), fields(host_scheme_id = %host_scheme.id))]
pub async fn update_host_scheme(
    pool: &sqlx::PgPool,
    host_scheme: &HostScheme,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE host_scheme
         SET customer_id = $2, url = $3, ssl_expiration_timestamp = $4
         WHERE host_scheme_id = $1",
    )
    .bind(host_scheme.id.get() as i64)
    .bind(host_scheme.customer_id.get() as i64)
    .bind(host_scheme.url_str())
    .bind(host_scheme.ssl_expiration_timestamp as i64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(level = "debug", err, skip(pool))]
pub async fn update_ssl_expiration(
    pool: &sqlx::PgPool,
    host_scheme_id: HostSchemeId,
    expiration_timestamp: u64,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE host_scheme SET ssl_expiration_timestamp = $2 WHERE host_scheme_id = $1",
    )
    .bind(host_scheme_id.get() as i64)
    .bind(expiration_timestamp as i64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Deletes one host/scheme; its monitors go with it by cascade.
#[tracing::instrument(level = "debug", err, skip(pool))]
pub async fn delete_host_scheme(
    pool: &sqlx::PgPool,
    host_scheme_id: HostSchemeId,
) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM host_scheme WHERE host_scheme_id = $1")
        .bind(host_scheme_id.get() as i64)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Deletes every host/scheme (and, by cascade, every monitor) of a customer.
#[tracing::instrument(level = "debug", err, skip(pool))]
pub async fn delete_customer_host_schemes(
    pool: &sqlx::PgPool,
    customer_id: CustomerId,
) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM host_scheme WHERE customer_id = $1")
        .bind(customer_id.get() as i64)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
