use anyhow::Context;
use models::{CustomerId, Resource, ValueType};

/// Inserts one sample. The hour-granular primary key means a second sample
/// for the same (customer, value type, hour) is rejected by the database.
#[tracing::instrument(level = "debug", err, skip(pool, resource), fields(customer_id = %resource.customer_id, value_type = resource.value_type))]
pub async fn record_resource(pool: &sqlx::PgPool, resource: &Resource) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO resources (customer_id, value_type, value, timestamp1, timestamp2)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(resource.customer_id.get() as i64)
    .bind(resource.value_type as i16)
    .bind(resource.value)
    .bind((resource.timestamp / 3600) as i64)
    .bind((resource.timestamp % 3600) as i16)
    .execute(pool)
    .await?;

    Ok(())
}

/// Samples of one stream within `[start_unix, end_unix]`, oldest first.
pub async fn fetch_resources(
    pool: &sqlx::PgPool,
    customer_id: CustomerId,
    value_type: ValueType,
    start_unix: u64,
    end_unix: u64,
) -> sqlx::Result<Vec<Resource>> {
    let rows: Vec<(f32, i64, i16)> = sqlx::query_as(
        r#"
        SELECT value, timestamp1, timestamp2 FROM resources
        WHERE customer_id = $1 AND value_type = $2
          AND (timestamp1 > $3 OR (timestamp1 = $3 AND timestamp2 >= $4))
          AND (timestamp1 < $5 OR (timestamp1 = $5 AND timestamp2 <= $6))
        ORDER BY timestamp1 ASC, timestamp2 ASC
        "#,
    )
    .bind(customer_id.get() as i64)
    .bind(value_type as i16)
    .bind((start_unix / 3600) as i64)
    .bind((start_unix % 3600) as i16)
    .bind((end_unix / 3600) as i64)
    .bind((end_unix % 3600) as i16)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(value, timestamp1, timestamp2)| Resource {
            customer_id,
            value_type,
            value,
            timestamp: timestamp1 as u64 * 3600 + timestamp2 as u64,
        })
        .collect())
}

/// Value types with at least one stored sample, for the resource cache.
pub async fn available_value_types(
    pool: &sqlx::PgPool,
    customer_id: CustomerId,
) -> sqlx::Result<Vec<ValueType>> {
    let rows: Vec<(i16,)> = sqlx::query_as(
        "SELECT DISTINCT value_type FROM resources WHERE customer_id = $1 ORDER BY value_type",
    )
    .bind(customer_id.get() as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(value_type,)| value_type as ValueType)
        .collect())
}

/// Deletes one customer's samples strictly older than `before_unix`; a
/// sample exactly at the purge timestamp is kept.
#[tracing::instrument(level = "debug", err, skip(pool))]
pub async fn purge_resources(
    pool: &sqlx::PgPool,
    customer_id: CustomerId,
    before_unix: u64,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM resources
        WHERE customer_id = $1
          AND (timestamp1 < $2 OR (timestamp1 = $2 AND timestamp2 < $3))
        "#,
    )
    .bind(customer_id.get() as i64)
    .bind((before_unix / 3600) as i64)
    .bind((before_unix % 3600) as i16)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Ager used by the purge daemon: deletes samples strictly older than
/// `before_unix` across all customers and reports which customers lost
/// rows, so their cache entries can be evicted. Runs in a transaction.
#[tracing::instrument(level = "debug", err, skip(pool))]
pub async fn purge_stale_resources(
    pool: &sqlx::PgPool,
    before_unix: u64,
) -> anyhow::Result<Vec<CustomerId>> {
    let mut txn = pool.begin().await.context("starting purge transaction")?;

    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        DELETE FROM resources
        WHERE timestamp1 < $1 OR (timestamp1 = $1 AND timestamp2 < $2)
        RETURNING customer_id
        "#,
    )
    .bind((before_unix / 3600) as i64)
    .bind((before_unix % 3600) as i16)
    .fetch_all(&mut txn)
    .await
    .context("purging stale resources")?;

    txn.commit().await.context("committing purge")?;

    let mut customers: Vec<CustomerId> = rows
        .into_iter()
        .map(|(customer_id,)| CustomerId::new(customer_id as u32))
        .collect();
    customers.sort();
    customers.dedup();
    Ok(customers)
}
