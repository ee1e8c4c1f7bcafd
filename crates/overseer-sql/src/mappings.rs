use anyhow::Context;
use models::{CustomerId, CustomerMapping, ServerId};
use std::collections::BTreeSet;

/// The stored worker mapping for one customer, or None when unmapped.
pub async fn fetch_mapping(
    pool: &sqlx::PgPool,
    customer_id: CustomerId,
) -> sqlx::Result<Option<CustomerMapping>> {
    let rows: Vec<(i64, bool)> = sqlx::query_as(
        "SELECT server_id, is_primary FROM customer_mapping WHERE customer_id = $1",
    )
    .bind(customer_id.get() as i64)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(None);
    }

    let mut servers = BTreeSet::new();
    let mut primary = ServerId::INVALID;
    for (server_id, is_primary) in rows {
        let server_id = ServerId::new(server_id as u32);
        servers.insert(server_id);
        if is_primary {
            primary = server_id;
        }
    }

    Ok(Some(CustomerMapping::new(primary, servers)))
}

/// Customers that currently have `server_id` in their mapping.
pub async fn fetch_customers_for_server(
    pool: &sqlx::PgPool,
    server_id: ServerId,
) -> sqlx::Result<Vec<CustomerId>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT customer_id FROM customer_mapping WHERE server_id = $1 ORDER BY customer_id",
    )
    .bind(server_id.get() as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(customer_id,)| CustomerId::new(customer_id as u32))
        .collect())
}

/// Replaces a customer's mapping rows; `None` (or an empty mapping) clears
/// them. The replace is transactional so readers never observe a half
/// mapping.
#[tracing::instrument(level = "debug", err, skip(pool, mapping))]
pub async fn update_mapping(
    pool: &sqlx::PgPool,
    customer_id: CustomerId,
    mapping: Option<&CustomerMapping>,
) -> anyhow::Result<()> {
    let mut txn = pool.begin().await.context("starting mapping transaction")?;

    sqlx::query("DELETE FROM customer_mapping WHERE customer_id = $1")
        .bind(customer_id.get() as i64)
        .execute(&mut txn)
        .await
        .context("clearing mapping")?;

    if let Some(mapping) = mapping {
        for server_id in &mapping.servers {
            sqlx::query(
                "INSERT INTO customer_mapping (customer_id, server_id, is_primary)
                 VALUES ($1, $2, $3)",
            )
            .bind(customer_id.get() as i64)
            .bind(server_id.get() as i64)
            .bind(*server_id == mapping.primary_server_id)
            .execute(&mut txn)
            .await
            .context("inserting mapping row")?;
        }
    }

    txn.commit().await.context("committing mapping")
}
