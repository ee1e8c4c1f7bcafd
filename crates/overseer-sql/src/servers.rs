use anyhow::Context;
use models::{RegionId, Server, ServerId, ServerStatus};

#[derive(sqlx::FromRow)]
struct ServerRow {
    server_id: i64,
    region_id: i64,
    identifier: String,
    status: String,
    cpu_loading: f32,
}

impl TryFrom<ServerRow> for Server {
    type Error = anyhow::Error;

    fn try_from(row: ServerRow) -> anyhow::Result<Server> {
        Ok(Server {
            id: ServerId::new(row.server_id as u32),
            region_id: RegionId::new(row.region_id as u32),
            identifier: row.identifier,
            status: ServerStatus::parse(&row.status)
                .with_context(|| format!("server {}: bad status {}", row.server_id, row.status))?,
            cpu_loading: row.cpu_loading,
        })
    }
}

pub async fn fetch_server(
    pool: &sqlx::PgPool,
    server_id: ServerId,
) -> anyhow::Result<Option<Server>> {
    let row = sqlx::query_as::<_, ServerRow>(
        "SELECT server_id, region_id, identifier, status, cpu_loading
         FROM server WHERE server_id = $1",
    )
    .bind(server_id.get() as i64)
    .fetch_optional(pool)
    .await?;

    row.map(TryInto::try_into).transpose()
}

pub async fn fetch_servers(pool: &sqlx::PgPool) -> anyhow::Result<Vec<Server>> {
    let rows = sqlx::query_as::<_, ServerRow>(
        "SELECT server_id, region_id, identifier, status, cpu_loading
         FROM server ORDER BY server_id",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

#[tracing::instrument(level = "debug", err, skip(pool))]
pub async fn create_server(
    pool: &sqlx::PgPool,
    region_id: RegionId,
    identifier: &str,
    status: ServerStatus,
) -> anyhow::Result<Server> {
    let server_id: i64 = sqlx::query_scalar(
        "INSERT INTO server (region_id, identifier, status, cpu_loading)
         VALUES ($1, $2, $3, 0) RETURNING server_id",
    )
    .bind(region_id.get() as i64)
    .bind(identifier)
    .bind(status.as_str())
    .fetch_one(pool)
    .await?;

    Ok(Server {
        id: ServerId::new(server_id as u32),
        region_id,
        identifier: identifier.to_string(),
        status,
        cpu_loading: 0.0,
    })
}

#[tracing::instrument(level = "debug", err, skip(pool, server), fields(server_id = %server.id))]
pub async fn update_server(pool: &sqlx::PgPool, server: &Server) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE server
         SET region_id = $2, identifier = $3, status = $4, cpu_loading = $5
         WHERE server_id = $1",
    )
    .bind(server.id.get() as i64)
    .bind(server.region_id.get() as i64)
    .bind(&server.identifier)
    .bind(server.status.as_str())
    .bind(server.cpu_loading)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(level = "debug", err, skip(pool))]
pub async fn delete_server(pool: &sqlx::PgPool, server_id: ServerId) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM server WHERE server_id = $1")
        .bind(server_id.get() as i64)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
