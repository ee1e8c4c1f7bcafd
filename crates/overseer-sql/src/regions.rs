use models::{Region, RegionId};

/// Region rows are provisioned by the operations tooling; the control plane
/// only reads them to validate worker placement.
pub async fn fetch_region(
    pool: &sqlx::PgPool,
    region_id: RegionId,
) -> sqlx::Result<Option<Region>> {
    let row: Option<(i64, String)> =
        sqlx::query_as("SELECT region_id, name FROM region WHERE region_id = $1")
            .bind(region_id.get() as i64)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|(region_id, name)| Region {
        id: RegionId::new(region_id as u32),
        name,
    }))
}
