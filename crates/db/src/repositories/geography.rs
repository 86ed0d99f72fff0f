use sqlx::{sqlite::SqliteRow, Row};

use repuestos_core::geography::{normalize_place, Municipality};

use super::{GeographyLookup, RepositoryError};
use crate::DbPool;

/// Municipality catalog keyed by normalized name.
pub struct SqlGeographyLookup {
    pool: DbPool,
}

impl SqlGeographyLookup {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl GeographyLookup for SqlGeographyLookup {
    async fn resolve(
        &self,
        city: &str,
        department: Option<&str>,
    ) -> Result<Option<Municipality>, RepositoryError> {
        let normalized_city = normalize_place(city);
        if normalized_city.is_empty() {
            return Ok(None);
        }
        let normalized_department =
            department.map(normalize_place).filter(|value| !value.is_empty());

        let rows = sqlx::query(
            "SELECT code, name, department, normalized_department, metro_area, hub
             FROM municipality
             WHERE normalized_name = ?
             ORDER BY code ASC",
        )
        .bind(&normalized_city)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let row_department: String = row.try_get("normalized_department")?;
            candidates.push((row_department, municipality_from_row(row)?));
        }

        // Without a department the first code wins; with one, only a match counts.
        let found = match normalized_department {
            Some(department) => candidates
                .into_iter()
                .find(|(candidate, _)| *candidate == department)
                .map(|(_, municipality)| municipality),
            None => candidates.into_iter().next().map(|(_, municipality)| municipality),
        };
        Ok(found)
    }

    async fn save(&self, municipality: Municipality) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO municipality (
                code,
                name,
                normalized_name,
                department,
                normalized_department,
                metro_area,
                hub
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(code) DO UPDATE SET
                name = excluded.name,
                normalized_name = excluded.normalized_name,
                department = excluded.department,
                normalized_department = excluded.normalized_department,
                metro_area = excluded.metro_area,
                hub = excluded.hub",
        )
        .bind(&municipality.code)
        .bind(&municipality.name)
        .bind(normalize_place(&municipality.name))
        .bind(&municipality.department)
        .bind(normalize_place(&municipality.department))
        .bind(municipality.metro_area.as_deref())
        .bind(municipality.hub.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn municipality_from_row(row: SqliteRow) -> Result<Municipality, RepositoryError> {
    Ok(Municipality {
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        department: row.try_get("department")?,
        metro_area: row.try_get("metro_area")?,
        hub: row.try_get("hub")?,
    })
}
