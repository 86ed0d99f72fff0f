use std::collections::HashMap;

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use repuestos_core::domain::adjudication::{SolicitudTransition, TransitionId};
use repuestos_core::domain::advisor::AdvisorId;
use repuestos_core::domain::offer::{Offer, OfferDetail, OfferId};
use repuestos_core::domain::solicitud::{
    LineItem, LineItemId, Solicitud, SolicitudId, SolicitudState, VehicleDescriptor,
};

use super::codec::{
    encode_json, encode_timestamp, insert_adjudications, insert_outbox_entries, parse_decimal,
    parse_optional_timestamp, parse_state, parse_timestamp, parse_u32, parse_u8,
};
use super::{
    CommitReceipt, DecisionCommit, NewSolicitud, OfferRepository, RepositoryError,
    SolicitudRepository, SolicitudSnapshot,
};
use crate::DbPool;

pub struct SqlSolicitudRepository {
    pool: DbPool,
}

impl SqlSolicitudRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SolicitudRepository for SqlSolicitudRepository {
    async fn create(&self, new: NewSolicitud) -> Result<(), RepositoryError> {
        let NewSolicitud { solicitud, plan, notifications } = new;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO solicitud (
                id,
                state,
                current_tier,
                tier_started_at,
                minimum_offers_desired,
                origin_city,
                origin_department,
                offer_count,
                version,
                created_at,
                closed_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&solicitud.id.0)
        .bind(solicitud.state.as_str())
        .bind(i64::from(solicitud.current_tier))
        .bind(encode_timestamp(solicitud.tier_started_at))
        .bind(i64::from(solicitud.minimum_offers_desired))
        .bind(&solicitud.origin_city)
        .bind(solicitud.origin_department.as_deref())
        .bind(i64::from(solicitud.offer_count))
        .bind(i64::from(solicitud.version))
        .bind(encode_timestamp(solicitud.created_at))
        .bind(solicitud.closed_at.map(encode_timestamp))
        .execute(&mut *tx)
        .await?;

        for (position, item) in solicitud.line_items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO line_item (
                    solicitud_id,
                    id,
                    position,
                    name,
                    vehicle_brand,
                    vehicle_line,
                    vehicle_year,
                    quantity
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&solicitud.id.0)
            .bind(&item.id.0)
            .bind(position as i64)
            .bind(&item.name)
            .bind(&item.vehicle.brand)
            .bind(&item.vehicle.line)
            .bind(i64::from(item.vehicle.year))
            .bind(i64::from(item.quantity))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO tier_plan (solicitud_id, plan_json, created_at)
             VALUES (?, ?, ?)
             ON CONFLICT(solicitud_id) DO NOTHING",
        )
        .bind(&plan.solicitud_id.0)
        .bind(encode_json("plan_json", &plan)?)
        .bind(encode_timestamp(solicitud.created_at))
        .execute(&mut *tx)
        .await?;

        insert_outbox_entries(&mut *tx, &notifications).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &SolicitudId) -> Result<Option<Solicitud>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_solicitud(&mut conn, id).await
    }

    async fn list_ids_in_state(
        &self,
        state: SolicitudState,
    ) -> Result<Vec<SolicitudId>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id
             FROM solicitud
             WHERE state = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok(SolicitudId(row.try_get::<String, _>("id")?)))
            .collect()
    }

    async fn load_snapshot(
        &self,
        id: &SolicitudId,
    ) -> Result<Option<SolicitudSnapshot>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let Some(solicitud) = fetch_solicitud(&mut *tx, id).await? else {
            return Ok(None);
        };
        let offers = fetch_offers(&mut *tx, id).await?;

        tx.commit().await?;
        Ok(Some(SolicitudSnapshot { solicitud, offers }))
    }

    async fn commit_decision(
        &self,
        commit: DecisionCommit,
    ) -> Result<CommitReceipt, RepositoryError> {
        let DecisionCommit {
            updated,
            expected_version,
            expected_offer_count,
            transition,
            adjudications,
            notifications,
        } = commit;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE solicitud
             SET state = ?,
                 current_tier = ?,
                 tier_started_at = ?,
                 closed_at = ?,
                 version = version + 1
             WHERE id = ? AND version = ? AND offer_count = ?",
        )
        .bind(updated.state.as_str())
        .bind(i64::from(updated.current_tier))
        .bind(encode_timestamp(updated.tier_started_at))
        .bind(updated.closed_at.map(encode_timestamp))
        .bind(&updated.id.0)
        .bind(i64::from(expected_version))
        .bind(i64::from(expected_offer_count))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM solicitud WHERE id = ?")
                .bind(&updated.id.0)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            return Err(if exists {
                RepositoryError::Conflict(updated.id.0.clone())
            } else {
                RepositoryError::NotFound(format!("solicitud `{}`", updated.id.0))
            });
        }

        insert_transition(&mut *tx, &transition).await?;
        let recorded = insert_adjudications(&mut *tx, &adjudications).await?;
        insert_outbox_entries(&mut *tx, &notifications).await?;

        tx.commit().await?;
        Ok(CommitReceipt { version: expected_version + 1, recorded })
    }

    async fn list_transitions(
        &self,
        id: &SolicitudId,
    ) -> Result<Vec<SolicitudTransition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                solicitud_id,
                decision,
                from_state,
                to_state,
                from_tier,
                to_tier,
                complete_offers,
                total_offers,
                decided_at
             FROM solicitud_transition
             WHERE solicitud_id = ?
             ORDER BY decided_at ASC, id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transition_from_row).collect()
    }
}

#[async_trait::async_trait]
impl OfferRepository for SqlSolicitudRepository {
    async fn submit_offer(&self, offer: Offer) -> Result<Solicitud, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // The first statement must be the write, so concurrent submitters
        // queue on the busy timeout instead of failing a read-to-write upgrade.
        let bumped = sqlx::query(
            "UPDATE solicitud
             SET offer_count = offer_count + 1, version = version + 1
             WHERE id = ? AND state = 'open'",
        )
        .bind(&offer.solicitud_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let mut solicitud = fetch_solicitud(&mut *tx, &offer.solicitud_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("solicitud `{}`", offer.solicitud_id.0))
            })?;
        if bumped == 0 {
            // Not open; `record_offer` reports the state it is in.
            solicitud.record_offer()?;
            return Err(RepositoryError::Conflict(solicitud.id.0.clone()));
        }
        offer.validate_against(&solicitud)?;

        sqlx::query(
            "INSERT INTO offer (id, solicitud_id, advisor_id, submitted_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&offer.id.0)
        .bind(&offer.solicitud_id.0)
        .bind(&offer.advisor_id.0)
        .bind(encode_timestamp(offer.submitted_at))
        .execute(&mut *tx)
        .await?;

        for (position, detail) in offer.details.iter().enumerate() {
            sqlx::query(
                "INSERT INTO offer_detail (
                    offer_id,
                    line_item_id,
                    position,
                    price,
                    warranty_months,
                    delivery_days
                 ) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&offer.id.0)
            .bind(&detail.line_item_id.0)
            .bind(position as i64)
            .bind(detail.price.to_string())
            .bind(i64::from(detail.warranty_months))
            .bind(i64::from(detail.delivery_days))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(solicitud)
    }

    async fn list_for_solicitud(&self, id: &SolicitudId) -> Result<Vec<Offer>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_offers(&mut conn, id).await
    }
}

async fn fetch_solicitud(
    conn: &mut SqliteConnection,
    id: &SolicitudId,
) -> Result<Option<Solicitud>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            id,
            state,
            current_tier,
            tier_started_at,
            minimum_offers_desired,
            origin_city,
            origin_department,
            offer_count,
            version,
            created_at,
            closed_at
         FROM solicitud
         WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let line_items = sqlx::query(
        "SELECT
            id,
            name,
            vehicle_brand,
            vehicle_line,
            vehicle_year,
            quantity
         FROM line_item
         WHERE solicitud_id = ?
         ORDER BY position ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(line_item_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    solicitud_from_row(row, line_items).map(Some)
}

async fn fetch_offers(
    conn: &mut SqliteConnection,
    id: &SolicitudId,
) -> Result<Vec<Offer>, RepositoryError> {
    let offer_rows = sqlx::query(
        "SELECT id, solicitud_id, advisor_id, submitted_at
         FROM offer
         WHERE solicitud_id = ?
         ORDER BY submitted_at ASC, id ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?;

    let detail_rows = sqlx::query(
        "SELECT
            d.offer_id,
            d.line_item_id,
            d.price,
            d.warranty_months,
            d.delivery_days
         FROM offer_detail d
         JOIN offer o ON o.id = d.offer_id
         WHERE o.solicitud_id = ?
         ORDER BY d.offer_id ASC, d.position ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?;

    let mut details: HashMap<String, Vec<OfferDetail>> = HashMap::new();
    for row in detail_rows {
        let offer_id: String = row.try_get("offer_id")?;
        details.entry(offer_id).or_default().push(OfferDetail {
            line_item_id: LineItemId(row.try_get("line_item_id")?),
            price: parse_decimal("price", row.try_get("price")?)?,
            warranty_months: parse_u32("warranty_months", row.try_get("warranty_months")?)?,
            delivery_days: parse_u32("delivery_days", row.try_get("delivery_days")?)?,
        });
    }

    offer_rows
        .into_iter()
        .map(|row| {
            let id: String = row.try_get("id")?;
            Ok(Offer {
                details: details.remove(&id).unwrap_or_default(),
                id: OfferId(id),
                solicitud_id: SolicitudId(row.try_get("solicitud_id")?),
                advisor_id: AdvisorId(row.try_get("advisor_id")?),
                submitted_at: parse_timestamp("submitted_at", row.try_get("submitted_at")?)?,
            })
        })
        .collect()
}

async fn insert_transition(
    conn: &mut SqliteConnection,
    transition: &SolicitudTransition,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO solicitud_transition (
            id,
            solicitud_id,
            decision,
            from_state,
            to_state,
            from_tier,
            to_tier,
            complete_offers,
            total_offers,
            decided_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&transition.id.0)
    .bind(&transition.solicitud_id.0)
    .bind(&transition.decision)
    .bind(transition.from_state.as_str())
    .bind(transition.to_state.as_str())
    .bind(i64::from(transition.from_tier))
    .bind(i64::from(transition.to_tier))
    .bind(i64::from(transition.complete_offers))
    .bind(i64::from(transition.total_offers))
    .bind(encode_timestamp(transition.decided_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn solicitud_from_row(
    row: SqliteRow,
    line_items: Vec<LineItem>,
) -> Result<Solicitud, RepositoryError> {
    Ok(Solicitud {
        id: SolicitudId(row.try_get("id")?),
        state: parse_state("state", row.try_get("state")?)?,
        current_tier: parse_u8("current_tier", row.try_get("current_tier")?)?,
        tier_started_at: parse_timestamp("tier_started_at", row.try_get("tier_started_at")?)?,
        minimum_offers_desired: parse_u32(
            "minimum_offers_desired",
            row.try_get("minimum_offers_desired")?,
        )?,
        origin_city: row.try_get("origin_city")?,
        origin_department: row.try_get("origin_department")?,
        line_items,
        offer_count: parse_u32("offer_count", row.try_get("offer_count")?)?,
        version: parse_u32("version", row.try_get("version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        closed_at: parse_optional_timestamp("closed_at", row.try_get("closed_at")?)?,
    })
}

fn line_item_from_row(row: SqliteRow) -> Result<LineItem, RepositoryError> {
    let year = row.try_get::<i64, _>("vehicle_year")?;
    Ok(LineItem {
        id: LineItemId(row.try_get("id")?),
        name: row.try_get("name")?,
        vehicle: VehicleDescriptor {
            brand: row.try_get("vehicle_brand")?,
            line: row.try_get("vehicle_line")?,
            year: u16::try_from(year).map_err(|_| {
                RepositoryError::Decode(format!("invalid value for `vehicle_year`: {year}"))
            })?,
        },
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
    })
}

fn transition_from_row(row: SqliteRow) -> Result<SolicitudTransition, RepositoryError> {
    Ok(SolicitudTransition {
        id: TransitionId(row.try_get("id")?),
        solicitud_id: SolicitudId(row.try_get("solicitud_id")?),
        decision: row.try_get("decision")?,
        from_state: parse_state("from_state", row.try_get("from_state")?)?,
        to_state: parse_state("to_state", row.try_get("to_state")?)?,
        from_tier: parse_u8("from_tier", row.try_get("from_tier")?)?,
        to_tier: parse_u8("to_tier", row.try_get("to_tier")?)?,
        complete_offers: parse_u32("complete_offers", row.try_get("complete_offers")?)?,
        total_offers: parse_u32("total_offers", row.try_get("total_offers")?)?,
        decided_at: parse_timestamp("decided_at", row.try_get("decided_at")?)?,
    })
}
