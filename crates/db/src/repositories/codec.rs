//! Column encoding shared by the SQL repositories.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use repuestos_core::domain::adjudication::{Adjudication, AdjudicationId};
use repuestos_core::domain::advisor::AdvisorId;
use repuestos_core::domain::offer::OfferId;
use repuestos_core::domain::solicitud::{LineItemId, SolicitudId, SolicitudState};
use repuestos_core::evaluation::ScoreBreakdown;

use super::{OutboxEntry, RepositoryError};

/// Fixed-width RFC 3339 so stored timestamps also sort as text.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_u8(column: &str, value: i64) -> Result<u8, RepositoryError> {
    u8::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("invalid value for `{column}` (expected u8): {value}"))
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_state(column: &str, value: String) -> Result<SolicitudState, RepositoryError> {
    SolicitudState::parse(&value).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown solicitud state in `{column}`: `{value}`"))
    })
}

pub(crate) fn encode_json<T: serde::Serialize>(
    column: &str,
    value: &T,
) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{column}`: {error}")))
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn adjudication_from_row(row: SqliteRow) -> Result<Adjudication, RepositoryError> {
    let scores_json = row.try_get::<String, _>("scores_json")?;
    let scores: ScoreBreakdown = parse_json("scores_json", &scores_json)?;

    Ok(Adjudication {
        id: AdjudicationId(row.try_get("id")?),
        solicitud_id: SolicitudId(row.try_get("solicitud_id")?),
        line_item_id: LineItemId(row.try_get("line_item_id")?),
        offer_id: OfferId(row.try_get("offer_id")?),
        advisor_id: AdvisorId(row.try_get("advisor_id")?),
        price: parse_decimal("price", row.try_get("price")?)?,
        delivery_days: parse_u32("delivery_days", row.try_get("delivery_days")?)?,
        warranty_months: parse_u32("warranty_months", row.try_get("warranty_months")?)?,
        scores,
        candidates_considered: parse_u32(
            "candidates_considered",
            row.try_get("candidates_considered")?,
        )?,
        adjudicated_at: parse_timestamp("adjudicated_at", row.try_get("adjudicated_at")?)?,
    })
}

pub(crate) fn outbox_from_row(row: SqliteRow) -> Result<OutboxEntry, RepositoryError> {
    let payload = row.try_get::<String, _>("payload_json")?;

    Ok(OutboxEntry {
        id: row.try_get("id")?,
        solicitud_id: SolicitudId(row.try_get("solicitud_id")?),
        event: parse_json("payload_json", &payload)?,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        last_error: row.try_get("last_error")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        dispatched_at: parse_optional_timestamp("dispatched_at", row.try_get("dispatched_at")?)?,
    })
}

/// Inserts outbox rows, skipping ids already present. Returns rows written.
pub(crate) async fn insert_outbox_entries(
    conn: &mut SqliteConnection,
    entries: &[OutboxEntry],
) -> Result<u64, RepositoryError> {
    let mut written = 0;
    for entry in entries {
        let result = sqlx::query(
            "INSERT INTO notification_outbox (
                id,
                solicitud_id,
                kind,
                payload_json,
                attempts,
                last_error,
                created_at,
                dispatched_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&entry.id)
        .bind(&entry.solicitud_id.0)
        .bind(entry.event.kind())
        .bind(encode_json("payload_json", &entry.event)?)
        .bind(i64::from(entry.attempts))
        .bind(entry.last_error.as_deref())
        .bind(encode_timestamp(entry.created_at))
        .bind(entry.dispatched_at.map(encode_timestamp))
        .execute(&mut *conn)
        .await?;
        written += result.rows_affected();
    }
    Ok(written)
}

/// Insert-if-absent per (solicitud, line item); each written row also gets
/// its `adjudicated` outbox entry. Returns the rows actually written.
pub(crate) async fn insert_adjudications(
    conn: &mut SqliteConnection,
    adjudications: &[Adjudication],
) -> Result<Vec<Adjudication>, RepositoryError> {
    let mut recorded = Vec::new();
    for adjudication in adjudications {
        let result = sqlx::query(
            "INSERT INTO adjudication (
                id,
                solicitud_id,
                line_item_id,
                offer_id,
                advisor_id,
                price,
                delivery_days,
                warranty_months,
                scores_json,
                candidates_considered,
                adjudicated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(&adjudication.id.0)
        .bind(&adjudication.solicitud_id.0)
        .bind(&adjudication.line_item_id.0)
        .bind(&adjudication.offer_id.0)
        .bind(&adjudication.advisor_id.0)
        .bind(adjudication.price.to_string())
        .bind(i64::from(adjudication.delivery_days))
        .bind(i64::from(adjudication.warranty_months))
        .bind(encode_json("scores_json", &adjudication.scores)?)
        .bind(i64::from(adjudication.candidates_considered))
        .bind(encode_timestamp(adjudication.adjudicated_at))
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() > 0 {
            recorded.push(adjudication.clone());
        }
    }

    let notifications: Vec<OutboxEntry> = recorded.iter().map(OutboxEntry::adjudicated).collect();
    insert_outbox_entries(conn, &notifications).await?;

    Ok(recorded)
}
