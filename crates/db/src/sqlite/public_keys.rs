//! SQLite-Implementierung des PublicKeyRepository

use chrono::Utc;
use coletiva_core::ParticipantId;
use sqlx::{QueryBuilder, Row as _, Sqlite};

use crate::models::PublicKeyRecord;
use crate::repository::{DbResult, PublicKeyRepository};
use crate::sqlite::pool::SqliteDb;
use crate::sqlite::{format_timestamp, parse_timestamp};

impl PublicKeyRepository for SqliteDb {
    async fn upsert(&self, participant: &ParticipantId, public_key: &str) -> DbResult<PublicKeyRecord> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO public_keys (participant_id, public_key, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(participant_id) DO UPDATE
             SET public_key = excluded.public_key, updated_at = excluded.updated_at",
        )
        .bind(participant.as_str())
        .bind(public_key)
        .bind(format_timestamp(&now))
        .execute(&self.pool)
        .await?;

        tracing::debug!(participant = %participant, "Public Key registriert");

        Ok(PublicKeyRecord {
            participant_id: participant.clone(),
            public_key: public_key.to_string(),
            updated_at: now,
        })
    }

    async fn get(&self, participant: &ParticipantId) -> DbResult<Option<PublicKeyRecord>> {
        let row = sqlx::query(
            "SELECT participant_id, public_key, updated_at
             FROM public_keys WHERE participant_id = ?",
        )
        .bind(participant.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_record(&r)).transpose()
    }

    async fn list(&self, filter: Option<&[ParticipantId]>) -> DbResult<Vec<PublicKeyRecord>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT participant_id, public_key, updated_at FROM public_keys");

        if let Some(ids) = filter {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(" WHERE participant_id IN (");
            let mut getrennt = qb.separated(", ");
            for id in ids {
                getrennt.push_bind(id.as_str().to_string());
            }
            getrennt.push_unseparated(")");
        }
        qb.push(" ORDER BY participant_id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> DbResult<PublicKeyRecord> {
    Ok(PublicKeyRecord {
        participant_id: ParticipantId::new(row.try_get::<String, _>("participant_id")?),
        public_key: row.try_get("public_key")?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}
