//! SQLite-Implementierung des EnvelopeRepository
//!
//! Felder werden einzeln abgelegt (Nonce und Ciphertext als BLOB, die
//! eingewickelten Schluessel als JSON) und beim Laden bitgenau wieder
//! zusammengesetzt.

use chrono::Utc;
use coletiva_core::{EnvelopeId, ParticipantId, RoomId};
use coletiva_protocol::{Envelope, EnvelopeMeta, PayloadAlgorithm, WrappedKey, NONCE_LAENGE};
use sqlx::Row as _;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::{EnvelopeFilter, EnvelopeRecord};
use crate::repository::{DbResult, EnvelopeRepository};
use crate::sqlite::pool::SqliteDb;
use crate::sqlite::{format_timestamp, parse_timestamp};

const SPALTEN: &str = "seq, id, room_id, sender_id, created_at, algorithm, nonce, ciphertext, keys, stored_at";

fn algorithmus_als_str(alg: PayloadAlgorithm) -> &'static str {
    match alg {
        PayloadAlgorithm::Aes256Gcm => "aes256_gcm",
        PayloadAlgorithm::ChaCha20Poly1305 => "chacha20_poly1305",
    }
}

fn algorithmus_parsen(s: &str) -> DbResult<PayloadAlgorithm> {
    match s {
        "aes256_gcm" => Ok(PayloadAlgorithm::Aes256Gcm),
        "chacha20_poly1305" => Ok(PayloadAlgorithm::ChaCha20Poly1305),
        other => Err(DbError::intern(format!("Unbekannter Algorithmus '{other}'"))),
    }
}

impl EnvelopeRepository for SqliteDb {
    async fn speichern(&self, room_id: &RoomId, envelope: &Envelope) -> DbResult<EnvelopeRecord> {
        let keys_json = serde_json::to_string(&envelope.keys)?;
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO envelopes
             (id, room_id, sender_id, created_at, algorithm, nonce, ciphertext, keys, stored_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(envelope.id.inner().to_string())
        .bind(room_id.as_str())
        .bind(envelope.meta.sender_id.as_str())
        .bind(format_timestamp(&envelope.meta.created_at))
        .bind(algorithmus_als_str(envelope.algorithm))
        .bind(envelope.nonce.as_slice())
        .bind(envelope.ciphertext.as_slice())
        .bind(&keys_json)
        .bind(format_timestamp(&now))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                DbError::Eindeutigkeit(format!("{} bereits gespeichert", envelope.id))
            }
            other => DbError::Sqlx(other),
        })?;

        let seq = result.last_insert_rowid();
        tracing::debug!(
            envelope_id = %envelope.id,
            room_id = %room_id,
            seq,
            "Envelope gespeichert"
        );

        Ok(EnvelopeRecord {
            seq,
            room_id: room_id.clone(),
            envelope: envelope.clone().im_raum(room_id.clone()),
            stored_at: now,
        })
    }

    async fn get_by_id(&self, id: EnvelopeId) -> DbResult<Option<EnvelopeRecord>> {
        let row = sqlx::query(&format!("SELECT {SPALTEN} FROM envelopes WHERE id = ?"))
            .bind(id.inner().to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_envelope(&r)).transpose()
    }

    async fn history(&self, filter: EnvelopeFilter) -> DbResult<Vec<EnvelopeRecord>> {
        // Filter und Sortierung beide auf `seq`; `created_at` stammt von
        // der Uhr des Absenders
        let rows = if let Some(before_seq) = filter.before_seq {
            sqlx::query(&format!(
                "SELECT {SPALTEN} FROM envelopes
                 WHERE room_id = ? AND seq < ?
                 ORDER BY seq DESC
                 LIMIT ?"
            ))
            .bind(filter.room_id.as_str())
            .bind(before_seq)
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {SPALTEN} FROM envelopes
                 WHERE room_id = ?
                 ORDER BY seq DESC
                 LIMIT ?"
            ))
            .bind(filter.room_id.as_str())
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await?
        };

        // Empfangsreihenfolge (aelteste zuerst)
        let mut records: Vec<EnvelopeRecord> =
            rows.iter().map(row_to_envelope).collect::<DbResult<_>>()?;
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }

    async fn anzahl(&self, room_id: &RoomId) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS anzahl FROM envelopes WHERE room_id = ?")
            .bind(room_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("anzahl")?)
    }
}

fn row_to_envelope(row: &sqlx::sqlite::SqliteRow) -> DbResult<EnvelopeRecord> {
    let id_str: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DbError::intern(format!("Ungueltige Envelope-UUID '{id_str}': {e}")))?;

    let nonce_bytes: Vec<u8> = row.try_get("nonce")?;
    let nonce: [u8; NONCE_LAENGE] = nonce_bytes.as_slice().try_into().map_err(|_| {
        DbError::UngueltigeDaten(format!(
            "Nonce von {id_str} hat {} statt {NONCE_LAENGE} Bytes",
            nonce_bytes.len()
        ))
    })?;

    let keys_json: String = row.try_get("keys")?;
    let keys: Vec<WrappedKey> = serde_json::from_str(&keys_json)?;

    let room_id = RoomId::new(row.try_get::<String, _>("room_id")?);
    let algorithm = algorithmus_parsen(&row.try_get::<String, _>("algorithm")?)?;
    let created_at = parse_timestamp(&row.try_get::<String, _>("created_at")?)?;
    let stored_at = parse_timestamp(&row.try_get::<String, _>("stored_at")?)?;

    Ok(EnvelopeRecord {
        seq: row.try_get("seq")?,
        room_id: room_id.clone(),
        envelope: Envelope {
            id: EnvelopeId(id),
            room_id: Some(room_id),
            algorithm,
            nonce,
            ciphertext: row.try_get("ciphertext")?,
            keys,
            meta: EnvelopeMeta {
                sender_id: ParticipantId::new(row.try_get::<String, _>("sender_id")?),
                created_at,
            },
        },
        stored_at,
    })
}
