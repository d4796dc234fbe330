//! Repository-Trait-Definitionen
//!
//! Das Repository-Pattern entkoppelt Relay und Services von der konkreten
//! Datenbank-Implementierung.

use coletiva_core::{EnvelopeId, ParticipantId, RoomId};
use coletiva_protocol::Envelope;

use crate::error::DbError;
use crate::models::{EnvelopeFilter, EnvelopeRecord, PublicKeyRecord};

pub type DbResult<T> = Result<T, DbError>;

/// Konfiguration fuer die Datenbankverbindung
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Verbindungs-URL (z.B. "sqlite://coletiva.db")
    pub url: String,
    /// Maximale Anzahl gleichzeitiger Verbindungen im Pool
    pub max_verbindungen: u32,
    /// Ob WAL-Modus bei SQLite aktiviert werden soll
    pub sqlite_wal: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://coletiva.db".into(),
            max_verbindungen: 5,
            sqlite_wal: true,
        }
    }
}

/// Envelope-Speicher (nur Anhaengen, keine Aenderungen)
#[allow(async_fn_in_trait)]
pub trait EnvelopeRepository: Send + Sync {
    /// Envelope unveraendert fuer einen Raum speichern
    ///
    /// Eine bereits gespeicherte Envelope-ID ergibt `DbError::Eindeutigkeit`.
    async fn speichern(&self, room_id: &RoomId, envelope: &Envelope) -> DbResult<EnvelopeRecord>;

    async fn get_by_id(&self, id: EnvelopeId) -> DbResult<Option<EnvelopeRecord>>;

    /// Neueste `limit` Envelopes eines Raums, aelteste zuerst
    async fn history(&self, filter: EnvelopeFilter) -> DbResult<Vec<EnvelopeRecord>>;

    async fn anzahl(&self, room_id: &RoomId) -> DbResult<i64>;
}

/// Public-Key-Register
#[allow(async_fn_in_trait)]
pub trait PublicKeyRepository: Send + Sync {
    /// Schluessel setzen oder ersetzen (letzter Schreiber gewinnt)
    async fn upsert(&self, participant: &ParticipantId, public_key: &str) -> DbResult<PublicKeyRecord>;

    async fn get(&self, participant: &ParticipantId) -> DbResult<Option<PublicKeyRecord>>;

    /// Alle Eintraege, optional auf bestimmte Identitaeten gefiltert
    async fn list(&self, filter: Option<&[ParticipantId]>) -> DbResult<Vec<PublicKeyRecord>>;
}
