//! Datenbankmodelle fuer Coletiva
//!
//! Diese Typen repraesentieren Datensaetze aus der Datenbank. Envelopes
//! werden unveraendert gespeichert; das Modell ergaenzt nur Speicher-
//! Metadaten.

use chrono::{DateTime, Utc};
use coletiva_core::{ParticipantId, RoomId};
use coletiva_protocol::Envelope;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Gespeicherter Envelope mit Speicher-Metadaten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeRecord {
    /// Monotone Empfangsnummer (global, nicht pro Raum)
    pub seq: i64,
    pub room_id: RoomId,
    pub envelope: Envelope,
    pub stored_at: DateTime<Utc>,
}

/// Filter fuer die History-Abfrage eines Raums
#[derive(Debug, Clone)]
pub struct EnvelopeFilter {
    pub room_id: RoomId,
    /// Nur Envelopes mit kleinerer Empfangsnummer (Cursor der Vorseite)
    pub before_seq: Option<i64>,
    pub limit: i64,
}

impl EnvelopeFilter {
    pub fn neueste(room_id: RoomId, limit: i64) -> Self {
        Self {
            room_id,
            before_seq: None,
            limit,
        }
    }
}

// ---------------------------------------------------------------------------
// Public Keys
// ---------------------------------------------------------------------------

/// Eintrag im Public-Key-Register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub participant_id: ParticipantId,
    /// Base64-kodierter X25519-Public-Key
    pub public_key: String,
    pub updated_at: DateTime<Utc>,
}
