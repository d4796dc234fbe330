//! Verschluesselter Envelope – die Einheit die persistiert und uebertragen wird
//!
//! Ein Envelope enthaelt genau einen Ciphertext, eine Nonce und einen
//! eingewickelten Schluessel pro Empfaenger. Relay und Speicher behandeln
//! ihn als undurchsichtigen Wert; nur die Raum-ID wird fuers Routing gelesen.
//!
//! ## JSON-Format
//! ```text
//! {
//!   "id": "<uuid>",
//!   "room_id": "lobby",
//!   "algorithm": "aes256_gcm",
//!   "nonce": "<base64, 12 Bytes>",
//!   "ciphertext": "<base64>",
//!   "keys": [{ "recipient": "alice", "wrapped_key": "<base64>" }],
//!   "meta": { "sender_id": "alice", "created_at": "2026-01-01T00:00:00Z" }
//! }
//! ```

use chrono::{DateTime, Utc};
use coletiva_core::{EnvelopeId, ParticipantId, RoomId};
use serde::{Deserialize, Serialize};

/// Laenge der Envelope-Nonce in Bytes (96 Bit, AEAD-Standard)
pub const NONCE_LAENGE: usize = 12;

/// Symmetrischer Algorithmus fuer Payload und Key-Wrapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadAlgorithm {
    #[default]
    Aes256Gcm,
    ChaCha20Poly1305,
}

/// Eingewickelter Schluessel fuer genau einen Empfaenger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    pub recipient: ParticipantId,
    #[serde(with = "base64_bytes")]
    pub wrapped_key: Vec<u8>,
}

/// Metadaten eines Envelopes (Klartext, fuer Routing und Anzeige)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    pub sender_id: ParticipantId,
    pub created_at: DateTime<Utc>,
}

/// Verschluesselter Gruppen-Envelope (unveraenderlich nach Erstellung)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    #[serde(default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub algorithm: PayloadAlgorithm,
    #[serde(with = "base64_nonce")]
    pub nonce: [u8; NONCE_LAENGE],
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    pub keys: Vec<WrappedKey>,
    pub meta: EnvelopeMeta,
}

impl Envelope {
    /// Sucht den eingewickelten Schluessel fuer eine Identitaet
    pub fn key_for(&self, recipient: &ParticipantId) -> Option<&WrappedKey> {
        self.keys.iter().find(|k| &k.recipient == recipient)
    }

    /// Alle adressierten Empfaenger in Envelope-Reihenfolge
    pub fn recipients(&self) -> impl Iterator<Item = &ParticipantId> {
        self.keys.iter().map(|k| &k.recipient)
    }

    /// Gibt eine Kopie mit gesetzter Raum-ID zurueck
    pub fn im_raum(mut self, room_id: RoomId) -> Self {
        self.room_id = Some(room_id);
        self
    }

    /// Ungefaehre Groesse der verschluesselten Nutzdaten in Bytes
    pub fn payload_groesse(&self) -> usize {
        self.ciphertext.len() + self.keys.iter().map(|k| k.wrapped_key.len()).sum::<usize>()
    }
}

/// Serde-Helfer: `Vec<u8>` als Base64-String
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Serde-Helfer: Nonce fester Laenge als Base64-String
mod base64_nonce {
    use super::NONCE_LAENGE;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(nonce: &[u8; NONCE_LAENGE], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(nonce))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; NONCE_LAENGE], D::Error> {
        let encoded = String::deserialize(d)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        let laenge = bytes.len();
        bytes.try_into().map_err(|_| {
            serde::de::Error::custom(format!(
                "Ungueltige Nonce-Laenge: erwartet {NONCE_LAENGE}, erhalten {laenge}"
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
