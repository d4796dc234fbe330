//! Oeffentliche Typen fuer die Chat-Services

use coletiva_core::RoomId;
use coletiva_protocol::Envelope;
use serde::{Deserialize, Serialize};

/// Standard-Anzahl Envelopes pro History-Abfrage
pub const HISTORY_STANDARD_LIMIT: u32 = 50;
/// Obergrenze pro History-Abfrage
pub const HISTORY_MAX_LIMIT: u32 = 200;

/// Feste JSON-Last eines Envelopes (IDs, Zeitstempel, Nonce, Feldnamen)
const ENVELOPE_GRUNDLAST: usize = 1024;
/// JSON-Last pro Empfaenger-Eintrag ohne den Schluessel selbst
const EMPFAENGER_LAST: usize = 160;

/// Cursor-basierte Paginierung fuer die Envelope-History
///
/// Der Cursor ist die Empfangsnummer des Relays, nicht der Zeitstempel
/// des Absenders.
#[derive(Debug, Clone)]
pub struct HistoryAnfrage {
    pub room_id: RoomId,
    /// Lade Envelopes vor dieser Empfangsnummer
    pub before_seq: Option<i64>,
    /// Maximale Anzahl (Default: 50, Maximum: 200)
    pub limit: Option<u32>,
    /// Maximale JSON-Groesse aller Envelopes der Seite
    pub max_bytes: Option<usize>,
}

impl HistoryAnfrage {
    pub fn neueste(room_id: RoomId) -> Self {
        Self {
            room_id,
            before_seq: None,
            limit: None,
            max_bytes: None,
        }
    }

    /// Effektives Limit nach Default und Obergrenze
    pub fn effektives_limit(&self) -> u32 {
        self.limit
            .unwrap_or(HISTORY_STANDARD_LIMIT)
            .clamp(1, HISTORY_MAX_LIMIT)
    }
}

/// Eine Seite der History, aelteste zuerst
#[derive(Debug, Clone, Default)]
pub struct HistorySeite {
    pub envelopes: Vec<Envelope>,
    /// Cursor fuer die naechst aeltere Seite; `None` wenn nichts mehr kommt
    pub weitere_vor: Option<i64>,
}

/// Grenzen fuer eingehende Envelopes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeLimits {
    /// Maximale Groesse von Ciphertext plus eingewickelten Schluesseln
    pub max_envelope_bytes: usize,
    /// Maximale Empfaenger pro Envelope
    pub max_empfaenger: usize,
}

impl EnvelopeLimits {
    /// Geschaetzte JSON-Groesse eines Envelopes an beiden Grenzen
    ///
    /// Bytes gehen als Base64 auf den Draht (4 Zeichen pro 3 Bytes).
    pub fn max_kodierte_groesse(&self) -> usize {
        let base64 = self.max_envelope_bytes.div_ceil(3) * 4 + 4 * (self.max_empfaenger + 1);
        base64 + ENVELOPE_GRUNDLAST + EMPFAENGER_LAST * self.max_empfaenger
    }
}

impl Default for EnvelopeLimits {
    fn default() -> Self {
        Self {
            max_envelope_bytes: 256 * 1024,
            max_empfaenger: 512,
        }
    }
}
