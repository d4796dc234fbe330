//! Control-Protokoll zwischen Client und Relay
//!
//! Definiert alle Nachrichten die ueber die TCP-Verbindung ausgetauscht
//! werden.
//!
//! ## Design
//! - Request/Response Pattern: jede Nachricht hat eine `request_id: u32`
//! - Server-initiierte Nachrichten (Broadcast, Ping) tragen `request_id = 0`
//! - JSON-Serialisierung via serde, Tagged Enums fuer typsichere Payloads
//! - Envelopes werden unveraendert transportiert

use coletiva_core::{EnvelopeId, ParticipantId, RoomId};
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer Error-Responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InternalError,
    InvalidRequest,
    NotFound,
    PermissionDenied,
    /// Operation im aktuellen Verbindungszustand nicht erlaubt
    NotAuthenticated,
    /// Verbindung ist dem Raum nicht beigetreten
    NotJoined,
    AlreadyAuthenticated,
    PayloadTooLarge,
    ServerFull,
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Identitaets-Handshake vom Client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloRequest {
    /// Vom Session-Provider gelieferte Identitaet
    pub participant_id: ParticipantId,
    pub client_version: String,
}

/// Antwort auf einen erfolgreichen Handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResponse {
    pub participant_id: ParticipantId,
    /// Verbindungs-ID auf dem Relay (nur fuer Diagnose)
    pub session_id: u64,
    pub server_name: String,
}

// ---------------------------------------------------------------------------
// Raeume
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomJoinRequest {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomJoinResponse {
    pub room_id: RoomId,
    /// Anzahl der Verbindungen im Raum inkl. der eigenen
    pub mitglieder: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomLeaveRequest {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomLeaveResponse {
    pub room_id: RoomId,
    /// `false` wenn die Verbindung gar nicht beigetreten war
    pub war_beigetreten: bool,
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Envelope in einem Raum veroeffentlichen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub room_id: RoomId,
    pub envelope: Envelope,
}

/// Bestaetigung nach Persistenz und Fan-Out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    pub envelope_id: EnvelopeId,
    pub room_id: RoomId,
    /// Anzahl der anderen Verbindungen die den Envelope erhalten haben
    pub zugestellt: usize,
}

/// Vom Relay an alle anderen Raum-Mitglieder verteilter Envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeBroadcast {
    pub room_id: RoomId,
    pub envelope: Envelope,
}

/// History eines Raums aus dem Envelope-Speicher laden
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub room_id: RoomId,
    /// Cursor aus `HistoryResponse::weitere_vor` der vorigen Seite
    pub before_seq: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub room_id: RoomId,
    /// Aelteste zuerst
    pub envelopes: Vec<Envelope>,
    /// Gesetzt wenn aeltere Envelopes existieren (Limit oder Frame-Groesse)
    pub weitere_vor: Option<i64>,
}

// ---------------------------------------------------------------------------
// Public-Key-Register
// ---------------------------------------------------------------------------

/// Registriert den oeffentlichen Schluessel der eigenen Identitaet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRegisterRequest {
    pub participant_id: ParticipantId,
    /// Base64-kodierter X25519-Public-Key
    pub public_key: String,
}

/// Listet registrierte Schluessel (optional gefiltert)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyListRequest {
    pub participants: Option<Vec<ParticipantId>>,
}

/// Ein Eintrag des Public-Key-Registers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyEntry {
    pub participant_id: ParticipantId,
    /// Base64-kodiert; wird erst clientseitig validiert
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyListResponse {
    pub entries: Vec<PublicKeyEntry>,
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

/// Ping (Client -> Relay oder Relay -> Client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMessage {
    /// Unix-Timestamp in Millisekunden fuer RTT-Messung
    pub timestamp_ms: u64,
}

/// Pong-Antwort (spiegelt Timestamp zurueck)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    pub echo_timestamp_ms: u64,
    pub timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Haupt-Enum: ControlPayload
// ---------------------------------------------------------------------------

/// Alle moeglichen Control-Nachrichten (typsicher via Tagged Enum)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlPayload {
    // Handshake
    Hello(HelloRequest),
    HelloResponse(HelloResponse),
    Logout,
    LogoutResponse,

    // Raeume
    RoomJoin(RoomJoinRequest),
    RoomJoinResponse(RoomJoinResponse),
    RoomLeave(RoomLeaveRequest),
    RoomLeaveResponse(RoomLeaveResponse),

    // Envelopes
    Publish(PublishRequest),
    PublishResponse(PublishResponse),
    Broadcast(EnvelopeBroadcast),
    History(HistoryRequest),
    HistoryResponse(HistoryResponse),

    // Register
    KeyRegister(KeyRegisterRequest),
    KeyRegisterResponse { participant_id: ParticipantId },
    KeyList(KeyListRequest),
    KeyListResponse(KeyListResponse),

    // Keepalive
    Ping(PingMessage),
    Pong(PongMessage),

    // Fehler
    Error(ErrorResponse),
}

impl ControlPayload {
    /// Kurzname fuer Logs (ohne Inhalte)
    pub fn art(&self) -> &'static str {
        match self {
            Self::Hello(_) => "hello",
            Self::HelloResponse(_) => "hello_response",
            Self::Logout => "logout",
            Self::LogoutResponse => "logout_response",
            Self::RoomJoin(_) => "room_join",
            Self::RoomJoinResponse(_) => "room_join_response",
            Self::RoomLeave(_) => "room_leave",
            Self::RoomLeaveResponse(_) => "room_leave_response",
            Self::Publish(_) => "publish",
            Self::PublishResponse(_) => "publish_response",
            Self::Broadcast(_) => "broadcast",
            Self::History(_) => "history",
            Self::HistoryResponse(_) => "history_response",
            Self::KeyRegister(_) => "key_register",
            Self::KeyRegisterResponse { .. } => "key_register_response",
            Self::KeyList(_) => "key_list",
            Self::KeyListResponse(_) => "key_list_response",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Error(_) => "error",
        }
    }
}

/// Standardisierte Fehler-Antwort
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Control-Frame (Umschlag fuer alle Nachrichten)
// ---------------------------------------------------------------------------

/// Control-Protokoll-Nachricht mit Request/Response-Zuordnung
///
/// Der Client vergibt die `request_id` (ab 1), der Relay kopiert sie in
/// die Antwort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub request_id: u32,
    pub payload: ControlPayload,
}

impl ControlMessage {
    pub fn new(request_id: u32, payload: ControlPayload) -> Self {
        Self {
            request_id,
            payload,
        }
    }

    /// Erstellt eine Ping-Nachricht
    pub fn ping(request_id: u32, timestamp_ms: u64) -> Self {
        Self::new(request_id, ControlPayload::Ping(PingMessage { timestamp_ms }))
    }

    /// Erstellt eine Pong-Antwort
    pub fn pong(request_id: u32, echo_timestamp_ms: u64, timestamp_ms: u64) -> Self {
        Self::new(
            request_id,
            ControlPayload::Pong(PongMessage {
                echo_timestamp_ms,
                timestamp_ms,
            }),
        )
    }

    /// Erstellt eine Fehler-Antwort
    pub fn error(request_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            request_id,
            ControlPayload::Error(ErrorResponse {
                code,
                message: message.into(),
            }),
        )
    }

    /// Erstellt einen Broadcast fuer einen Raum
    pub fn broadcast(room_id: RoomId, envelope: Envelope) -> Self {
        Self::new(
            0,
            ControlPayload::Broadcast(EnvelopeBroadcast { room_id, envelope }),
        )
    }
}

/// Aktueller Unix-Timestamp in Millisekunden
pub fn jetzt_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
