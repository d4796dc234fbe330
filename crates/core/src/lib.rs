//! coletiva-core – Gemeinsame Identifikationstypen
//!
//! Dieses Crate stellt die Bausteine bereit, die Krypto-, Protokoll-,
//! Relay- und Client-Crates gemeinsam nutzen: Teilnehmer-, Raum- und
//! Envelope-IDs.

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{EnvelopeId, ParticipantId, RoomId};
