//! Client-Konfiguration

use coletiva_protocol::wire::DEFAULT_MAX_FRAME_SIZE;
use coletiva_protocol::PayloadAlgorithm;
use std::time::Duration;

/// Konfiguration fuer Verbindung und Chat-Client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximale Wartezeit fuer Verbindungsaufbau und jede Anfrage
    pub anfrage_timeout: Duration,
    /// Wird im Handshake mitgesendet
    pub client_version: String,
    /// Puffer fuer empfangene Broadcasts
    pub broadcast_queue: usize,
    /// Algorithmus fuer neue Envelopes
    pub algorithm: PayloadAlgorithm,
    /// Muss zu `max_frame_bytes` des Relays passen
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            anfrage_timeout: Duration::from_secs(10),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            broadcast_queue: 256,
            algorithm: PayloadAlgorithm::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}
