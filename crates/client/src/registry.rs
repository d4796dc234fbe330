//! Public-Key-Register ueber die Relay-Verbindung

use coletiva_core::ParticipantId;
use coletiva_crypto::{CryptoError, CryptoResult, PublicKey, PublicKeyRegistry};
use coletiva_protocol::control::PublicKeyEntry;
use std::sync::Arc;

use crate::connection::RelayConnection;
use crate::error::ClientError;

/// `PublicKeyRegistry` ueber `KeyRegister`/`KeyList` des Relays
#[derive(Clone)]
pub struct RelayRegistry {
    verbindung: Arc<RelayConnection>,
}

impl RelayRegistry {
    pub fn new(verbindung: Arc<RelayConnection>) -> Self {
        Self { verbindung }
    }
}

fn registry_fehler(e: ClientError) -> CryptoError {
    CryptoError::Registry(e.to_string())
}

impl PublicKeyRegistry for RelayRegistry {
    async fn register(&self, participant: &ParticipantId, public_key: &PublicKey) -> CryptoResult<()> {
        self.verbindung
            .schluessel_registrieren(participant, public_key.zu_base64())
            .await
            .map_err(registry_fehler)
    }

    async fn list(&self, filter: Option<&[ParticipantId]>) -> CryptoResult<Vec<PublicKeyEntry>> {
        self.verbindung
            .schluessel_auflisten(filter)
            .await
            .map_err(registry_fehler)
    }
}
