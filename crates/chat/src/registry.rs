//! KeyRegistryService – serverseitiges Public-Key-Register

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use coletiva_core::ParticipantId;
use coletiva_db::{PublicKeyRecord, PublicKeyRepository};
use coletiva_protocol::control::PublicKeyEntry;

use crate::error::{ChatError, ChatResult};

/// Laenge eines X25519-Public-Keys in Bytes
const PUBLIC_KEY_LAENGE: usize = 32;

/// Register {Identitaet -> Public Key} ueber einem Repository
pub struct KeyRegistryService<R: PublicKeyRepository> {
    repo: Arc<R>,
}

impl<R: PublicKeyRepository> KeyRegistryService<R> {
    pub fn neu(repo: Arc<R>) -> Arc<Self> {
        Arc::new(Self { repo })
    }

    /// Registriert oder ersetzt den Schluessel einer Identitaet
    ///
    /// Der Schluessel muss Base64 sein und genau 32 Bytes ergeben.
    pub async fn schluessel_registrieren(
        &self,
        participant: &ParticipantId,
        public_key: &str,
    ) -> ChatResult<PublicKeyRecord> {
        if participant.ist_leer() {
            return Err(ChatError::UngueltigeEingabe("Leere Identitaet".into()));
        }

        let normalisiert = public_key.trim();
        let bytes = STANDARD
            .decode(normalisiert.as_bytes())
            .map_err(|e| ChatError::UngueltigerSchluessel(e.to_string()))?;
        if bytes.len() != PUBLIC_KEY_LAENGE {
            return Err(ChatError::UngueltigerSchluessel(format!(
                "erwartet {PUBLIC_KEY_LAENGE} Bytes, erhalten {}",
                bytes.len()
            )));
        }

        let record = self.repo.upsert(participant, normalisiert).await?;
        tracing::info!(participant = %participant, "Public Key im Register gespeichert");
        Ok(record)
    }

    /// Listet Register-Eintraege (optional gefiltert)
    pub async fn schluessel_auflisten(
        &self,
        filter: Option<&[ParticipantId]>,
    ) -> ChatResult<Vec<PublicKeyEntry>> {
        let records = self.repo.list(filter).await?;
        Ok(records
            .into_iter()
            .map(|r| PublicKeyEntry {
                participant_id: r.participant_id,
                public_key: r.public_key,
            })
            .collect())
    }
}
