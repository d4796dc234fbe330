//! Public-Key-Registry (verteiltes Verzeichnis aller Teilnehmer-Schluessel)
//!
//! Das `PublicKeyRegistry`-Trait abstrahiert die konkrete Registry
//! (Relay-Verbindung, Datenbank, In-Memory fuer Tests).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use coletiva_core::ParticipantId;
use coletiva_protocol::control::PublicKeyEntry;
use parking_lot::Mutex;

use crate::error::{CryptoError, CryptoResult};
use crate::types::PublicKey;

/// Abstrakte Public-Key-Registry
#[allow(async_fn_in_trait)]
pub trait PublicKeyRegistry {
    /// Registriert (Identitaet, Public Key). Idempotent.
    async fn register(&self, participant: &ParticipantId, public_key: &PublicKey) -> CryptoResult<()>;

    /// Listet Eintraege, optional auf bestimmte Identitaeten gefiltert
    ///
    /// Schluessel kommen Base64-kodiert und ungeprueft zurueck.
    async fn list(&self, filter: Option<&[ParticipantId]>) -> CryptoResult<Vec<PublicKeyEntry>>;
}

/// In-Memory-Registry (Tests und Einzelprozess-Betrieb)
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    eintraege: Mutex<BTreeMap<ParticipantId, String>>,
    nicht_erreichbar: AtomicBool,
    verzoegerung: Mutex<Option<Duration>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Setzt einen rohen (ungeprueften) Eintrag
    pub fn roh_setzen(&self, participant: ParticipantId, public_key: impl Into<String>) {
        self.eintraege.lock().insert(participant, public_key.into());
    }

    /// Simuliert eine nicht erreichbare Registry
    pub fn ausfall_simulieren(&self, ausgefallen: bool) {
        self.nicht_erreichbar.store(ausgefallen, Ordering::SeqCst);
    }

    /// Verzoegert jede Antwort (fuer Timeout-Tests)
    pub fn verzoegerung_setzen(&self, verzoegerung: Option<Duration>) {
        *self.verzoegerung.lock() = verzoegerung;
    }

    pub fn len(&self) -> usize {
        self.eintraege.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.lock().is_empty()
    }

    async fn erreichbar(&self) -> CryptoResult<()> {
        let verzoegerung = *self.verzoegerung.lock();
        if let Some(d) = verzoegerung {
            tokio::time::sleep(d).await;
        }
        if self.nicht_erreichbar.load(Ordering::SeqCst) {
            return Err(CryptoError::Registry("Registry nicht erreichbar".into()));
        }
        Ok(())
    }
}

impl PublicKeyRegistry for MemoryRegistry {
    async fn register(&self, participant: &ParticipantId, public_key: &PublicKey) -> CryptoResult<()> {
        self.erreichbar().await?;
        self.eintraege
            .lock()
            .insert(participant.clone(), public_key.zu_base64());
        Ok(())
    }

    async fn list(&self, filter: Option<&[ParticipantId]>) -> CryptoResult<Vec<PublicKeyEntry>> {
        self.erreichbar().await?;
        let eintraege = self.eintraege.lock();
        Ok(eintraege
            .iter()
            .filter(|(id, _)| filter.map_or(true, |f| f.contains(id)))
            .map(|(id, pk)| PublicKeyEntry {
                participant_id: id.clone(),
                public_key: pk.clone(),
            })
            .collect())
    }
}

impl<R: PublicKeyRegistry + ?Sized> PublicKeyRegistry for std::sync::Arc<R> {
    async fn register(&self, participant: &ParticipantId, public_key: &PublicKey) -> CryptoResult<()> {
        (**self).register(participant, public_key).await
    }

    async fn list(&self, filter: Option<&[ParticipantId]>) -> CryptoResult<Vec<PublicKeyEntry>> {
        (**self).list(filter).await
    }
}
