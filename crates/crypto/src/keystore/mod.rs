//! Key Store – Identitaets-Schluesselpaar und Public-Key-Verzeichnis
//!
//! Verantwortlich fuer:
//! - Erzeugen und dauerhaftes Speichern genau eines Schluesselpaars pro Identitaet
//! - Veroeffentlichen des eigenen Public Keys in der Registry
//! - Lokalen Cache aller bekannten Public Keys (Verzeichnis)
//!
//! Alle Registry-Aufrufe sind durch `KeyStoreConfig::registry_timeout`
//! begrenzt.

pub mod directory;
pub mod registry;
pub mod storage;

pub use directory::{KeyLookup, PublicKeyDirectory};
pub use registry::{MemoryRegistry, PublicKeyRegistry};
pub use storage::{FileKeyStorage, KeyPairStorage, MemoryKeyStorage};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use coletiva_core::ParticipantId;
use tokio::sync::Mutex;

use crate::e2e::GroupCodec;
use crate::error::{CryptoError, CryptoResult, DirectoryRefreshReport};
use crate::types::{KeyPair, PublicKey};

/// Konfiguration des Key Stores
#[derive(Debug, Clone)]
pub struct KeyStoreConfig {
    /// Maximale Wartezeit pro Registry-Aufruf
    pub registry_timeout: Duration,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            registry_timeout: Duration::from_secs(10),
        }
    }
}

/// Key Store einer Client-Identitaet
pub struct KeyStore<S, R> {
    participant_id: ParticipantId,
    storage: S,
    registry: R,
    directory: PublicKeyDirectory,
    key_pair: Mutex<Option<Arc<KeyPair>>>,
    config: KeyStoreConfig,
}

impl<S: KeyPairStorage, R: PublicKeyRegistry> KeyStore<S, R> {
    pub fn new(participant_id: ParticipantId, storage: S, registry: R) -> Self {
        Self::mit_config(participant_id, storage, registry, KeyStoreConfig::default())
    }

    pub fn mit_config(
        participant_id: ParticipantId,
        storage: S,
        registry: R,
        config: KeyStoreConfig,
    ) -> Self {
        Self {
            participant_id,
            storage,
            registry,
            directory: PublicKeyDirectory::new(),
            key_pair: Mutex::new(None),
            config,
        }
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn directory(&self) -> &PublicKeyDirectory {
        &self.directory
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Liefert das gespeicherte Schluesselpaar oder erzeugt beim ersten
    /// Aufruf ein neues
    ///
    /// Gleichzeitige Aufrufe erhalten dasselbe Paar. Ein vorhandenes Paar
    /// wird nie ersetzt.
    pub async fn ensure_identity(&self) -> CryptoResult<Arc<KeyPair>> {
        let mut slot = self.key_pair.lock().await;
        if let Some(kp) = slot.as_ref() {
            return Ok(kp.clone());
        }

        let key_pair = match self.storage.laden().await.map_err(nicht_verfuegbar)? {
            Some(kp) => kp,
            None => {
                let neu = KeyPair::generieren();
                if self
                    .storage
                    .speichern_neu(&neu)
                    .await
                    .map_err(nicht_verfuegbar)?
                {
                    tracing::info!(participant = %self.participant_id, "Neues Identitaets-Schluesselpaar erzeugt");
                    neu
                } else {
                    // Ein anderer Schreiber war schneller
                    self.storage
                        .laden()
                        .await
                        .map_err(nicht_verfuegbar)?
                        .ok_or_else(|| {
                            CryptoError::KeyPairUnavailable(
                                "Speicher meldet Paar, liefert aber keins".into(),
                            )
                        })?
                }
            }
        };

        let key_pair = Arc::new(key_pair);
        self.directory
            .einfuegen(self.participant_id.clone(), key_pair.public_key());
        *slot = Some(key_pair.clone());
        Ok(key_pair)
    }

    /// Registriert den eigenen Public Key in der Registry. Idempotent.
    pub async fn publish_public_key(&self) -> CryptoResult<()> {
        let key_pair = self.ensure_identity().await?;
        let result = self
            .mit_timeout(
                self.registry
                    .register(&self.participant_id, &key_pair.public_key()),
            )
            .await;

        match &result {
            Ok(()) => {
                tracing::debug!(participant = %self.participant_id, "Public Key veroeffentlicht")
            }
            Err(e) => tracing::warn!(
                participant = %self.participant_id,
                fehler = %e,
                "Public Key konnte nicht veroeffentlicht werden"
            ),
        }
        result
    }

    /// Laedt alle Registry-Eintraege und fuehrt sie in den Cache zusammen
    ///
    /// Fehlerhafte Eintraege werden uebersprungen und im Report gezaehlt.
    /// Ist die Registry nicht erreichbar, bleibt der Cache unveraendert.
    pub async fn refresh_directory(&self) -> CryptoResult<DirectoryRefreshReport> {
        let eintraege = match self.mit_timeout(self.registry.list(None)).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(fehler = %e, "Verzeichnis-Abgleich fehlgeschlagen, Cache unveraendert");
                return Err(e);
            }
        };

        let mut report = DirectoryRefreshReport::default();
        for eintrag in eintraege {
            match PublicKey::aus_base64(&eintrag.public_key) {
                Ok(pk) => {
                    self.directory.einfuegen(eintrag.participant_id, pk);
                    report.aktualisiert += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        participant = %eintrag.participant_id,
                        fehler = %e,
                        "Ungueltiger Registry-Eintrag uebersprungen"
                    );
                    report.fehlgeschlagen.push(eintrag.participant_id);
                }
            }
        }

        tracing::debug!(
            aktualisiert = report.aktualisiert,
            fehlgeschlagen = report.fehlgeschlagen.len(),
            "Verzeichnis abgeglichen"
        );
        Ok(report)
    }

    /// Reiner Cache-Lookup
    pub fn lookup(&self, participant: &ParticipantId) -> Option<PublicKey> {
        self.directory.get(participant)
    }

    /// Cache-Lookup mit Registry-Rueckfall fuer genau diese Identitaet
    ///
    /// Fehler und Timeouts liefern `None` und werden nicht als
    /// negatives Ergebnis gecacht.
    pub async fn lookup_or_fetch(&self, participant: &ParticipantId) -> Option<PublicKey> {
        if let Some(pk) = self.lookup(participant) {
            return Some(pk);
        }

        let filter = [participant.clone()];
        let eintraege = match self.mit_timeout(self.registry.list(Some(&filter))).await {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(participant = %participant, fehler = %e, "Registry-Lookup fehlgeschlagen");
                return None;
            }
        };

        let eintrag = eintraege
            .into_iter()
            .find(|e| &e.participant_id == participant)?;
        match PublicKey::aus_base64(&eintrag.public_key) {
            Ok(pk) => {
                self.directory.einfuegen(participant.clone(), pk);
                Some(pk)
            }
            Err(e) => {
                tracing::warn!(participant = %participant, fehler = %e, "Ungueltiger Registry-Eintrag");
                None
            }
        }
    }

    /// Loescht das lokale Schluesselpaar (expliziter Reset)
    ///
    /// Der naechste `ensure_identity`-Aufruf erzeugt ein neues Paar. Alte
    /// Envelopes sind danach fuer diese Identitaet nicht mehr lesbar.
    pub async fn reset_identity(&self) -> CryptoResult<()> {
        let mut slot = self.key_pair.lock().await;
        self.storage.loeschen().await.map_err(nicht_verfuegbar)?;
        *slot = None;
        self.directory.entfernen(&self.participant_id);
        tracing::warn!(participant = %self.participant_id, "Identitaets-Schluesselpaar zurueckgesetzt");
        Ok(())
    }

    /// Codec fuer die eigene Identitaet
    pub async fn codec(&self) -> CryptoResult<GroupCodec> {
        let key_pair = self.ensure_identity().await?;
        Ok(GroupCodec::new(
            self.participant_id.clone(),
            key_pair,
            self.directory.clone(),
        ))
    }

    async fn mit_timeout<T>(&self, fut: impl Future<Output = CryptoResult<T>>) -> CryptoResult<T> {
        tokio::time::timeout(self.config.registry_timeout, fut)
            .await
            .map_err(|_| CryptoError::RegistryTimeout(self.config.registry_timeout))?
    }
}

fn nicht_verfuegbar(e: CryptoError) -> CryptoError {
    match e {
        CryptoError::KeyPairUnavailable(_) => e,
        other => CryptoError::KeyPairUnavailable(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
