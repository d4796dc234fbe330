//! ChatClient – Key Store, Gruppen-Codec und Relay-Verbindung
//!
//! ```text
//! start()        Hello -> Identitaet sichern -> Public Key veroeffentlichen -> Verzeichnis abgleichen
//! send_message() verschluesseln (alle Schluessel vorher aufloesen) -> Publish
//! next_message() Broadcast -> entschluesseln (Ergebnis pro Nachricht)
//! ```
//!
//! Die eigene Identitaet ist immer Empfaengerin der eigenen Envelopes, damit
//! sie in der History lesbar bleiben. Ein lokales Echo gibt es nicht.
//!
//! Scheitert das Veroeffentlichen des Public Keys, laeuft `start()` weiter.
//! Der Versuch wird beim naechsten `send_message()` oder ueber
//! `publish_nachholen()` wiederholt.

use chrono::{DateTime, Utc};
use coletiva_core::{EnvelopeId, ParticipantId, RoomId};
use coletiva_crypto::{
    CryptoError, CryptoResult, DirectoryRefreshReport, KeyPairStorage, KeyStore, KeyStoreConfig,
};
use coletiva_protocol::Envelope;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::ToSocketAddrs;

use crate::config::ClientConfig;
use crate::connection::RelayConnection;
use crate::error::ClientResult;
use crate::registry::RelayRegistry;

/// Eine empfangene Nachricht mit ihrem Entschluesselungsergebnis
///
/// Fehler betreffen nur diese Nachricht; der Empfang geht weiter.
#[derive(Debug)]
pub struct EmpfangeneNachricht {
    pub room_id: RoomId,
    pub envelope_id: EnvelopeId,
    pub sender_id: ParticipantId,
    pub created_at: DateTime<Utc>,
    pub inhalt: CryptoResult<String>,
}

impl EmpfangeneNachricht {
    pub fn ist_lesbar(&self) -> bool {
        self.inhalt.is_ok()
    }
}

/// Eine Seite der Raum-History
#[derive(Debug)]
pub struct NachrichtenSeite {
    /// Aelteste zuerst
    pub nachrichten: Vec<EmpfangeneNachricht>,
    /// Cursor fuer die naechst aeltere Seite
    pub weitere_vor: Option<i64>,
}

/// Chat-Client einer Identitaet
pub struct ChatClient<S: KeyPairStorage> {
    verbindung: Arc<RelayConnection>,
    key_store: KeyStore<S, RelayRegistry>,
    config: ClientConfig,
    /// Public Key noch nicht im Register
    publish_ausstehend: AtomicBool,
}

impl<S: KeyPairStorage> ChatClient<S> {
    /// Verbindet mit dem Relay; die Identitaet kommt vom Session-Provider
    pub async fn new(
        participant: ParticipantId,
        storage: S,
        relay_addr: impl ToSocketAddrs,
        config: ClientConfig,
    ) -> ClientResult<Self> {
        let verbindung = Arc::new(RelayConnection::verbinden(relay_addr, &config).await?);
        let key_store = KeyStore::mit_config(
            participant,
            storage,
            RelayRegistry::new(Arc::clone(&verbindung)),
            KeyStoreConfig {
                registry_timeout: config.anfrage_timeout,
            },
        );

        Ok(Self {
            verbindung,
            key_store,
            config,
            publish_ausstehend: AtomicBool::new(true),
        })
    }

    /// Anmelden, Schluesselpaar sichern, Public Key veroeffentlichen und
    /// das Verzeichnis abgleichen
    ///
    /// Ein fehlgeschlagenes Veroeffentlichen bricht den Start nicht ab.
    pub async fn start(&self) -> ClientResult<DirectoryRefreshReport> {
        self.verbindung.hallo(self.participant_id()).await?;
        self.key_store.ensure_identity().await?;
        self.publish_ausstehend.store(true, Ordering::Release);
        if self.publish_nachholen().await.is_err() {
            tracing::info!(
                participant = %self.participant_id(),
                "Public Key wird spaeter erneut veroeffentlicht"
            );
        }

        let bericht = self.key_store.refresh_directory().await?;
        if bericht.is_partial() {
            tracing::warn!(
                fehlgeschlagen = bericht.fehlgeschlagen.len(),
                "Verzeichnis nur teilweise abgeglichen"
            );
        }
        Ok(bericht)
    }

    /// Veroeffentlicht den Public Key, falls das noch aussteht
    ///
    /// `Ok(true)` wenn jetzt veroeffentlicht wurde, `Ok(false)` wenn nichts
    /// ausstand.
    pub async fn publish_nachholen(&self) -> ClientResult<bool> {
        if !self.publish_ausstehend() {
            return Ok(false);
        }
        self.key_store.publish_public_key().await?;
        self.publish_ausstehend.store(false, Ordering::Release);
        Ok(true)
    }

    pub fn publish_ausstehend(&self) -> bool {
        self.publish_ausstehend.load(Ordering::Acquire)
    }

    pub async fn join(&self, room_id: &RoomId) -> ClientResult<usize> {
        self.verbindung.beitreten(room_id).await
    }

    pub async fn leave(&self, room_id: &RoomId) -> ClientResult<bool> {
        self.verbindung.verlassen(room_id).await
    }

    /// Verschluesselt `text` fuer die Empfaenger (plus sich selbst) und
    /// veroeffentlicht den Envelope im Raum
    ///
    /// Fehlt ein Empfaenger-Schluessel auch nach gezieltem Nachladen,
    /// wird nichts gesendet (`RecipientKeyMissing`).
    pub async fn send_message(
        &self,
        room_id: &RoomId,
        text: &str,
        recipients: &[ParticipantId],
    ) -> ClientResult<Envelope> {
        self.verbindung.zustand().darf_veroeffentlichen(room_id)?;
        // Fehler wurde im Key Store geloggt; Senden geht trotzdem
        let _ = self.publish_nachholen().await;

        let mut empfaenger = Vec::with_capacity(recipients.len() + 1);
        empfaenger.push(self.participant_id().clone());
        empfaenger.extend(recipients.iter().cloned());

        for participant in &empfaenger {
            if self.key_store.lookup(participant).is_none() {
                self.key_store.lookup_or_fetch(participant).await;
            }
        }

        let codec = self
            .key_store
            .codec()
            .await?
            .mit_algorithmus(self.config.algorithm);
        let envelope = codec.encrypt(text, &empfaenger)?.im_raum(room_id.clone());

        let antwort = self
            .verbindung
            .veroeffentlichen(room_id, envelope.clone())
            .await?;
        tracing::debug!(
            envelope_id = %antwort.envelope_id,
            room_id = %room_id,
            empfaenger = envelope.keys.len(),
            zugestellt = antwort.zugestellt,
            "Nachricht gesendet"
        );

        Ok(envelope)
    }

    /// Naechste Nachricht aus einem beigetretenen Raum
    ///
    /// `None` wenn die Verbindung getrennt ist.
    pub async fn next_message(&self) -> Option<EmpfangeneNachricht> {
        let broadcast = self.verbindung.naechster_broadcast().await?;
        Some(self.entschluesseln(broadcast.room_id, broadcast.envelope).await)
    }

    /// Gespeicherte Nachrichten eines Raums (aelteste zuerst)
    ///
    /// Aeltere Seiten mit `before_seq = seite.weitere_vor` laden.
    pub async fn history(
        &self,
        room_id: &RoomId,
        before_seq: Option<i64>,
        limit: Option<u32>,
    ) -> ClientResult<NachrichtenSeite> {
        let seite = self.verbindung.history(room_id, before_seq, limit).await?;

        let mut nachrichten = Vec::with_capacity(seite.envelopes.len());
        for envelope in seite.envelopes {
            nachrichten.push(self.entschluesseln(room_id.clone(), envelope).await);
        }
        Ok(NachrichtenSeite {
            nachrichten,
            weitere_vor: seite.weitere_vor,
        })
    }

    async fn entschluesseln(&self, room_id: RoomId, envelope: Envelope) -> EmpfangeneNachricht {
        let inhalt = match self.key_store.codec().await {
            Ok(codec) => match codec.decrypt(&envelope) {
                // Absender evtl. nach dem letzten Abgleich hinzugekommen
                Err(e @ CryptoError::UnknownSender { .. }) => {
                    if self
                        .key_store
                        .lookup_or_fetch(&envelope.meta.sender_id)
                        .await
                        .is_some()
                    {
                        codec.decrypt(&envelope)
                    } else {
                        Err(e)
                    }
                }
                ergebnis => ergebnis,
            },
            Err(e) => Err(e),
        };

        if let Err(e) = &inhalt {
            tracing::debug!(
                envelope_id = %envelope.id,
                sender = %envelope.meta.sender_id,
                fehler = %e,
                "Nachricht nicht lesbar"
            );
        }

        EmpfangeneNachricht {
            room_id,
            envelope_id: envelope.id,
            sender_id: envelope.meta.sender_id,
            created_at: envelope.meta.created_at,
            inhalt,
        }
    }

    /// Beim Relay abmelden (Mitgliedschaften werden verworfen)
    pub async fn abmelden(&self) -> ClientResult<()> {
        self.verbindung.abmelden().await
    }

    pub fn participant_id(&self) -> &ParticipantId {
        self.key_store.participant_id()
    }

    pub fn key_store(&self) -> &KeyStore<S, RelayRegistry> {
        &self.key_store
    }

    pub fn verbindung(&self) -> &Arc<RelayConnection> {
        &self.verbindung
    }
}
