//! Lokales Public-Key-Verzeichnis (Cache der Registry)

use std::collections::HashMap;
use std::sync::Arc;

use coletiva_core::ParticipantId;
use dashmap::DashMap;

use crate::types::PublicKey;

/// Synchroner Schluessel-Lookup fuer den Codec
pub trait KeyLookup {
    fn public_key_of(&self, participant: &ParticipantId) -> Option<PublicKey>;
}

/// Thread-sicherer Cache {Identitaet -> Public Key}
///
/// Clones teilen sich dieselbe Map. Schreibzugriffe sind last-writer-wins.
#[derive(Debug, Clone, Default)]
pub struct PublicKeyDirectory {
    eintraege: Arc<DashMap<ParticipantId, PublicKey>>,
}

impl PublicKeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Setzt oder ersetzt einen Eintrag
    ///
    /// Gibt `true` zurueck wenn sich der Schluessel geaendert hat.
    pub fn einfuegen(&self, participant: ParticipantId, public_key: PublicKey) -> bool {
        match self.eintraege.insert(participant, public_key) {
            Some(alt) => alt != public_key,
            None => true,
        }
    }

    pub fn get(&self, participant: &ParticipantId) -> Option<PublicKey> {
        self.eintraege.get(participant).map(|e| *e.value())
    }

    pub fn entfernen(&self, participant: &ParticipantId) -> Option<PublicKey> {
        self.eintraege.remove(participant).map(|(_, pk)| pk)
    }

    pub fn len(&self) -> usize {
        self.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.is_empty()
    }

    /// Alle bekannten Identitaeten (unsortiert)
    pub fn teilnehmer(&self) -> Vec<ParticipantId> {
        self.eintraege.iter().map(|e| e.key().clone()).collect()
    }
}

impl KeyLookup for PublicKeyDirectory {
    fn public_key_of(&self, participant: &ParticipantId) -> Option<PublicKey> {
        self.get(participant)
    }
}

impl KeyLookup for HashMap<ParticipantId, PublicKey> {
    fn public_key_of(&self, participant: &ParticipantId) -> Option<PublicKey> {
        self.get(participant).copied()
    }
}
