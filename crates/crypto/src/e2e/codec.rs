//! Gruppen-Nachrichten-Codec (hybride Verschluesselung)
//!
//! Eine Klartext-Nachricht wird genau einmal mit einem frischen
//! symmetrischen Schluessel verschluesselt. Der Schluessel wird fuer jeden
//! Empfaenger einzeln eingewickelt; das Ergebnis ist ein [`Envelope`].
//!
//! ## Ablauf Verschluesseln
//! 1. Public Keys aller Empfaenger aufloesen (alles oder nichts)
//! 2. Zufaelliger 32-Byte-Schluessel und 12-Byte-Nonce
//! 3. AEAD ueber den UTF-8-Klartext, Absender-ID als AAD
//! 4. Schluessel pro Empfaenger einwickeln (gleiche Nonce)
//!
//! ## Ablauf Entschluesseln
//! 1. Eigenen Eintrag ueber die eigene Identitaet finden
//! 2. Absender-Schluessel im Verzeichnis nachschlagen
//! 3. Schluessel auspacken, Payload entschluesseln, UTF-8 pruefen
//!
//! Beide Richtungen sind synchron und rein CPU-gebunden.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use coletiva_core::{EnvelopeId, ParticipantId};
use coletiva_protocol::{Envelope, EnvelopeMeta, PayloadAlgorithm, WrappedKey};

use crate::e2e::key_wrap::{unwrap_key, wrap_key};
use crate::e2e::symmetric::{aead_entschluesseln, aead_verschluesseln};
use crate::error::{CryptoError, CryptoResult};
use crate::keystore::{KeyLookup, PublicKeyDirectory};
use crate::types::{zufalls_nonce, KeyPair, PublicKey, SecretBytes, SCHLUESSEL_LAENGE};

/// Verschluesselt `plaintext` fuer alle `recipients`
///
/// Fehlt auch nur ein Empfaenger-Schluessel, wird kein Envelope erzeugt.
/// Doppelte Empfaenger werden zusammengefasst (erstes Vorkommen zaehlt).
pub fn encrypt_for_group<L: KeyLookup + ?Sized>(
    plaintext: &str,
    algorithm: PayloadAlgorithm,
    sender_id: &ParticipantId,
    key_pair: &KeyPair,
    recipients: &[ParticipantId],
    directory: &L,
) -> CryptoResult<Envelope> {
    if recipients.is_empty() {
        return Err(CryptoError::InvalidInput(
            "Envelope ohne Empfaenger ist nicht lesbar".into(),
        ));
    }

    let mut gesehen = HashSet::with_capacity(recipients.len());
    let mut aufgeloest: Vec<(&ParticipantId, PublicKey)> = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        if !gesehen.insert(recipient) {
            continue;
        }
        let pk = schluessel_fuer(recipient, sender_id, key_pair, directory).ok_or_else(|| {
            CryptoError::RecipientKeyMissing {
                recipient: recipient.clone(),
            }
        })?;
        aufgeloest.push((recipient, pk));
    }

    let message_key = SecretBytes::zufaellig(SCHLUESSEL_LAENGE);
    let nonce = zufalls_nonce();

    let ciphertext = aead_verschluesseln(
        algorithm,
        message_key.as_bytes(),
        &nonce,
        plaintext.as_bytes(),
        sender_id.as_str().as_bytes(),
    )?;

    let keys = aufgeloest
        .into_iter()
        .map(|(recipient, pk)| {
            Ok(WrappedKey {
                recipient: recipient.clone(),
                wrapped_key: wrap_key(algorithm, &message_key, &nonce, key_pair, &pk)?,
            })
        })
        .collect::<CryptoResult<Vec<_>>>()?;

    tracing::trace!(
        sender = %sender_id,
        empfaenger = keys.len(),
        bytes = ciphertext.len(),
        "Envelope verschluesselt"
    );

    Ok(Envelope {
        id: EnvelopeId::new(),
        room_id: None,
        algorithm,
        nonce,
        ciphertext,
        keys,
        meta: EnvelopeMeta {
            sender_id: sender_id.clone(),
            created_at: Utc::now(),
        },
    })
}

/// Entschluesselt einen Envelope fuer die eigene Identitaet
pub fn decrypt_envelope<L: KeyLookup + ?Sized>(
    envelope: &Envelope,
    self_id: &ParticipantId,
    key_pair: &KeyPair,
    directory: &L,
) -> CryptoResult<String> {
    let wrapped = envelope
        .key_for(self_id)
        .ok_or(CryptoError::NoKeyForRecipient)?;

    let sender = &envelope.meta.sender_id;
    let sender_pk = schluessel_fuer(sender, self_id, key_pair, directory).ok_or_else(|| {
        CryptoError::UnknownSender {
            sender: sender.clone(),
        }
    })?;

    let message_key = unwrap_key(
        envelope.algorithm,
        &wrapped.wrapped_key,
        &envelope.nonce,
        key_pair,
        &sender_pk,
    )?;

    let plaintext = aead_entschluesseln(
        envelope.algorithm,
        message_key.as_bytes(),
        &envelope.nonce,
        &envelope.ciphertext,
        sender.as_str().as_bytes(),
    )
    .ok_or(CryptoError::MessageDecryptFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
}

/// Eigene Identitaet wird immer ueber das eigene Schluesselpaar aufgeloest
fn schluessel_fuer<L: KeyLookup + ?Sized>(
    id: &ParticipantId,
    self_id: &ParticipantId,
    key_pair: &KeyPair,
    directory: &L,
) -> Option<PublicKey> {
    if id == self_id {
        return Some(key_pair.public_key());
    }
    directory.public_key_of(id)
}

/// An eine Identitaet gebundener Codec
///
/// Wird vom Key Store erzeugt und haelt Schluesselpaar und Verzeichnis.
#[derive(Debug, Clone)]
pub struct GroupCodec {
    self_id: ParticipantId,
    key_pair: Arc<KeyPair>,
    directory: PublicKeyDirectory,
    algorithm: PayloadAlgorithm,
}

impl GroupCodec {
    pub fn new(self_id: ParticipantId, key_pair: Arc<KeyPair>, directory: PublicKeyDirectory) -> Self {
        Self {
            self_id,
            key_pair,
            directory,
            algorithm: PayloadAlgorithm::default(),
        }
    }

    /// Setzt den Algorithmus fuer neue Envelopes
    pub fn mit_algorithmus(mut self, algorithm: PayloadAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn self_id(&self) -> &ParticipantId {
        &self.self_id
    }

    pub fn encrypt(&self, plaintext: &str, recipients: &[ParticipantId]) -> CryptoResult<Envelope> {
        encrypt_for_group(
            plaintext,
            self.algorithm,
            &self.self_id,
            &self.key_pair,
            recipients,
            &self.directory,
        )
    }

    pub fn decrypt(&self, envelope: &Envelope) -> CryptoResult<String> {
        decrypt_envelope(envelope, &self.self_id, &self.key_pair, &self.directory)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
