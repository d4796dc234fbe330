//! Einwickeln des symmetrischen Nachrichten-Schluessels pro Empfaenger
//!
//! Statischer X25519-Austausch zwischen Absender und Empfaenger:
//! 1. DH(absender_sk, empfaenger_pk) == DH(empfaenger_sk, absender_pk)
//! 2. HKDF-SHA256 (Salt = Envelope-Nonce, Info = Label || absender_pk || empfaenger_pk)
//! 3. AEAD ueber den 32-Byte Nachrichten-Schluessel mit derselben Nonce
//!
//! Da jeder Empfaenger einen eigenen Wrapping-Key bekommt, ist die gemeinsame
//! Nonce pro Schluessel nur einmal in Gebrauch.

use coletiva_protocol::{PayloadAlgorithm, NONCE_LAENGE};

use crate::e2e::kdf::hkdf_derive;
use crate::e2e::symmetric::{aead_entschluesseln, aead_verschluesseln};
use crate::error::{CryptoError, CryptoResult};
use crate::types::{KeyPair, PublicKey, SecretBytes, SCHLUESSEL_LAENGE};

const KEY_WRAP_INFO: &[u8] = b"coletiva-key-wrap-v1";

fn wrapping_key(
    dh_output: &SecretBytes,
    nonce: &[u8; NONCE_LAENGE],
    sender_pk: &PublicKey,
    recipient_pk: &PublicKey,
) -> CryptoResult<SecretBytes> {
    let mut info = Vec::with_capacity(KEY_WRAP_INFO.len() + 2 * SCHLUESSEL_LAENGE);
    info.extend_from_slice(KEY_WRAP_INFO);
    info.extend_from_slice(sender_pk.as_bytes());
    info.extend_from_slice(recipient_pk.as_bytes());

    hkdf_derive(dh_output.as_bytes(), nonce, &info, SCHLUESSEL_LAENGE)
}

/// Wickelt `message_key` fuer einen Empfaenger ein
pub fn wrap_key(
    algorithm: PayloadAlgorithm,
    message_key: &SecretBytes,
    nonce: &[u8; NONCE_LAENGE],
    sender: &KeyPair,
    recipient_pk: &PublicKey,
) -> CryptoResult<Vec<u8>> {
    let dh = sender.diffie_hellman(recipient_pk).ok_or_else(|| {
        CryptoError::UngueltigerSchluessel("Empfaenger-Schluessel ist ein Low-Order-Punkt".into())
    })?;
    let kek = wrapping_key(&dh, nonce, &sender.public_key(), recipient_pk)?;

    aead_verschluesseln(algorithm, kek.as_bytes(), nonce, message_key.as_bytes(), &[])
}

/// Packt den Nachrichten-Schluessel mit dem eigenen privaten Schluessel aus
///
/// Jeder Fehlschlag (falscher Schluessel, manipulierte Daten, falsche
/// Laenge) wird zu [`CryptoError::KeyUnwrapFailed`].
pub fn unwrap_key(
    algorithm: PayloadAlgorithm,
    wrapped: &[u8],
    nonce: &[u8; NONCE_LAENGE],
    recipient: &KeyPair,
    sender_pk: &PublicKey,
) -> CryptoResult<SecretBytes> {
    let dh = recipient
        .diffie_hellman(sender_pk)
        .ok_or(CryptoError::KeyUnwrapFailed)?;
    let kek = wrapping_key(&dh, nonce, sender_pk, &recipient.public_key())
        .map_err(|_| CryptoError::KeyUnwrapFailed)?;

    let message_key = aead_entschluesseln(algorithm, kek.as_bytes(), nonce, wrapped, &[])
        .map(SecretBytes::new)
        .ok_or(CryptoError::KeyUnwrapFailed)?;

    if message_key.len() != SCHLUESSEL_LAENGE {
        return Err(CryptoError::KeyUnwrapFailed);
    }
    Ok(message_key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
