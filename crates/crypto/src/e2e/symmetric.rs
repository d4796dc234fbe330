//! AEAD-Primitive fuer Payload und Key-Wrapping
//!
//! Beide Algorithmen arbeiten mit 32-Byte-Schluessel, 12-Byte-Nonce und
//! haengen einen 16-Byte Auth-Tag an den Ciphertext an.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce as AesNonce,
};
use chacha20poly1305::{ChaCha20Poly1305, Key as ChaChaKey, Nonce as ChaChaNonce};
use coletiva_protocol::{PayloadAlgorithm, NONCE_LAENGE};

use crate::error::{CryptoError, CryptoResult};
use crate::types::SCHLUESSEL_LAENGE;

/// Laenge des AEAD Auth-Tags in Bytes
pub const TAG_LAENGE: usize = 16;

/// Verschluesselt `plaintext` und bindet `aad` an den Auth-Tag
pub fn aead_verschluesseln(
    algorithm: PayloadAlgorithm,
    key_bytes: &[u8],
    nonce: &[u8; NONCE_LAENGE],
    plaintext: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    pruefe_schluessel(key_bytes)?;
    let payload = Payload { msg: plaintext, aad };

    let result = match algorithm {
        PayloadAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes));
            cipher.encrypt(AesNonce::from_slice(nonce), payload)
        }
        PayloadAlgorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new(ChaChaKey::from_slice(key_bytes));
            cipher.encrypt(ChaChaNonce::from_slice(nonce), payload)
        }
    };

    result.map_err(|e| CryptoError::Verschluesselung(e.to_string()))
}

/// Entschluesselt und verifiziert den Auth-Tag
///
/// Gibt `None` zurueck wenn Tag, Nonce, AAD oder Schluessel nicht passen.
/// Der Aufrufer entscheidet welcher Fehler daraus wird.
pub fn aead_entschluesseln(
    algorithm: PayloadAlgorithm,
    key_bytes: &[u8],
    nonce: &[u8; NONCE_LAENGE],
    ciphertext: &[u8],
    aad: &[u8],
) -> Option<Vec<u8>> {
    if key_bytes.len() != SCHLUESSEL_LAENGE || ciphertext.len() < TAG_LAENGE {
        return None;
    }
    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    match algorithm {
        PayloadAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes));
            cipher.decrypt(AesNonce::from_slice(nonce), payload).ok()
        }
        PayloadAlgorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new(ChaChaKey::from_slice(key_bytes));
            cipher.decrypt(ChaChaNonce::from_slice(nonce), payload).ok()
        }
    }
}

fn pruefe_schluessel(key_bytes: &[u8]) -> CryptoResult<()> {
    if key_bytes.len() != SCHLUESSEL_LAENGE {
        return Err(CryptoError::UngueltigeSchluesselLaenge {
            erwartet: SCHLUESSEL_LAENGE,
            erhalten: key_bytes.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
