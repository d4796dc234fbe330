//! HKDF-SHA256 Key Derivation

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{CryptoError, CryptoResult};
use crate::types::SecretBytes;

/// HKDF-basierte Key Derivation (allgemein verwendbar)
pub fn hkdf_derive(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> CryptoResult<SecretBytes> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(SecretBytes::new(okm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hkdf_derive_deterministisch() {
        let key1 = hkdf_derive(b"ikm", b"salt", b"info", 32).unwrap();
        let key2 = hkdf_derive(b"ikm", b"salt", b"info", 32).unwrap();
        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 32);
    }

    #[test]
    fn hkdf_verschiedene_salts_geben_verschiedene_keys() {
        let key1 = hkdf_derive(b"ikm", b"nonce-1", b"info", 32).unwrap();
        let key2 = hkdf_derive(b"ikm", b"nonce-2", b"info", 32).unwrap();
        assert_ne!(key1, key2);
    }

    #[test]
    fn hkdf_zu_lange_ausgabe_ist_fehler() {
        // SHA256-HKDF erlaubt maximal 255 * 32 Bytes
        assert!(matches!(
            hkdf_derive(b"ikm", b"salt", b"info", 255 * 32 + 1),
            Err(CryptoError::KeyDerivation(_))
        ));
    }
}
