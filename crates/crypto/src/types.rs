//! Gemeinsame Typen fuer das Kryptografie-Subsystem

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::error::{CryptoError, CryptoResult};

/// Laenge von X25519-Schluesseln und symmetrischen Schluesseln in Bytes
pub const SCHLUESSEL_LAENGE: usize = 32;

/// Oeffentlicher X25519-Schluessel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; SCHLUESSEL_LAENGE]);

impl PublicKey {
    pub fn new(bytes: [u8; SCHLUESSEL_LAENGE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SCHLUESSEL_LAENGE] {
        &self.0
    }

    /// Dekodiert einen Base64-String (Registry- und Dateiformat)
    pub fn aus_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD.decode(encoded.trim().as_bytes())?;
        Self::try_from(bytes.as_slice())
    }

    pub fn zu_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; SCHLUESSEL_LAENGE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::UngueltigeSchluesselLaenge {
                    erwartet: SCHLUESSEL_LAENGE,
                    erhalten: bytes.len(),
                })?;
        Ok(Self(arr))
    }
}

/// Identitaets-Schluesselpaar eines Clients
///
/// Der private Teil verlaesst den Client nie und wird beim Drop genullt.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Erzeugt ein neues zufaelliges Schluesselpaar (OS-RNG)
    pub fn generieren() -> Self {
        Self::aus_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Stellt ein Schluesselpaar aus dem privaten Schluessel wieder her
    pub fn aus_private_bytes(bytes: [u8; SCHLUESSEL_LAENGE]) -> Self {
        Self::aus_secret(StaticSecret::from(bytes))
    }

    fn aus_secret(secret: StaticSecret) -> Self {
        let public = PublicKey(X25519PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Privater Schluessel fuer die lokale Persistenz
    pub fn private_bytes(&self) -> SecretBytes {
        SecretBytes::new(self.secret.to_bytes().to_vec())
    }

    /// Statischer X25519-Austausch mit einem fremden Public Key
    ///
    /// `None` wenn das Ergebnis nicht beitragend ist (Low-Order-Punkt).
    pub(crate) fn diffie_hellman(&self, other: &PublicKey) -> Option<SecretBytes> {
        let shared = self.secret.diffie_hellman(&X25519PublicKey::from(other.0));
        if !shared.was_contributory() {
            return None;
        }
        Some(SecretBytes::new(shared.as_bytes().to_vec()))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public.zu_base64())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Sicherer Schluessel-Container (wird beim Drop genullt)
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBytes(Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Frische Zufallsbytes aus dem OS-RNG
    pub fn zufaellig(len: usize) -> Self {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Frische 12-Byte-Nonce aus dem OS-RNG
pub fn zufalls_nonce() -> [u8; coletiva_protocol::NONCE_LAENGE] {
    let mut nonce = [0u8; coletiva_protocol::NONCE_LAENGE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
