//! E2E Verschluesselung (End-to-End)
//!
//! Client <-> Client Verschluesselung. Das Relay speichert und verteilt
//! Envelopes blind und kann den Inhalt nicht entschluesseln.
//!
//! ## Ablauf
//! 1. Jeder Client hat ein X25519-Identitaets-Schluesselpaar (Key Store)
//! 2. Pro Nachricht: frischer symmetrischer Schluessel + Nonce
//! 3. Nachricht wird einmal verschluesselt (AES-256-GCM oder ChaCha20-Poly1305)
//! 4. Schluessel wird pro Empfaenger eingewickelt (statischer X25519 + HKDF)

pub mod codec;
pub mod kdf;
pub mod key_wrap;
pub mod symmetric;

pub use codec::{decrypt_envelope, encrypt_for_group, GroupCodec};
pub use kdf::hkdf_derive;
pub use key_wrap::{unwrap_key, wrap_key};
pub use symmetric::{aead_entschluesseln, aead_verschluesseln};
