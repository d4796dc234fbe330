//! # coletiva-crypto
//!
//! Ende-zu-Ende Verschluesselung fuer den Coletiva-Gruppenchat.
//!
//! ## Module
//! - `keystore` - Identitaets-Schluesselpaar, Registry, Public-Key-Verzeichnis
//! - `e2e` - Gruppen-Nachrichten-Codec (hybride Verschluesselung)
//! - `types` - Gemeinsame Typen (KeyPair, PublicKey, SecretBytes)
//! - `error` - Fehlertypen

pub mod e2e;
pub mod error;
pub mod keystore;
pub mod types;

// Bequeme Re-Exports
pub use error::{CryptoError, CryptoResult, DirectoryRefreshReport};
pub use types::{KeyPair, PublicKey, SecretBytes};

pub use e2e::{decrypt_envelope, encrypt_for_group, GroupCodec};
pub use keystore::{
    FileKeyStorage, KeyLookup, KeyPairStorage, KeyStore, KeyStoreConfig, MemoryKeyStorage,
    MemoryRegistry, PublicKeyDirectory, PublicKeyRegistry,
};
