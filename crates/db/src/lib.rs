//! coletiva-db – Persistenz fuer Envelopes und Public Keys
//!
//! Dieses Crate stellt das Repository-Pattern bereit. Die Traits in
//! `repository` entkoppeln Relay und Services vom konkreten Speicher; die
//! SQLite-Implementierung liegt in `sqlite`.

pub mod error;
pub mod models;
pub mod repository;
pub mod sqlite;

pub use error::DbError;
pub use models::{EnvelopeFilter, EnvelopeRecord, PublicKeyRecord};
pub use repository::{DatabaseConfig, DbResult, EnvelopeRepository, PublicKeyRepository};
pub use sqlite::SqliteDb;
