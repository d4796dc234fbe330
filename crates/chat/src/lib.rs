//! coletiva-chat – Service-Schicht des Relays
//!
//! Dieses Crate implementiert:
//! - EnvelopeService: Envelopes pruefen, speichern, History laden
//! - KeyRegistryService: Public Keys validieren, registrieren, auflisten
//!
//! Beide Services arbeiten ueber die Repository-Traits aus `coletiva-db`
//! und sehen niemals Klartext.
//!
//! # Beispiel
//!
//! ```no_run
//! use std::sync::Arc;
//! use coletiva_chat::{EnvelopeLimits, EnvelopeService, KeyRegistryService};
//! use coletiva_db::SqliteDb;
//!
//! #[tokio::main]
//! async fn main() {
//!     let db = Arc::new(SqliteDb::in_memory().await.unwrap());
//!
//!     let envelopes = EnvelopeService::neu(db.clone(), EnvelopeLimits::default());
//!     let register = KeyRegistryService::neu(db);
//! }
//! ```

pub mod error;
pub mod registry;
pub mod service;
pub mod types;


// Bequeme Re-Exporte
pub use error::{ChatError, ChatResult};
pub use registry::KeyRegistryService;
pub use service::EnvelopeService;
pub use types::{
    EnvelopeLimits, HistoryAnfrage, HistorySeite, HISTORY_MAX_LIMIT, HISTORY_STANDARD_LIMIT,
};
