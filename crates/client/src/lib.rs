//! # coletiva-client
//!
//! Client-Seite des Coletiva-Gruppenchats.
//!
//! ## Module
//! - `connection` - TCP-Verbindung zum Relay (Request/Response, Broadcasts, Keepalive)
//! - `registry` - Public-Key-Register ueber die Relay-Verbindung
//! - `chat` - `ChatClient`: Key Store + Codec + Verbindung
//! - `backoff` - Exponentielle Wartezeiten fuer Reconnects
//! - `config` - Client-Konfiguration
//! - `error` - Fehlertypen

pub mod backoff;
pub mod chat;
pub mod config;
pub mod connection;
pub mod error;
pub mod registry;

pub use backoff::Backoff;
pub use chat::{ChatClient, EmpfangeneNachricht, NachrichtenSeite};
pub use config::ClientConfig;
pub use connection::RelayConnection;
pub use error::{ClientError, ClientResult};
pub use registry::RelayRegistry;
