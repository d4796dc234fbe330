//! Fehlertypen fuer den Client

use coletiva_crypto::CryptoError;
use coletiva_protocol::{ErrorCode, ZustandsFehler};
use thiserror::Error;

/// Fehlertyp fuer den Client
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP-Verbindung fehlgeschlagen
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Kanal nicht (mehr) verbunden oder im falschen Zustand
    #[error("Kanal getrennt: {0}")]
    ChannelDisconnected(String),

    /// Keine Antwort innerhalb der Frist; Zustellung unbekannt
    #[error("Timeout bei '{art}'")]
    Timeout { art: &'static str },

    /// Relay hat mit Fehler geantwortet
    #[error("Relay-Fehler ({code:?}): {message}")]
    Relay { code: ErrorCode, message: String },

    /// Unerwartete Antwort vom Relay
    #[error("Unerwartete Antwort: {0}")]
    UnerwarteteAntwort(String),

    /// Fehler aus Key Store oder Codec
    #[error(transparent)]
    Krypto(#[from] CryptoError),
}

impl ClientError {
    /// Transportfehler, bei denen ein erneuter Versuch (mit Backoff) sinnvoll ist
    pub fn ist_wiederholbar(&self) -> bool {
        match self {
            Self::Io(_) | Self::ChannelDisconnected(_) | Self::Timeout { .. } => true,
            Self::Relay { code, .. } => {
                matches!(code, ErrorCode::ServerFull | ErrorCode::InternalError)
            }
            Self::Krypto(e) => matches!(e, CryptoError::RegistryTimeout(_) | CryptoError::Registry(_)),
            Self::UnerwarteteAntwort(_) => false,
        }
    }

    pub(crate) fn getrennt(grund: impl Into<String>) -> Self {
        Self::ChannelDisconnected(grund.into())
    }
}

impl From<ZustandsFehler> for ClientError {
    fn from(e: ZustandsFehler) -> Self {
        Self::ChannelDisconnected(e.to_string())
    }
}

/// Result-Typ fuer den Client
pub type ClientResult<T> = Result<T, ClientError>;
