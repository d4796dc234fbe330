//! Fehlertypen fuer das Relay

use coletiva_chat::ChatError;
use coletiva_protocol::{ErrorCode, ZustandsFehler};
use thiserror::Error;

/// Fehlertyp fuer das Relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Anfrage im aktuellen Verbindungszustand nicht erlaubt
    #[error("Unzulaessiger Zustand: {0}")]
    Zustand(#[from] ZustandsFehler),

    /// Fehler aus Envelope-Speicher oder Register
    #[error(transparent)]
    Chat(#[from] ChatError),

    /// Formal ungueltige Anfrage
    #[error("Ungueltige Anfrage: {0}")]
    UngueltigeAnfrage(String),

    /// Berechtigung verweigert
    #[error("Berechtigung verweigert: {0}")]
    ZugriffVerweigert(String),

    /// Server ist voll
    #[error("Server ist voll")]
    ServerVoll,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl RelayError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Fehler fuer eine ungueltige Anfrage
    pub fn ungueltig(msg: impl Into<String>) -> Self {
        Self::UngueltigeAnfrage(msg.into())
    }

    /// Fehler-Code fuer die Error-Response an den Client
    pub fn fehler_code(&self) -> ErrorCode {
        match self {
            Self::Zustand(ZustandsFehler::NichtBeigetreten(_)) => ErrorCode::NotJoined,
            Self::Zustand(ZustandsFehler::BereitsAuthentifiziert(_)) => {
                ErrorCode::AlreadyAuthenticated
            }
            Self::Zustand(_) => ErrorCode::NotAuthenticated,
            Self::Chat(ChatError::EnvelopeZuGross { .. }) => ErrorCode::PayloadTooLarge,
            Self::Chat(ChatError::DatenbankFehler(_)) => ErrorCode::InternalError,
            Self::Chat(_) | Self::UngueltigeAnfrage(_) => ErrorCode::InvalidRequest,
            Self::ZugriffVerweigert(_) => ErrorCode::PermissionDenied,
            Self::ServerVoll => ErrorCode::ServerFull,
            Self::Io(_) | Self::Intern(_) => ErrorCode::InternalError,
        }
    }
}

/// Result-Typ fuer das Relay
pub type RelayResult<T> = Result<T, RelayError>;
