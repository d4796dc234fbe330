//! Fehlertypen fuer das Chat-Crate

use thiserror::Error;

/// Chat-Fehlertypen
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Envelope zu gross: {size} Bytes (Maximum: {max} Bytes)")]
    EnvelopeZuGross { size: usize, max: usize },

    #[error("Envelope bereits gespeichert: {0}")]
    EnvelopeDoppelt(String),

    #[error("Ungueltiger oeffentlicher Schluessel: {0}")]
    UngueltigerSchluessel(String),

    #[error("Ungueltige Eingabe: {0}")]
    UngueltigeEingabe(String),

    #[error("Datenbank-Fehler: {0}")]
    DatenbankFehler(#[from] coletiva_db::DbError),
}

pub type ChatResult<T> = Result<T, ChatError>;
