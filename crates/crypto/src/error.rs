//! Fehlertypen fuer Key Store und Gruppen-Codec

use std::time::Duration;

use coletiva_core::ParticipantId;
use thiserror::Error;

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Lokaler Schluessel-Speicher nicht lesbar/schreibbar (fatal)
    #[error("Schluesselpaar nicht verfuegbar: {0}")]
    KeyPairUnavailable(String),

    /// Kein Public Key fuer einen Empfaenger im Verzeichnis
    #[error("Kein oeffentlicher Schluessel fuer Empfaenger {recipient}")]
    RecipientKeyMissing { recipient: ParticipantId },

    #[error("Envelope enthaelt keinen Schluessel fuer diese Identitaet")]
    NoKeyForRecipient,

    #[error("Absender {sender} ist im Schluessel-Verzeichnis unbekannt")]
    UnknownSender { sender: ParticipantId },

    #[error("Symmetrischer Schluessel konnte nicht ausgepackt werden")]
    KeyUnwrapFailed,

    #[error("Nachricht konnte nicht entschluesselt werden")]
    MessageDecryptFailed,

    #[error("Entschluesselter Inhalt ist kein gueltiges UTF-8")]
    InvalidUtf8,

    #[error("Ungueltige Eingabe: {0}")]
    InvalidInput(String),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Ungueltiger oeffentlicher Schluessel: {0}")]
    UngueltigerSchluessel(String),

    #[error("Ungueltige Schluessel-Laenge: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },

    #[error("Key Derivation fehlgeschlagen: {0}")]
    KeyDerivation(String),

    #[error("Registry-Fehler: {0}")]
    Registry(String),

    #[error("Registry hat nicht innerhalb von {0:?} geantwortet")]
    RegistryTimeout(Duration),

    #[error("Base64-Dekodierung fehlgeschlagen: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// Fehler die nur eine einzelne Nachricht betreffen
    ///
    /// Der Aufrufer zeigt die Nachricht als unlesbar an und macht weiter.
    pub fn ist_pro_nachricht(&self) -> bool {
        matches!(
            self,
            Self::NoKeyForRecipient
                | Self::UnknownSender { .. }
                | Self::KeyUnwrapFailed
                | Self::MessageDecryptFailed
                | Self::InvalidUtf8
        )
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Ergebnis eines Verzeichnis-Abgleichs mit der Registry
///
/// Eintraege die nicht dekodiert werden konnten sind uebersprungen; alle
/// anderen wurden uebernommen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryRefreshReport {
    pub aktualisiert: usize,
    pub fehlgeschlagen: Vec<ParticipantId>,
}

impl DirectoryRefreshReport {
    /// Teilweiser Fehlschlag: mindestens ein Eintrag wurde uebersprungen
    pub fn is_partial(&self) -> bool {
        !self.fehlgeschlagen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pro_nachricht_fehler_erkennen() {
        assert!(CryptoError::KeyUnwrapFailed.ist_pro_nachricht());
        assert!(CryptoError::UnknownSender {
            sender: ParticipantId::new("x")
        }
        .ist_pro_nachricht());
        assert!(!CryptoError::KeyPairUnavailable("kaputt".into()).ist_pro_nachricht());
        assert!(!CryptoError::RecipientKeyMissing {
            recipient: ParticipantId::new("bob")
        }
        .ist_pro_nachricht());
    }

    #[test]
    fn report_teilweise() {
        let mut report = DirectoryRefreshReport::default();
        assert!(!report.is_partial());
        report.fehlgeschlagen.push(ParticipantId::new("mallory"));
        assert!(report.is_partial());
    }
}
