//! Handler fuer alle Control-Nachrichten
//!
//! Jeder Handler liefert bei Erfolg die Antwort-Payload und sonst einen
//! `RelayError`, den der Dispatcher in eine Error-Response uebersetzt.

pub mod envelope_handler;
pub mod key_handler;
pub mod room_handler;
pub mod session_handler;
