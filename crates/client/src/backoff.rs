//! Exponentielles Backoff fuer Reconnect-Versuche

use std::time::Duration;

/// Liefert wachsende Wartezeiten: basis, basis*faktor, ... bis `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    basis: Duration,
    max: Duration,
    faktor: u32,
    versuch: u32,
}

impl Backoff {
    pub fn new(basis: Duration, max: Duration) -> Self {
        Self {
            basis,
            max,
            faktor: 2,
            versuch: 0,
        }
    }

    pub fn mit_faktor(mut self, faktor: u32) -> Self {
        self.faktor = faktor.max(1);
        self
    }

    /// Wartezeit fuer den naechsten Versuch
    pub fn naechste_verzoegerung(&mut self) -> Duration {
        let multiplikator = self.faktor.saturating_pow(self.versuch);
        self.versuch = self.versuch.saturating_add(1);
        self.basis
            .checked_mul(multiplikator)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Nach einer erfolgreichen Verbindung
    pub fn zuruecksetzen(&mut self) {
        self.versuch = 0;
    }

    pub fn versuche(&self) -> u32 {
        self.versuch
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(30))
    }
}
