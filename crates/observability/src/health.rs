//! Health-Check-Endpunkt fuer das Relay
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und DB-Verbindungsstatus

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub db_connected: bool,
    pub relay_running: bool,
}

/// Geteilter Zustand fuer den Health-Check-Handler
///
/// Der Server setzt DB- und Relay-Status, der Handler liest nur.
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    db_connected: Arc<AtomicBool>,
    relay_running: Arc<AtomicBool>,
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            db_connected: Arc::new(AtomicBool::new(true)),
            relay_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn db_verbunden(&self) -> bool {
        self.db_connected.load(Ordering::Relaxed)
    }

    pub fn db_status_setzen(&self, verbunden: bool) {
        self.db_connected.store(verbunden, Ordering::Relaxed);
    }

    pub fn relay_laeuft(&self) -> bool {
        self.relay_running.load(Ordering::Relaxed)
    }

    pub fn relay_status_setzen(&self, laeuft: bool) {
        self.relay_running.store(laeuft, Ordering::Relaxed);
    }

    /// Aktueller Bericht
    ///
    /// Ohne laufendes Relay ist der Dienst `Unhealthy`, ohne Datenbank nur
    /// `Degraded` (Live-Zustellung funktioniert weiter, History nicht).
    pub fn bericht(&self) -> HealthResponse {
        let db_connected = self.db_verbunden();
        let relay_running = self.relay_laeuft();
        let status = match (relay_running, db_connected) {
            (false, _) => HealthStatus::Unhealthy,
            (true, false) => HealthStatus::Degraded,
            (true, true) => HealthStatus::Healthy,
        };

        HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            db_connected,
            relay_running,
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.bericht();

    let http_status = match response.status {
        // 200 auch bei degraded, die Probe soll nicht fehlschlagen
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_state_frisch_ohne_relay_unhealthy() {
        let state = HealthState::neu();
        assert!(state.uptime_seconds() < 5);
        assert!(state.db_verbunden());
        assert_eq!(state.bericht().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn status_folgt_relay_und_db() {
        let state = HealthState::neu();
        state.relay_status_setzen(true);
        assert_eq!(state.bericht().status, HealthStatus::Healthy);

        state.db_status_setzen(false);
        assert_eq!(state.bericht().status, HealthStatus::Degraded);

        state.relay_status_setzen(false);
        assert_eq!(state.bericht().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn clone_teilt_zustand() {
        let state = HealthState::neu();
        let kopie = state.clone();
        kopie.relay_status_setzen(true);
        assert!(state.relay_laeuft());
    }

    #[test]
    fn health_response_serialisierung() {
        let response = HealthResponse {
            status: HealthStatus::Degraded,
            version: "0.1.0".to_string(),
            uptime_seconds: 3600,
            db_connected: false,
            relay_running: true,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"degraded\""));
        assert!(json.contains("\"uptime_seconds\":3600"));
        assert!(json.contains("\"db_connected\":false"));
        assert!(json.contains("\"relay_running\":true"));
    }
}
