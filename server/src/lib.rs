//! coletiva-server – Bibliotheks-Root
//!
//! Verdrahtet Datenbank, Relay und Observability und stellt den
//! Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use anyhow::{Context, Result};
use coletiva_db::SqliteDb;
use coletiva_observability::{observability_server_starten, HealthState, RelayMetrics};
use coletiva_relay::{RelayServer, RelayState};
use config::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Haelt den vorbereiteten Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    db: Arc<SqliteDb>,
    state: Arc<RelayState<SqliteDb>>,
    relay: RelayServer<SqliteDb>,
    metriken: RelayMetrics,
    health: HealthState,
}

impl Server {
    /// Oeffnet die Datenbank und bindet den Relay-Socket
    ///
    /// Reihenfolge:
    /// 1. Datenbankverbindung herstellen (inkl. Migrationen)
    /// 2. Metriken registrieren
    /// 3. TCP-Listener binden
    pub async fn vorbereiten(config: ServerConfig) -> Result<Self> {
        let db = Arc::new(
            SqliteDb::oeffnen(&config.datenbank_config())
                .await
                .with_context(|| format!("Datenbank '{}' nicht verfuegbar", config.datenbank.url))?,
        );

        let metriken = RelayMetrics::neu()?;
        let state = RelayState::neu(config.relay_config(), Arc::clone(&db), metriken.clone());

        let bind_addr = config.relay_bind_adresse()?;
        let relay = RelayServer::binden(Arc::clone(&state), bind_addr)
            .await
            .with_context(|| format!("Relay-Adresse {bind_addr} nicht bindbar"))?;

        Ok(Self {
            config,
            db,
            state,
            relay,
            metriken,
            health: HealthState::neu(),
        })
    }

    /// Tatsaechlich gebundene Relay-Adresse
    pub fn relay_adresse(&self) -> Result<SocketAddr> {
        Ok(self.relay.lokale_adresse()?)
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    pub fn state(&self) -> &Arc<RelayState<SqliteDb>> {
        &self.state
    }

    /// Laeuft bis `shutdown_rx` ein `true`-Signal empfaengt
    pub async fn laufen(self, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let Server {
            config,
            db,
            state,
            relay,
            metriken,
            health,
        } = self;

        tracing::info!(
            relay = %config.relay.name,
            adresse = %relay.lokale_adresse()?,
            max_clients = config.relay.max_clients,
            "Server startet"
        );

        let observability = if config.observability.aktiviert {
            let addr = config.observability_bind_adresse()?;
            Some(tokio::spawn(observability_server_starten(
                addr,
                metriken,
                health.clone(),
                shutdown_rx.clone(),
            )))
        } else {
            None
        };

        health.relay_status_setzen(true);
        let intervall = Duration::from_secs(config.datenbank.ping_intervall_sek.max(1));

        let relay_ergebnis = tokio::select! {
            ergebnis = relay.starten(shutdown_rx) => ergebnis,
            () = wartung(db, Arc::clone(&state), health.clone(), intervall) => Ok(()),
        };
        health.relay_status_setzen(false);

        if let Some(handle) = observability {
            if relay_ergebnis.is_err() {
                handle.abort();
            }
            match handle.await {
                Ok(Err(e)) => tracing::warn!(fehler = %e, "Observability-Server mit Fehler beendet"),
                Err(e) if !e.is_cancelled() => {
                    tracing::warn!(fehler = %e, "Observability-Task abgebrochen")
                }
                _ => {}
            }
        }

        relay_ergebnis?;
        tracing::info!("Server beendet");
        Ok(())
    }
}

/// Periodische Aufgaben: DB-Health pruefen, verwaiste Sequencer entfernen
async fn wartung(
    db: Arc<SqliteDb>,
    state: Arc<RelayState<SqliteDb>>,
    health: HealthState,
    intervall: Duration,
) {
    let mut ticker = tokio::time::interval(intervall);
    loop {
        ticker.tick().await;

        let verbunden = match db.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(fehler = %e, "Datenbank antwortet nicht");
                false
            }
        };
        if verbunden != health.db_verbunden() {
            tracing::info!(verbunden, "Datenbank-Status geaendert");
        }
        health.db_status_setzen(verbunden);

        state.sequencer_aufraeumen();
    }
}
